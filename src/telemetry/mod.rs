pub mod flags;
pub mod hub;
pub mod layout;
pub mod process;
pub mod producer;
pub mod segment;
pub mod session_info;

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

pub use flags::FlagStatus;
pub use hub::{HubHandle, TelemetryHub};
pub use producer::{IRacingReader, ReplayTelemetryProvider, TelemetryProvider};

pub(crate) const UNKNOWN: &str = "Unknown";

/// One normalized point-in-time snapshot of the simulator state.
///
/// Samples are immutable once produced. Fields derived from the session-info
/// block (car, track, session type, driver count) are carried forward from
/// the previous sample while that block is unchanged.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetrySample {
    pub is_connected: bool,
    /// Session type as published by the simulator, e.g. "Race"
    pub session_type: String,
    pub session_num: i32,
    pub session_state: i32,
    /// Seconds since the session started
    pub session_time_s: f64,
    /// Seconds left in the session
    pub session_time_remaining_s: f64,
    pub lap: i32,
    pub laps_completed: i32,
    pub total_laps: i32,
    pub flag: FlagStatus,
    pub car_name: String,
    pub track_name: String,
    pub position: i32,
    pub class_position: i32,
    pub driver_count: i32,
    /// Meters per second
    pub speed_mps: f32,
    pub rpm: f32,
    /// -1 reverse, 0 neutral, 1..n forward gears
    pub gear: i32,
    /// 0=off throttle to 1=full throttle
    pub throttle: f32,
    /// 0=brake released to 1=max pedal force
    pub brake: f32,
    pub clutch: f32,
    /// Liters
    pub fuel_level: f32,
    pub fuel_use_per_lap: f32,
    pub last_lap_time_s: f32,
    pub best_lap_time_s: f32,
    pub is_on_track: bool,
    pub is_in_garage: bool,
    pub is_in_pits: bool,
    /// Capture time in milliseconds since the Unix epoch
    pub timestamp_ms: u64,
    /// Name of the simulator the sample came from
    pub source: String,
}

impl Default for TelemetrySample {
    fn default() -> Self {
        Self {
            is_connected: false,
            session_type: UNKNOWN.to_string(),
            session_num: 0,
            session_state: 0,
            session_time_s: 0.,
            session_time_remaining_s: 0.,
            lap: 0,
            laps_completed: 0,
            total_laps: 0,
            flag: FlagStatus::None,
            car_name: UNKNOWN.to_string(),
            track_name: UNKNOWN.to_string(),
            position: 0,
            class_position: 0,
            driver_count: 0,
            speed_mps: 0.,
            rpm: 0.,
            gear: 0,
            throttle: 0.,
            brake: 0.,
            clutch: 0.,
            fuel_level: 0.,
            fuel_use_per_lap: 0.,
            last_lap_time_s: 0.,
            best_lap_time_s: 0.,
            is_on_track: false,
            is_in_garage: false,
            is_in_pits: false,
            timestamp_ms: 0,
            source: UNKNOWN.to_string(),
        }
    }
}

/// Something a provider reports during one poll.
#[derive(Clone, Debug, PartialEq)]
pub enum ProviderEvent {
    ConnectionChanged(bool),
    Sample(TelemetrySample),
}

/// Notifications published by the hub. All of them are fire-and-forget.
#[derive(Clone, Debug, PartialEq)]
pub enum HubEvent {
    TelemetryUpdated(TelemetrySample),
    ConnectionChanged(bool),
    FlagChanged { old: FlagStatus, new: FlagStatus },
}

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
