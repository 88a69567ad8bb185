use std::{mem, path::Path, time::Duration};

use crate::{PitlightError, logging::Logger};

use super::{
    FlagStatus, ProviderEvent, TelemetrySample,
    layout::{HEADER_LEN, SegmentHeader, TrackedValues, TrackedVar, parse_var_descriptors},
    now_ms,
    process::ProcessProbe,
    segment::{SegmentOpener, SharedSegment},
    session_info::{SessionDetails, decode_block},
};

pub const DEFAULT_POLL_INTERVAL_MS: u64 = 100;
pub const IRACING_SOURCE: &str = "iRacing";

/// A source of telemetry samples with a connected/disconnected lifecycle.
///
/// Providers are owned by the hub, which calls [`poll`](Self::poll) once per
/// [`poll_interval`](Self::poll_interval) from a blocking worker. A provider is
/// never polled again before its previous poll has returned.
///
/// # Lifecycle
///
/// 1. `poll()` is called repeatedly. Each call returns what happened during
///    that tick: connection transitions and at most one sample.
/// 2. `stop()` is called once when the hub shuts down. It must release every
///    OS resource before returning.
pub trait TelemetryProvider: Send {
    /// Name used in logs and hub diagnostics.
    fn name(&self) -> &str;

    /// Cadence the hub polls this provider at.
    fn poll_interval(&self) -> Duration;

    /// Perform one tick.
    fn poll(&mut self) -> Vec<ProviderEvent>;

    /// Release resources. Emits nothing.
    fn stop(&mut self);
}

#[derive(Clone, Debug)]
pub struct ReaderSettings {
    /// Simulator name stamped on every sample.
    pub source: String,
    /// Executable gating segment opens. `None` skips the process check.
    pub executable: Option<String>,
    pub poll_interval: Duration,
}

impl Default for ReaderSettings {
    fn default() -> Self {
        Self {
            source: IRACING_SOURCE.to_string(),
            executable: None,
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
        }
    }
}

/// Where the reader is in its `Disconnected → SegmentOpen → Live` cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReaderPhase {
    Disconnected,
    SegmentOpen,
    Live,
}

enum ReaderState {
    Disconnected,
    SegmentOpen(Box<dyn SharedSegment>),
    Live(Box<dyn SharedSegment>),
}

struct SessionCache {
    info_update: i32,
    session_num: i32,
    car_idx: Option<i32>,
    details: SessionDetails,
}

/// Reads the simulator's shared telemetry segment.
///
/// The segment is only opened while the simulator process is present. Once
/// the header is readable the reader waits for the connected status bit and a
/// data buffer carrying real values before reporting itself connected.
pub struct IRacingReader {
    settings: ReaderSettings,
    opener: Box<dyn SegmentOpener>,
    probe: Box<dyn ProcessProbe>,
    state: ReaderState,
    session: Option<SessionCache>,
    session_parses: usize,
    logger: Logger,
}

impl IRacingReader {
    pub fn new(
        settings: ReaderSettings,
        opener: Box<dyn SegmentOpener>,
        probe: Box<dyn ProcessProbe>,
        logger: Logger,
    ) -> Self {
        Self {
            settings,
            opener,
            probe,
            state: ReaderState::Disconnected,
            session: None,
            session_parses: 0,
            logger,
        }
    }

    pub fn phase(&self) -> ReaderPhase {
        match self.state {
            ReaderState::Disconnected => ReaderPhase::Disconnected,
            ReaderState::SegmentOpen(_) => ReaderPhase::SegmentOpen,
            ReaderState::Live(_) => ReaderPhase::Live,
        }
    }

    /// How many times the session-info block was parsed since creation.
    pub fn session_parses(&self) -> usize {
        self.session_parses
    }

    fn release(&mut self) -> bool {
        let was_live = matches!(self.state, ReaderState::Live(_));
        self.state = ReaderState::Disconnected;
        self.session = None;
        was_live
    }

    /// Decode one sample from the segment.
    ///
    /// `Ok(None)` means the simulator is not publishing real values yet: the
    /// status bit is clear or none of the tracked variables were found.
    fn read_sample(
        &mut self,
        segment: &dyn SharedSegment,
    ) -> Result<Option<TelemetrySample>, PitlightError> {
        let header = SegmentHeader::parse(&segment.read(0, HEADER_LEN)?)?;
        if !header.is_connected() {
            return Ok(None);
        }
        header.validate()?;

        let table = segment.read(header.var_header_offset as usize, header.var_table_len())?;
        let descriptors = parse_var_descriptors(&table, header.num_vars as usize)?;
        let data = segment.read(header.data_offset(), header.buf_len as usize)?;
        let values = TrackedValues::decode(&descriptors, &data)?;
        if values.is_empty() {
            return Ok(None);
        }

        let session_num = values.i32_or_default(TrackedVar::SessionNum);
        let car_idx = values.get(TrackedVar::PlayerCarIdx).map(|v| v.as_i32());
        self.refresh_session(segment, &header, session_num, car_idx)?;
        let details = self
            .session
            .as_ref()
            .map(|cache| cache.details.clone())
            .unwrap_or_default();

        Ok(Some(TelemetrySample {
            is_connected: true,
            session_type: details.session_type,
            session_num,
            session_state: values.i32_or_default(TrackedVar::SessionState),
            session_time_s: values.f64_or_default(TrackedVar::SessionTime),
            session_time_remaining_s: values.f64_or_default(TrackedVar::SessionTimeRemain),
            lap: values.i32_or_default(TrackedVar::Lap),
            laps_completed: values.i32_or_default(TrackedVar::LapCompleted),
            total_laps: values.i32_or_default(TrackedVar::SessionLapsTotal),
            flag: FlagStatus::from_session_flags(values.u32_or_default(TrackedVar::SessionFlags)),
            car_name: details.car_name,
            track_name: details.track_name,
            position: values.i32_or_default(TrackedVar::PlayerCarPosition),
            class_position: values.i32_or_default(TrackedVar::PlayerCarClassPosition),
            driver_count: details.driver_count,
            speed_mps: values.f32_or_default(TrackedVar::Speed),
            rpm: values.f32_or_default(TrackedVar::Rpm),
            gear: values.i32_or_default(TrackedVar::Gear),
            throttle: values.f32_or_default(TrackedVar::Throttle),
            brake: values.f32_or_default(TrackedVar::Brake),
            clutch: values.f32_or_default(TrackedVar::Clutch),
            fuel_level: values.f32_or_default(TrackedVar::FuelLevel),
            fuel_use_per_lap: values.f32_or_default(TrackedVar::FuelUsePerLap),
            last_lap_time_s: values.f32_or_default(TrackedVar::LapLastLapTime),
            best_lap_time_s: values.f32_or_default(TrackedVar::LapBestLapTime),
            is_on_track: values.bool_or_default(TrackedVar::IsOnTrack),
            is_in_garage: values.bool_or_default(TrackedVar::IsInGarage),
            is_in_pits: values.bool_or_default(TrackedVar::OnPitRoad),
            timestamp_ms: now_ms(),
            source: self.settings.source.clone(),
        }))
    }

    /// Re-parse the session-info block when its update counter moved or the
    /// session number changed. The counter alone is not trusted.
    fn refresh_session(
        &mut self,
        segment: &dyn SharedSegment,
        header: &SegmentHeader,
        session_num: i32,
        car_idx: Option<i32>,
    ) -> Result<(), PitlightError> {
        let reason = match &self.session {
            None => "first read",
            Some(cache) if cache.info_update != header.session_info_update => "update counter",
            Some(cache) if cache.session_num != session_num => "session number",
            Some(cache) if cache.car_idx != car_idx => "player car",
            Some(_) => return Ok(()),
        };

        let block = segment.read(
            header.session_info_offset as usize,
            header.session_info_len as usize,
        )?;
        let details = SessionDetails::parse_for_player(&decode_block(&block), session_num, car_idx);
        if let (Some(listed), Some(live)) = (details.player_car_idx, car_idx) {
            if listed != live {
                self.logger.warn(format!(
                    "Session info lists car {listed} as the player's, telemetry reports car {live}"
                ));
            }
        }
        self.logger.debug(format!(
            "Parsed session info ({reason}): {} / {} / {} with {} drivers",
            details.track_name, details.car_name, details.session_type, details.driver_count
        ));

        self.session = Some(SessionCache {
            info_update: header.session_info_update,
            session_num,
            car_idx,
            details,
        });
        self.session_parses += 1;
        Ok(())
    }
}

impl TelemetryProvider for IRacingReader {
    fn name(&self) -> &str {
        &self.settings.source
    }

    fn poll_interval(&self) -> Duration {
        self.settings.poll_interval
    }

    fn poll(&mut self) -> Vec<ProviderEvent> {
        let mut events = Vec::new();

        if let Some(executable) = self.settings.executable.clone() {
            if !self.probe.is_running(&executable) {
                if !matches!(self.state, ReaderState::Disconnected) {
                    self.logger
                        .info(format!("{executable} is no longer running, releasing segment"));
                    if self.release() {
                        events.push(ProviderEvent::ConnectionChanged(false));
                    }
                }
                return events;
            }
        }

        let (segment, was_live) = match mem::replace(&mut self.state, ReaderState::Disconnected) {
            ReaderState::Disconnected => match self.opener.open() {
                Ok(Some(segment)) => {
                    self.logger
                        .info(format!("Opened telemetry segment {}", self.opener.describe()));
                    (segment, false)
                }
                Ok(None) => return events,
                Err(e) => {
                    self.logger.warn_with(
                        format!("Could not open telemetry segment {}", self.opener.describe()),
                        &e,
                    );
                    return events;
                }
            },
            ReaderState::SegmentOpen(segment) => (segment, false),
            ReaderState::Live(segment) => (segment, true),
        };

        match self.read_sample(segment.as_ref()) {
            Ok(Some(sample)) => {
                if !was_live {
                    self.logger.info(format!(
                        "{} connected: {} at {}",
                        self.settings.source, sample.car_name, sample.track_name
                    ));
                    events.push(ProviderEvent::ConnectionChanged(true));
                }
                events.push(ProviderEvent::Sample(sample));
                self.state = ReaderState::Live(segment);
            }
            Ok(None) => {
                if was_live {
                    self.logger
                        .info(format!("{} left the session", self.settings.source));
                    events.push(ProviderEvent::ConnectionChanged(false));
                    self.session = None;
                }
                self.state = ReaderState::SegmentOpen(segment);
            }
            Err(e) => {
                self.logger
                    .warn_with("Telemetry decode failed, dropping segment", &e);
                drop(segment);
                self.session = None;
                if was_live {
                    events.push(ProviderEvent::ConnectionChanged(false));
                }
            }
        }

        events
    }

    fn stop(&mut self) {
        if !matches!(self.state, ReaderState::Disconnected) {
            self.logger.info("Releasing telemetry segment");
        }
        self.release();
    }
}

/// Replays recorded samples, one per tick.
///
/// Reports itself connected on the first tick and disconnected once the
/// recording is exhausted. Recorded timestamps are kept so that anything
/// timing-sensitive downstream sees the original pacing.
pub struct ReplayTelemetryProvider {
    name: String,
    samples: Vec<TelemetrySample>,
    cursor: usize,
    poll_interval: Duration,
    connected: bool,
}

impl ReplayTelemetryProvider {
    /// # Arguments
    ///
    /// * `samples` - The recording, in playback order
    /// * `poll_interval` - Delay between two replayed samples
    pub fn from_points(samples: Vec<TelemetrySample>, poll_interval: Duration) -> Self {
        Self {
            name: "replay".to_string(),
            samples,
            cursor: 0,
            poll_interval,
            connected: false,
        }
    }

    /// Load a JSON Lines recording written by [`crate::writer::write_telemetry`].
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or a line is not a sample.
    pub fn from_file(path: &Path, poll_interval: Duration) -> Result<Self, PitlightError> {
        let samples = serde_jsonlines::json_lines::<TelemetrySample, _>(path)
            .and_then(|lines| lines.collect::<std::io::Result<Vec<_>>>())
            .map_err(|e| PitlightError::RecordingLoadError { source: e })?;

        let mut provider = Self::from_points(samples, poll_interval);
        provider.name = format!("replay:{}", path.display());
        Ok(provider)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn is_finished(&self) -> bool {
        self.cursor >= self.samples.len() && !self.connected
    }
}

impl TelemetryProvider for ReplayTelemetryProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    fn poll(&mut self) -> Vec<ProviderEvent> {
        let mut events = Vec::new();
        match self.samples.get(self.cursor) {
            Some(sample) => {
                if !self.connected {
                    self.connected = true;
                    events.push(ProviderEvent::ConnectionChanged(true));
                }
                let mut sample = sample.clone();
                sample.is_connected = true;
                events.push(ProviderEvent::Sample(sample));
                self.cursor += 1;
            }
            None if self.connected => {
                self.connected = false;
                events.push(ProviderEvent::ConnectionChanged(false));
            }
            None => {}
        }
        events
    }

    fn stop(&mut self) {
        self.cursor = self.samples.len();
        self.connected = false;
    }
}
