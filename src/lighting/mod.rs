pub mod device;
pub mod engine;

use std::{sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedReceiver;

use crate::{
    logging::Logger,
    telemetry::{FlagStatus, HubEvent},
};

pub use device::{LightingDevice, LogZoneDriver, ZoneDriver, ZonedLightingDevice};
pub use engine::FlagLightingEngine;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const OFF: Color = Color::rgb(0, 0, 0);
    pub const GREEN: Color = Color::rgb(0, 255, 0);
    pub const YELLOW: Color = Color::rgb(255, 255, 0);
    pub const BLUE: Color = Color::rgb(0, 0, 255);
    pub const WHITE: Color = Color::rgb(255, 255, 255);
    pub const RED: Color = Color::rgb(255, 0, 0);
    pub const ORANGE: Color = Color::rgb(255, 165, 0);

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

impl std::fmt::Display for Color {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

/// What the devices show for a flag.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LightingEffect {
    Solid(Color),
    /// Alternate between the two colors, switching every `interval`.
    Flash {
        primary: Color,
        secondary: Color,
        interval: Duration,
    },
    /// Stop flashing and go dark.
    Off,
}

impl LightingEffect {
    const fn flash(primary: Color, interval_ms: u64) -> Self {
        LightingEffect::Flash {
            primary,
            secondary: Color::OFF,
            interval: Duration::from_millis(interval_ms),
        }
    }

    pub fn for_flag(flag: FlagStatus) -> Self {
        match flag {
            FlagStatus::Green => LightingEffect::Solid(Color::GREEN),
            FlagStatus::Yellow => LightingEffect::Solid(Color::YELLOW),
            FlagStatus::YellowWaving => LightingEffect::flash(Color::YELLOW, 500),
            FlagStatus::Blue => LightingEffect::Solid(Color::BLUE),
            FlagStatus::White => LightingEffect::Solid(Color::WHITE),
            FlagStatus::Checkered => LightingEffect::flash(Color::WHITE, 250),
            FlagStatus::Red => LightingEffect::Solid(Color::RED),
            FlagStatus::Black => LightingEffect::Solid(Color::RED),
            FlagStatus::Debris => LightingEffect::flash(Color::ORANGE, 500),
            FlagStatus::OneLapToGreen => LightingEffect::flash(Color::GREEN, 700),
            FlagStatus::Crossed => LightingEffect::Solid(Color::YELLOW),
            FlagStatus::None => LightingEffect::Off,
        }
    }
}

/// Drive the engine from hub events until the hub goes away.
pub async fn pump_hub_events(
    engine: Arc<FlagLightingEngine>,
    mut events: UnboundedReceiver<HubEvent>,
    logger: Logger,
) {
    while let Some(event) = events.recv().await {
        match event {
            HubEvent::TelemetryUpdated(sample) => {
                engine
                    .process_sample(sample.flag, sample.timestamp_ms)
                    .await
            }
            HubEvent::FlagChanged { old, new } => {
                logger.info(format!("Flag changed: {old} -> {new}"));
            }
            HubEvent::ConnectionChanged(true) => logger.info("Telemetry connected"),
            HubEvent::ConnectionChanged(false) => {
                logger.info("Telemetry disconnected, restoring devices");
                engine.on_telemetry_disconnected().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effect_table() {
        use LightingEffect::*;
        let ms = Duration::from_millis;
        let table = [
            (FlagStatus::Green, Solid(Color::GREEN)),
            (FlagStatus::Yellow, Solid(Color::YELLOW)),
            (
                FlagStatus::YellowWaving,
                Flash {
                    primary: Color::YELLOW,
                    secondary: Color::OFF,
                    interval: ms(500),
                },
            ),
            (FlagStatus::Blue, Solid(Color::BLUE)),
            (FlagStatus::White, Solid(Color::WHITE)),
            (
                FlagStatus::Checkered,
                Flash {
                    primary: Color::WHITE,
                    secondary: Color::OFF,
                    interval: ms(250),
                },
            ),
            (FlagStatus::Red, Solid(Color::RED)),
            (FlagStatus::Black, Solid(Color::RED)),
            (
                FlagStatus::Debris,
                Flash {
                    primary: Color::ORANGE,
                    secondary: Color::OFF,
                    interval: ms(500),
                },
            ),
            (
                FlagStatus::OneLapToGreen,
                Flash {
                    primary: Color::GREEN,
                    secondary: Color::OFF,
                    interval: ms(700),
                },
            ),
            (FlagStatus::Crossed, Solid(Color::YELLOW)),
            (FlagStatus::None, Off),
        ];
        for (flag, effect) in table {
            assert_eq!(LightingEffect::for_flag(flag), effect, "{flag}");
        }
    }

    #[test]
    fn test_color_display() {
        assert_eq!(Color::ORANGE.to_string(), "#ffa500");
        assert_eq!(Color::OFF.to_string(), "#000000");
    }
}
