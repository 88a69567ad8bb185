// Library interface for pitlight
// This allows integration tests and benches to access internal modules

pub mod config;
pub mod errors;
pub mod lighting;
pub mod logging;
pub mod telemetry;
pub mod writer;

// Re-export commonly used types
pub use config::AppConfig;
pub use errors::PitlightError;
pub use lighting::{Color, FlagLightingEngine, LightingDevice, LightingEffect};
pub use logging::Logger;
pub use telemetry::{FlagStatus, HubEvent, ProviderEvent, TelemetryHub, TelemetrySample};
