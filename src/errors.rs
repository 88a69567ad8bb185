// Error types for pitlight

use snafu::Snafu;
use std::io;

#[derive(Debug, Snafu)]
pub enum PitlightError {
    // Errors for the shared memory segment
    #[snafu(display("Unable to map telemetry segment"))]
    SegmentMapError { source: io::Error },
    #[snafu(display("Unable to open telemetry segment {name}: os error {code}"))]
    SegmentOpenError { name: String, code: u32 },
    #[snafu(display(
        "Telemetry segment read out of bounds: offset {offset}, length {len}, segment size {size}"
    ))]
    SegmentBoundsError {
        offset: usize,
        len: usize,
        size: usize,
    },
    #[snafu(display("Invalid telemetry header: {reason}"))]
    InvalidHeader { reason: String },

    // Errors for the telemetry providers
    #[snafu(display("Telemetry provider error: {description}"))]
    TelemetryProducerError { description: String },
    #[snafu(display("Error loading telemetry recording"))]
    RecordingLoadError { source: io::Error },

    // Errors for the telemetry writer
    #[snafu(display("Error writing telemetry file"))]
    WriterError { source: io::Error },

    // Lighting errors
    #[snafu(display("Lighting zone {zone} rejected command: {reason}"))]
    ZoneCommandError { zone: String, reason: String },
    #[snafu(display("Lighting device {device} failed: {reason}"))]
    DeviceCommandError { device: String, reason: String },

    // Host errors
    #[snafu(display("Unable to start async runtime"))]
    RuntimeError { source: io::Error },
    #[snafu(display("Unable to install Ctrl-C handler: {description}"))]
    SignalHandlerError { description: String },

    // Config management errors
    #[snafu(display("Could not find application data directory to save config file"))]
    NoConfigDir,
    #[snafu(display("Error reading or writing config file"))]
    ConfigIOError { source: io::Error },
    #[snafu(display("Error serializing config file"))]
    ConfigSerializeError { source: serde_json::Error },
    #[snafu(display("Invalid configuration: {reason}"))]
    InvalidConfig { reason: String },
}
