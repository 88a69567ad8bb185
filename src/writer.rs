use std::{
    fs::File,
    io::BufWriter,
    path::Path,
};

use serde_jsonlines::JsonLinesWriter;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::{PitlightError, logging::Logger, telemetry::HubEvent};

/// Record every forwarded sample as one JSON line until the hub goes away.
///
/// Blocks the calling thread; run it on a dedicated thread. Returns the
/// number of samples written.
pub fn write_telemetry(
    file: &Path,
    mut events: UnboundedReceiver<HubEvent>,
    logger: Logger,
) -> Result<usize, PitlightError> {
    let telemetry_file = File::create(file).map_err(|e| PitlightError::WriterError { source: e })?;
    let mut writer = JsonLinesWriter::new(BufWriter::new(telemetry_file));

    let mut written = 0;
    while let Some(event) = events.blocking_recv() {
        let HubEvent::TelemetryUpdated(sample) = event else {
            continue;
        };
        match writer.write(&sample) {
            Ok(()) => written += 1,
            Err(e) => logger.warn_with("Error while writing telemetry sample to output file", &e),
        }
    }

    writer
        .flush()
        .map_err(|e| PitlightError::WriterError { source: e })?;
    logger.info(format!("Wrote {written} samples to {}", file.display()));
    Ok(written)
}
