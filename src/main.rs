use std::{
    path::{Path, PathBuf},
    sync::Arc,
    thread,
    time::Duration,
};

use clap::{Parser, Subcommand};
use pitlight::{
    AppConfig, FlagLightingEngine, HubEvent, Logger, PitlightError, TelemetryHub,
    config::DeviceConfig,
    lighting::{LogZoneDriver, ZonedLightingDevice, pump_hub_events},
    telemetry::{
        IRacingReader, ReplayTelemetryProvider, TelemetryProvider,
        process::{ManualProcessProbe, ProcessProbe, SystemProcessProbe},
        producer::DEFAULT_POLL_INTERVAL_MS,
    },
    writer,
};
use tokio::sync::{mpsc::UnboundedReceiver, watch};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Follow the running simulator until Ctrl-C.
    Live {
        /// Record every forwarded sample to this JSON Lines file.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Play a recorded session through the lighting engine.
    Replay {
        #[arg(short, long)]
        input: PathBuf,

        #[arg(long, default_value_t = DEFAULT_POLL_INTERVAL_MS)]
        interval_ms: u64,
    },
}

fn load_config(logger: &Logger) -> Result<AppConfig, PitlightError> {
    match AppConfig::from_local_file()? {
        Some(config) => Ok(config),
        None => {
            logger.info("No config file found, using defaults");
            Ok(AppConfig::default())
        }
    }
}

fn build_device(device: &DeviceConfig, logger: &Logger) -> ZonedLightingDevice<LogZoneDriver> {
    ZonedLightingDevice::new(
        device.name.clone(),
        device.zones.clone(),
        Arc::new(LogZoneDriver::new(logger.child("zones"))),
        logger.child("device"),
    )
}

/// Wait for Ctrl-C, or for the hub to run out of providers when
/// `until_disconnected` is set.
async fn wait_for_end(
    mut shutdown: watch::Receiver<bool>,
    mut events: UnboundedReceiver<HubEvent>,
    until_disconnected: bool,
) {
    let disconnected = async {
        while let Some(event) = events.recv().await {
            if until_disconnected && matches!(event, HubEvent::ConnectionChanged(false)) {
                return;
            }
        }
    };
    tokio::select! {
        _ = shutdown.wait_for(|stop| *stop) => {}
        _ = disconnected => {}
    }
}

fn run(
    provider: Box<dyn TelemetryProvider>,
    config: &AppConfig,
    output: Option<PathBuf>,
    until_disconnected: bool,
    shutdown: watch::Receiver<bool>,
    logger: Logger,
) -> Result<(), PitlightError> {
    let runtime = tokio::runtime::Runtime::new()
        .map_err(|e| PitlightError::RuntimeError { source: e })?;

    runtime.block_on(async {
        let engine = Arc::new(FlagLightingEngine::new(
            config.debounce(),
            logger.child("engine"),
        ));
        for device in &config.devices {
            engine
                .register_device(Arc::new(build_device(device, &logger)))
                .await;
        }

        let mut hub = TelemetryHub::new(logger.child("hub"));
        hub.add_provider(provider);
        let lighting_events = hub.subscribe();
        let host_events = hub.subscribe();

        // if we need to write an output file the writer gets its own subscription
        let writer_thread = output.map(|output_file| {
            let events = hub.subscribe();
            let writer_logger = logger.child("writer");
            thread::spawn(move || writer::write_telemetry(&output_file, events, writer_logger))
        });

        let handle = hub.start();
        let pump = tokio::spawn(pump_hub_events(
            engine.clone(),
            lighting_events,
            logger.child("lighting"),
        ));

        wait_for_end(shutdown, host_events, until_disconnected).await;

        logger.info("Shutting down");
        handle.stop().await;
        if let Err(e) = pump.await {
            logger.error_with("Lighting pump failed", &e);
        }
        engine.stop().await;

        if let Some(writer_thread) = writer_thread {
            match writer_thread.join() {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => logger.error_with("Telemetry recording failed", &e),
                Err(_) => logger.error("Telemetry writer thread panicked"),
            }
        }
    });
    Ok(())
}

fn live(
    output: Option<PathBuf>,
    shutdown: watch::Receiver<bool>,
    logger: Logger,
) -> Result<(), PitlightError> {
    let config = load_config(&logger)?;
    let opener = config.simulator.segment.opener()?;
    let probe: Box<dyn ProcessProbe> = match config.simulator.executable {
        Some(_) => Box::new(SystemProcessProbe::default()),
        None => Box::new(ManualProcessProbe::new(true)),
    };
    logger.info(format!("Reading telemetry from {}", opener.describe()));
    let reader = IRacingReader::new(
        config.reader_settings(),
        opener,
        probe,
        logger.child("reader"),
    );
    run(Box::new(reader), &config, output, false, shutdown, logger)
}

fn replay(
    input: &Path,
    interval_ms: u64,
    shutdown: watch::Receiver<bool>,
    logger: Logger,
) -> Result<(), PitlightError> {
    let config = load_config(&logger)?;
    let provider = ReplayTelemetryProvider::from_file(input, Duration::from_millis(interval_ms))?;
    if provider.is_empty() {
        logger.warn(format!("{} holds no samples", input.display()));
        return Ok(());
    }
    logger.info(format!(
        "Replaying {} samples from {}",
        provider.len(),
        input.display()
    ));
    run(Box::new(provider), &config, None, true, shutdown, logger)
}

fn main() {
    colog::init();
    let logger = Logger::from_log_crate("pitlight");

    let cli = Args::parse();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handler = ctrlc::set_handler(move || {
        let _ = shutdown_tx.send(true);
    })
    .map_err(|e| PitlightError::SignalHandlerError {
        description: e.to_string(),
    });

    let result = handler.and_then(|_| match &cli.command {
        Commands::Live { output } => live(output.clone(), shutdown_rx, logger.clone()),
        Commands::Replay { input, interval_ms } => {
            replay(input, *interval_ms, shutdown_rx, logger.clone())
        }
    });
    if let Err(e) = result {
        logger.error_with("pitlight stopped", &e);
        std::process::exit(1);
    }
}
