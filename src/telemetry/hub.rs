//! Distribution hub: many providers in, one logical telemetry stream out.
//!
//! Each provider gets its own poll task. Everything a provider reports is
//! funneled into a single router task so that active-provider selection and
//! flag diffing see events in one order.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use tokio::{
    sync::{
        mpsc::{self, UnboundedReceiver, UnboundedSender},
        watch,
    },
    task::JoinHandle,
    time::{MissedTickBehavior, timeout},
};

use crate::logging::Logger;

use super::{FlagStatus, HubEvent, ProviderEvent, TelemetryProvider};

type SharedProvider = Arc<Mutex<Box<dyn TelemetryProvider>>>;

/// Active-provider selection and flag diffing, free of any scheduling.
#[derive(Debug)]
pub struct HubRouter {
    names: Vec<String>,
    connected: Vec<bool>,
    active: Option<usize>,
    last_flag: FlagStatus,
    logger: Logger,
}

impl HubRouter {
    pub fn new(names: Vec<String>, logger: Logger) -> Self {
        let connected = vec![false; names.len()];
        Self {
            names,
            connected,
            active: None,
            last_flag: FlagStatus::None,
            logger,
        }
    }

    pub fn active(&self) -> Option<usize> {
        self.active
    }

    pub fn last_flag(&self) -> FlagStatus {
        self.last_flag
    }

    fn name(&self, provider: usize) -> &str {
        self.names
            .get(provider)
            .map(String::as_str)
            .unwrap_or("unknown")
    }

    /// Apply one provider event and return what subscribers must be told.
    pub fn handle(&mut self, provider: usize, event: ProviderEvent) -> Vec<HubEvent> {
        if provider >= self.connected.len() {
            self.logger
                .warn(format!("Ignoring event from unregistered provider {provider}"));
            return Vec::new();
        }

        let mut out = Vec::new();
        match event {
            ProviderEvent::ConnectionChanged(true) => {
                self.connected[provider] = true;
            }
            ProviderEvent::ConnectionChanged(false) => {
                self.connected[provider] = false;
                if self.active == Some(provider) {
                    self.fail_over(provider, &mut out);
                }
            }
            ProviderEvent::Sample(sample) => {
                if sample.is_connected {
                    self.connected[provider] = true;
                }
                if self.active.is_none() && sample.is_connected {
                    self.logger
                        .info(format!("Active telemetry provider: {}", self.name(provider)));
                    self.active = Some(provider);
                    out.push(HubEvent::ConnectionChanged(true));
                }
                if self.active != Some(provider) {
                    return out;
                }

                let new = sample.flag;
                out.push(HubEvent::TelemetryUpdated(sample));
                if new != self.last_flag {
                    out.push(HubEvent::FlagChanged {
                        old: self.last_flag,
                        new,
                    });
                    self.last_flag = new;
                }
            }
        }
        out
    }

    fn fail_over(&mut self, lost: usize, out: &mut Vec<HubEvent>) {
        match self.connected.iter().position(|connected| *connected) {
            Some(next) => {
                self.logger.info(format!(
                    "Telemetry provider {} disconnected, switching to {}",
                    self.name(lost),
                    self.name(next)
                ));
                self.active = Some(next);
            }
            None => {
                self.logger.info(format!(
                    "Telemetry provider {} disconnected, no provider left",
                    self.name(lost)
                ));
                self.active = None;
                self.last_flag = FlagStatus::None;
                out.push(HubEvent::ConnectionChanged(false));
            }
        }
    }
}

/// Owns the providers and the subscriber list until started.
pub struct TelemetryHub {
    providers: Vec<Box<dyn TelemetryProvider>>,
    subscribers: Vec<UnboundedSender<HubEvent>>,
    logger: Logger,
}

impl TelemetryHub {
    pub fn new(logger: Logger) -> Self {
        Self {
            providers: Vec::new(),
            subscribers: Vec::new(),
            logger,
        }
    }

    pub fn add_provider(&mut self, provider: Box<dyn TelemetryProvider>) {
        self.logger
            .debug(format!("Registered telemetry provider {}", provider.name()));
        self.providers.push(provider);
    }

    /// Every hub event, in order, until the hub stops.
    pub fn subscribe(&mut self) -> UnboundedReceiver<HubEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push(tx);
        rx
    }

    /// Spawn the poll tasks and the router. Must run inside a tokio runtime.
    pub fn start(self) -> HubHandle {
        let names = self
            .providers
            .iter()
            .map(|p| p.name().to_string())
            .collect::<Vec<_>>();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let pollers = self
            .providers
            .into_iter()
            .enumerate()
            .map(|(idx, provider)| {
                let interval = provider.poll_interval();
                let name = provider.name().to_string();
                tokio::spawn(run_poller(
                    idx,
                    name,
                    Arc::new(Mutex::new(provider)),
                    interval,
                    events_tx.clone(),
                    shutdown_rx.clone(),
                    self.logger.clone(),
                ))
            })
            .collect();
        drop(events_tx);

        let router = HubRouter::new(names, self.logger.clone());
        let router = tokio::spawn(run_router(router, events_rx, self.subscribers));

        HubHandle {
            shutdown: shutdown_tx,
            pollers,
            router,
            logger: self.logger,
        }
    }
}

/// A running hub.
pub struct HubHandle {
    shutdown: watch::Sender<bool>,
    pollers: Vec<JoinHandle<()>>,
    router: JoinHandle<()>,
    logger: Logger,
}

impl HubHandle {
    /// Stop every poll timer and release every provider. Returns once all
    /// providers were stopped and the last event was delivered.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        for poller in self.pollers {
            if let Err(e) = poller.await {
                self.logger.error_with("Telemetry poller failed", &e);
            }
        }
        if let Err(e) = self.router.await {
            self.logger.error_with("Telemetry router failed", &e);
        }
        self.logger.info("Telemetry hub stopped");
    }
}

async fn run_router(
    mut router: HubRouter,
    mut events: UnboundedReceiver<(usize, ProviderEvent)>,
    mut subscribers: Vec<UnboundedSender<HubEvent>>,
) {
    while let Some((provider, event)) = events.recv().await {
        for hub_event in router.handle(provider, event) {
            // closed subscribers are dropped
            subscribers.retain(|subscriber| subscriber.send(hub_event.clone()).is_ok());
        }
    }
}

/// Poll one provider at its own cadence.
///
/// A poll still running when the next tick fires is not doubled up: the tick
/// is skipped and the same poll is awaited again on the following one.
async fn run_poller(
    idx: usize,
    name: String,
    provider: SharedProvider,
    interval: Duration,
    events: UnboundedSender<(usize, ProviderEvent)>,
    mut shutdown: watch::Receiver<bool>,
    logger: Logger,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut in_flight: Option<JoinHandle<Vec<ProviderEvent>>> = None;

    loop {
        if *shutdown.borrow() {
            break;
        }
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
            _ = ticker.tick() => {}
        }

        let mut poll = match in_flight.take() {
            Some(poll) => poll,
            None => {
                let provider = provider.clone();
                tokio::task::spawn_blocking(move || match provider.lock() {
                    Ok(mut provider) => provider.poll(),
                    Err(_) => Vec::new(),
                })
            }
        };

        match timeout(interval, &mut poll).await {
            Ok(Ok(polled)) => {
                for event in polled {
                    if events.send((idx, event)).is_err() {
                        logger.debug(format!("{name}: router gone, dropping event"));
                    }
                }
            }
            Ok(Err(e)) => logger.error_with(format!("{name}: poll failed"), &e),
            Err(_) => {
                logger.warn(format!("{name}: poll still running, skipping tick"));
                in_flight = Some(poll);
            }
        }
    }

    if let Some(poll) = in_flight {
        let _ = poll.await;
    }
    let stopped = tokio::task::spawn_blocking(move || {
        if let Ok(mut provider) = provider.lock() {
            provider.stop();
        }
    })
    .await;
    if let Err(e) = stopped {
        logger.error_with(format!("{name}: stop failed"), &e);
    }
    logger.debug(format!("{name}: poller stopped"));
}
