//! Flag-reactive lighting engine.
//!
//! Turns the flag carried by each forwarded sample into device commands.
//! The engine is `Idle` while no flag is shown and `Active(flag)` otherwise.
//! Leaving `Active` needs a `None` reading at least one debounce window after
//! the last non-`None` reading; earlier `None` readings are ignored.

use std::{future::Future, sync::Arc, time::Duration};

use tokio::{sync::Mutex, task::JoinSet};

use crate::{PitlightError, logging::Logger, telemetry::FlagStatus};

use super::{Color, LightingDevice, LightingEffect};

pub const DEFAULT_DEBOUNCE_MS: u64 = 500;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum EngineMode {
    Idle,
    Active {
        flag: FlagStatus,
        last_flag_ms: u64,
    },
}

/// Which devices a fan-out addresses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Reach {
    Connected,
    /// Also devices that report themselves disconnected. Used for the local
    /// flash timer cancel, which needs no device round trip.
    All,
}

#[derive(Debug)]
struct EngineState {
    mode: EngineMode,
    /// A SaveState went out and no RestoreState has consumed it yet.
    saved_pending: bool,
}

pub struct FlagLightingEngine {
    debounce_ms: u64,
    state: Mutex<EngineState>,
    devices: Mutex<Vec<Arc<dyn LightingDevice>>>,
    logger: Logger,
}

impl FlagLightingEngine {
    pub fn new(debounce: Duration, logger: Logger) -> Self {
        Self {
            debounce_ms: debounce.as_millis() as u64,
            state: Mutex::new(EngineState {
                mode: EngineMode::Idle,
                saved_pending: false,
            }),
            devices: Mutex::new(Vec::new()),
            logger,
        }
    }

    pub async fn current_flag(&self) -> FlagStatus {
        match self.state.lock().await.mode {
            EngineMode::Idle => FlagStatus::None,
            EngineMode::Active { flag, .. } => flag,
        }
    }

    pub async fn devices(&self) -> Vec<Arc<dyn LightingDevice>> {
        self.devices.lock().await.clone()
    }

    /// Add a device. A device joining while a flag is shown is saved (when the
    /// others were) and brought to the current effect. A device with the same
    /// name as a registered one replaces it.
    pub async fn register_device(&self, device: Arc<dyn LightingDevice>) {
        if self.replace_device(device.clone()).await.is_some() {
            return;
        }
        let state = self.state.lock().await;
        self.logger
            .info(format!("Registered lighting device {}", device.name()));
        self.devices.lock().await.push(device.clone());
        self.bring_up_to_date(&state, device).await;
    }

    /// Swap in a device with the same name, returning the previous one.
    ///
    /// The previous device stops flashing and gets its saved appearance back.
    /// Returns `None` without registering anything when no device has that name.
    pub async fn replace_device(
        &self,
        device: Arc<dyn LightingDevice>,
    ) -> Option<Arc<dyn LightingDevice>> {
        let state = self.state.lock().await;
        let old = {
            let mut devices = self.devices.lock().await;
            let slot = devices.iter_mut().find(|d| d.name() == device.name())?;
            std::mem::replace(slot, device.clone())
        };
        self.logger
            .info(format!("Replaced lighting device {}", device.name()));
        self.release(&state, old.clone()).await;
        self.bring_up_to_date(&state, device).await;
        Some(old)
    }

    pub async fn remove_device(&self, name: &str) -> Option<Arc<dyn LightingDevice>> {
        let state = self.state.lock().await;
        let old = {
            let mut devices = self.devices.lock().await;
            let idx = devices.iter().position(|d| d.name() == name)?;
            devices.remove(idx)
        };
        self.logger.info(format!("Removed lighting device {name}"));
        self.release(&state, old.clone()).await;
        Some(old)
    }

    async fn release(&self, state: &EngineState, device: Arc<dyn LightingDevice>) {
        if let Err(e) = device.stop_flash().await {
            self.logger
                .warn_with(format!("{}: stop flash failed", device.name()), &e);
        }
        if state.saved_pending {
            if let Err(e) = device.restore_state().await {
                self.logger
                    .warn_with(format!("{}: restore failed", device.name()), &e);
            }
        }
    }

    async fn bring_up_to_date(&self, state: &EngineState, device: Arc<dyn LightingDevice>) {
        let EngineMode::Active { flag, .. } = state.mode else {
            return;
        };
        if !device.is_connected() {
            return;
        }
        if state.saved_pending {
            if let Err(e) = device.save_state().await {
                self.logger
                    .warn_with(format!("{}: save failed", device.name()), &e);
            }
        }
        if let Err(e) = apply_effect(device.clone(), LightingEffect::for_flag(flag)).await {
            self.logger
                .warn_with(format!("{}: applying {flag} failed", device.name()), &e);
        }
    }

    /// Feed one sample's flag into the state machine.
    pub async fn process_sample(&self, flag: FlagStatus, timestamp_ms: u64) {
        let mut state = self.state.lock().await;
        match (state.mode, flag) {
            (EngineMode::Idle, FlagStatus::None) => {}
            (EngineMode::Idle, flag) => {
                self.logger.info(format!("Flag {flag} shown"));
                if !state.saved_pending {
                    self.fan_out("save state", |device| async move {
                        device.save_state().await
                    })
                    .await;
                    state.saved_pending = true;
                }
                self.apply(LightingEffect::for_flag(flag)).await;
                state.mode = EngineMode::Active {
                    flag,
                    last_flag_ms: timestamp_ms,
                };
            }
            (EngineMode::Active { last_flag_ms, .. }, FlagStatus::None) => {
                if timestamp_ms.saturating_sub(last_flag_ms) < self.debounce_ms {
                    return;
                }
                self.logger.info("Flag cleared");
                self.apply(LightingEffect::Off).await;
                state.mode = EngineMode::Idle;
            }
            (EngineMode::Active { flag: current, .. }, flag) => {
                if flag != current {
                    self.logger.info(format!("Flag {current} -> {flag}"));
                    self.apply(LightingEffect::for_flag(flag)).await;
                }
                state.mode = EngineMode::Active {
                    flag,
                    last_flag_ms: timestamp_ms,
                };
            }
        }
    }

    /// Session ended or telemetry lost: stop flashing, give every device its
    /// saved appearance back and forget the last flag.
    pub async fn on_telemetry_disconnected(&self) {
        let mut state = self.state.lock().await;
        self.restore_all().await;
        state.mode = EngineMode::Idle;
        state.saved_pending = false;
    }

    /// Stop every flash timer and restore devices. Errors are logged only.
    pub async fn stop(&self) {
        let mut state = self.state.lock().await;
        self.logger.info("Stopping lighting engine");
        self.restore_all().await;
        state.mode = EngineMode::Idle;
        state.saved_pending = false;
    }

    /// Flash timers are stopped on every device, connected or not. Only the
    /// restore itself needs the device to be reachable.
    async fn restore_all(&self) {
        self.fan_out_to(Reach::All, "restore", |device| async move {
            let stopped = device.stop_flash().await;
            if !device.is_connected() {
                return stopped;
            }
            // restore even when the flash could not be stopped
            let restored = device.restore_state().await;
            stopped.and(restored)
        })
        .await;
    }

    async fn apply(&self, effect: LightingEffect) {
        // going dark must also cancel the flash timers of unreachable devices
        let reach = match effect {
            LightingEffect::Off => Reach::All,
            _ => Reach::Connected,
        };
        self.fan_out_to(reach, "apply effect", move |device| apply_effect(device, effect))
            .await;
    }

    async fn fan_out<F, Fut>(&self, action: &str, command: F)
    where
        F: Fn(Arc<dyn LightingDevice>) -> Fut,
        Fut: Future<Output = Result<(), PitlightError>> + Send + 'static,
    {
        self.fan_out_to(Reach::Connected, action, command).await
    }

    /// Run one command on every device in `reach` at once and wait for all of
    /// them. A failing device is logged and does not hold the others back.
    async fn fan_out_to<F, Fut>(&self, reach: Reach, action: &str, command: F)
    where
        F: Fn(Arc<dyn LightingDevice>) -> Fut,
        Fut: Future<Output = Result<(), PitlightError>> + Send + 'static,
    {
        let devices = self.devices.lock().await.clone();
        let mut set = JoinSet::new();
        for device in devices {
            if reach == Reach::Connected && !device.is_connected() {
                self.logger
                    .debug(format!("{}: not connected, skipping {action}", device.name()));
                continue;
            }
            let name = device.name().to_string();
            let fut = command(device);
            set.spawn(async move { (name, fut.await) });
        }

        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((_, Ok(()))) => {}
                Ok((name, Err(e))) => self.logger.warn_with(format!("{name}: {action} failed"), &e),
                Err(e) => self.logger.error_with(format!("Device task for {action} failed"), &e),
            }
        }
    }
}

async fn apply_effect(
    device: Arc<dyn LightingDevice>,
    effect: LightingEffect,
) -> Result<(), PitlightError> {
    match effect {
        LightingEffect::Solid(color) => device.set_color(color).await,
        LightingEffect::Flash {
            primary,
            secondary,
            interval,
        } => device.start_flash(primary, secondary, interval).await,
        LightingEffect::Off => {
            device.stop_flash().await?;
            if !device.is_connected() {
                return Ok(());
            }
            device.set_color(Color::OFF).await
        }
    }
}
