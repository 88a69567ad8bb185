//! Lighting device contract and the zoned implementation.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex as StdMutex,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use itertools::Itertools;
use tokio::{sync::Mutex, task::JoinHandle, task::JoinSet, time::MissedTickBehavior};

use crate::{PitlightError, logging::Logger};

use super::Color;

/// Capabilities the lighting engine needs from an actuator.
///
/// Solid color and flashing are mutually exclusive: `set_color` cancels any
/// running flash, `start_flash` replaces a running flash without the two ever
/// overlapping, and `stop_flash` is idempotent.
#[async_trait]
pub trait LightingDevice: Send + Sync {
    fn name(&self) -> &str;

    fn is_connected(&self) -> bool {
        true
    }

    async fn set_color(&self, color: Color) -> Result<(), PitlightError>;

    async fn start_flash(
        &self,
        primary: Color,
        secondary: Color,
        interval: Duration,
    ) -> Result<(), PitlightError>;

    async fn stop_flash(&self) -> Result<(), PitlightError>;

    /// Remember the current appearance for a later `restore_state`.
    async fn save_state(&self) -> Result<(), PitlightError>;

    /// Reapply what `save_state` remembered. No-op when nothing was saved.
    async fn restore_state(&self) -> Result<(), PitlightError>;
}

/// Addresses the individual zones of a physical device.
#[async_trait]
pub trait ZoneDriver: Send + Sync + 'static {
    async fn set_zone_color(&self, zone: &str, color: Color) -> Result<(), PitlightError>;

    /// Current color of a zone, `None` when the hardware cannot report it.
    async fn zone_color(&self, _zone: &str) -> Result<Option<Color>, PitlightError> {
        Ok(None)
    }

    /// Reload the appearance the device stores on its own.
    async fn reload_profile(&self) -> Result<(), PitlightError> {
        Ok(())
    }

    fn is_connected(&self) -> bool {
        true
    }
}

/// Appearance captured by `save_state`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SavedAppearance {
    Snapshot(Vec<(String, Color)>),
    /// The zones could not be read back; reload the device profile instead.
    ReloadProfile,
}

/// Which half of a flash pair is showing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlashPhase {
    Primary,
    Secondary,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlashState {
    Idle,
    Flashing {
        primary: Color,
        secondary: Color,
        interval: Duration,
        phase: FlashPhase,
    },
}

enum FlashSlot {
    Idle,
    Flashing {
        primary: Color,
        secondary: Color,
        interval: Duration,
        showing_primary: Arc<AtomicBool>,
        task: JoinHandle<()>,
    },
}

/// A device made of independently addressable zones.
///
/// The zone set is fixed at construction. To control other zones, build a
/// new device and swap it into the engine.
pub struct ZonedLightingDevice<D: ZoneDriver> {
    name: String,
    zones: Arc<[String]>,
    driver: Arc<D>,
    flash: Mutex<FlashSlot>,
    saved: Mutex<Option<SavedAppearance>>,
    logger: Logger,
}

impl<D: ZoneDriver> ZonedLightingDevice<D> {
    pub fn new(name: impl Into<String>, zones: Vec<String>, driver: Arc<D>, logger: Logger) -> Self {
        let name = name.into();
        logger.debug(format!("Device {name} controls zones {}", zones.iter().join(", ")));
        Self {
            name,
            zones: zones.into(),
            driver,
            flash: Mutex::new(FlashSlot::Idle),
            saved: Mutex::new(None),
            logger,
        }
    }

    pub fn zones(&self) -> &[String] {
        &self.zones
    }

    pub async fn flash_state(&self) -> FlashState {
        match &*self.flash.lock().await {
            FlashSlot::Idle => FlashState::Idle,
            FlashSlot::Flashing {
                primary,
                secondary,
                interval,
                showing_primary,
                ..
            } => FlashState::Flashing {
                primary: *primary,
                secondary: *secondary,
                interval: *interval,
                phase: if showing_primary.load(Ordering::SeqCst) {
                    FlashPhase::Primary
                } else {
                    FlashPhase::Secondary
                },
            },
        }
    }

    pub async fn saved_appearance(&self) -> Option<SavedAppearance> {
        self.saved.lock().await.clone()
    }

    /// Abort the flash task and wait until it has really ended.
    async fn cancel_flash(slot: &mut FlashSlot) {
        if let FlashSlot::Flashing { task, .. } = std::mem::replace(slot, FlashSlot::Idle) {
            task.abort();
            let _ = task.await;
        }
    }

    async fn paint(&self, color: Color) -> Result<(), PitlightError> {
        paint_zones(&self.driver, &self.zones, color).await
    }
}

/// Send one color to every zone in parallel. All zones are attempted; the
/// first failure is reported.
async fn paint_zones<D: ZoneDriver>(
    driver: &Arc<D>,
    zones: &Arc<[String]>,
    color: Color,
) -> Result<(), PitlightError> {
    paint_each(
        driver,
        zones.iter().map(|zone| (zone.clone(), color)).collect(),
    )
    .await
}

async fn paint_each<D: ZoneDriver>(
    driver: &Arc<D>,
    colors: Vec<(String, Color)>,
) -> Result<(), PitlightError> {
    let mut set = JoinSet::new();
    for (zone, color) in colors {
        let driver = driver.clone();
        set.spawn(async move { driver.set_zone_color(&zone, color).await });
    }

    let mut first_error = None;
    while let Some(joined) = set.join_next().await {
        let result = joined.map_err(|e| PitlightError::ZoneCommandError {
            zone: "unknown".to_string(),
            reason: e.to_string(),
        });
        if let Err(e) = result.and_then(|r| r) {
            first_error.get_or_insert(e);
        }
    }
    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

#[async_trait]
impl<D: ZoneDriver> LightingDevice for ZonedLightingDevice<D> {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_connected(&self) -> bool {
        self.driver.is_connected()
    }

    async fn set_color(&self, color: Color) -> Result<(), PitlightError> {
        let mut flash = self.flash.lock().await;
        Self::cancel_flash(&mut flash).await;
        self.paint(color).await
    }

    async fn start_flash(
        &self,
        primary: Color,
        secondary: Color,
        interval: Duration,
    ) -> Result<(), PitlightError> {
        let mut flash = self.flash.lock().await;
        Self::cancel_flash(&mut flash).await;

        let showing_primary = Arc::new(AtomicBool::new(true));
        let task = {
            let driver = self.driver.clone();
            let zones = self.zones.clone();
            let showing_primary = showing_primary.clone();
            let logger = self.logger.clone();
            let name = self.name.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                let mut primary_phase = true;
                loop {
                    ticker.tick().await;
                    showing_primary.store(primary_phase, Ordering::SeqCst);
                    let color = if primary_phase { primary } else { secondary };
                    if let Err(e) = paint_zones(&driver, &zones, color).await {
                        logger.warn_with(format!("{name}: flash update failed"), &e);
                    }
                    primary_phase = !primary_phase;
                }
            })
        };

        *flash = FlashSlot::Flashing {
            primary,
            secondary,
            interval,
            showing_primary,
            task,
        };
        Ok(())
    }

    async fn stop_flash(&self) -> Result<(), PitlightError> {
        let mut flash = self.flash.lock().await;
        Self::cancel_flash(&mut flash).await;
        Ok(())
    }

    async fn save_state(&self) -> Result<(), PitlightError> {
        let mut snapshot = Vec::with_capacity(self.zones.len());
        for zone in self.zones.iter() {
            match self.driver.zone_color(zone).await? {
                Some(color) => snapshot.push((zone.clone(), color)),
                None => {
                    snapshot.clear();
                    break;
                }
            }
        }

        let appearance = if snapshot.len() == self.zones.len() && !snapshot.is_empty() {
            SavedAppearance::Snapshot(snapshot)
        } else {
            SavedAppearance::ReloadProfile
        };
        self.logger
            .debug(format!("{}: saved appearance {:?}", self.name, appearance));
        *self.saved.lock().await = Some(appearance);
        Ok(())
    }

    async fn restore_state(&self) -> Result<(), PitlightError> {
        let mut flash = self.flash.lock().await;
        Self::cancel_flash(&mut flash).await;

        let Some(appearance) = self.saved.lock().await.take() else {
            self.logger
                .debug(format!("{}: nothing saved to restore", self.name));
            return Ok(());
        };
        match appearance {
            SavedAppearance::Snapshot(colors) => paint_each(&self.driver, colors).await,
            SavedAppearance::ReloadProfile => self.driver.reload_profile().await,
        }
    }
}

/// Zone driver that logs every color change and remembers it.
///
/// Stands in for vendor drivers. Zones it never painted cannot be read back,
/// so the first save falls back to a profile reload.
pub struct LogZoneDriver {
    colors: StdMutex<HashMap<String, Color>>,
    logger: Logger,
}

impl LogZoneDriver {
    pub fn new(logger: Logger) -> Self {
        Self {
            colors: StdMutex::new(HashMap::new()),
            logger,
        }
    }
}

#[async_trait]
impl ZoneDriver for LogZoneDriver {
    async fn set_zone_color(&self, zone: &str, color: Color) -> Result<(), PitlightError> {
        self.logger.debug(format!("{zone} -> {color}"));
        if let Ok(mut colors) = self.colors.lock() {
            colors.insert(zone.to_string(), color);
        }
        Ok(())
    }

    async fn zone_color(&self, zone: &str) -> Result<Option<Color>, PitlightError> {
        Ok(self
            .colors
            .lock()
            .ok()
            .and_then(|colors| colors.get(zone).copied()))
    }

    async fn reload_profile(&self) -> Result<(), PitlightError> {
        self.logger.info("Reloading stored profile");
        if let Ok(mut colors) = self.colors.lock() {
            colors.clear();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::RecordingSink;

    /// Records zone writes; zones listed in `failing` reject every command.
    #[derive(Default)]
    struct RecordingDriver {
        writes: StdMutex<Vec<(String, Color)>>,
        readable: StdMutex<HashMap<String, Color>>,
        failing: Vec<String>,
        reloads: StdMutex<usize>,
    }

    impl RecordingDriver {
        fn writes(&self) -> Vec<(String, Color)> {
            self.writes.lock().unwrap().clone()
        }

        fn clear(&self) {
            self.writes.lock().unwrap().clear();
        }
    }

    #[async_trait]
    impl ZoneDriver for RecordingDriver {
        async fn set_zone_color(&self, zone: &str, color: Color) -> Result<(), PitlightError> {
            self.writes.lock().unwrap().push((zone.to_string(), color));
            if self.failing.iter().any(|z| z == zone) {
                return Err(PitlightError::ZoneCommandError {
                    zone: zone.to_string(),
                    reason: "unplugged".to_string(),
                });
            }
            Ok(())
        }

        async fn zone_color(&self, zone: &str) -> Result<Option<Color>, PitlightError> {
            Ok(self.readable.lock().unwrap().get(zone).copied())
        }

        async fn reload_profile(&self) -> Result<(), PitlightError> {
            *self.reloads.lock().unwrap() += 1;
            Ok(())
        }
    }

    fn device(driver: Arc<RecordingDriver>, zones: &[&str]) -> ZonedLightingDevice<RecordingDriver> {
        ZonedLightingDevice::new(
            "wheel",
            zones.iter().map(|z| z.to_string()).collect(),
            driver,
            Logger::new(RecordingSink::new(), "device"),
        )
    }

    #[tokio::test]
    async fn test_set_color_reaches_every_zone() {
        let driver = Arc::new(RecordingDriver::default());
        let device = device(driver.clone(), &["logo", "button-1", "button-2"]);

        device.set_color(Color::GREEN).await.unwrap();
        let mut writes = driver.writes();
        writes.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(
            writes,
            vec![
                ("button-1".to_string(), Color::GREEN),
                ("button-2".to_string(), Color::GREEN),
                ("logo".to_string(), Color::GREEN),
            ]
        );
    }

    #[tokio::test]
    async fn test_failing_zone_does_not_block_the_others() {
        let driver = Arc::new(RecordingDriver {
            failing: vec!["button-1".to_string()],
            ..Default::default()
        });
        let device = device(driver.clone(), &["logo", "button-1", "button-2"]);

        let result = device.set_color(Color::RED).await;
        assert!(matches!(
            result,
            Err(PitlightError::ZoneCommandError { .. })
        ));
        assert_eq!(driver.writes().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flash_alternates_until_stopped() {
        let driver = Arc::new(RecordingDriver::default());
        let device = device(driver.clone(), &["logo"]);

        device
            .start_flash(Color::YELLOW, Color::OFF, Duration::from_millis(500))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(1100)).await;

        let colors: Vec<Color> = driver.writes().into_iter().map(|(_, c)| c).collect();
        assert_eq!(colors, vec![Color::YELLOW, Color::OFF, Color::YELLOW]);
        assert!(matches!(
            device.flash_state().await,
            FlashState::Flashing {
                phase: FlashPhase::Primary,
                ..
            }
        ));

        device.stop_flash().await.unwrap();
        device.stop_flash().await.unwrap();
        assert_eq!(device.flash_state().await, FlashState::Idle);

        driver.clear();
        tokio::time::sleep(Duration::from_millis(2000)).await;
        assert!(driver.writes().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_flash_replaces_old_one() {
        let driver = Arc::new(RecordingDriver::default());
        let device = device(driver.clone(), &["logo"]);

        device
            .start_flash(Color::YELLOW, Color::OFF, Duration::from_millis(500))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        device
            .start_flash(Color::WHITE, Color::OFF, Duration::from_millis(250))
            .await
            .unwrap();
        driver.clear();
        tokio::time::sleep(Duration::from_millis(1000)).await;

        // only the checkered timer is left
        let colors: Vec<Color> = driver.writes().into_iter().map(|(_, c)| c).collect();
        assert!(!colors.contains(&Color::YELLOW));
        assert!(colors.contains(&Color::WHITE));
        assert!(matches!(
            device.flash_state().await,
            FlashState::Flashing {
                primary: Color::WHITE,
                ..
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_color_cancels_flash() {
        let driver = Arc::new(RecordingDriver::default());
        let device = device(driver.clone(), &["logo"]);

        device
            .start_flash(Color::ORANGE, Color::OFF, Duration::from_millis(500))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        device.set_color(Color::BLUE).await.unwrap();
        driver.clear();
        tokio::time::sleep(Duration::from_millis(1500)).await;

        assert!(driver.writes().is_empty());
        assert_eq!(device.flash_state().await, FlashState::Idle);
    }

    #[tokio::test]
    async fn test_save_and_restore_snapshot() {
        let driver = Arc::new(RecordingDriver::default());
        driver
            .readable
            .lock()
            .unwrap()
            .extend([("logo".to_string(), Color::BLUE), ("rim".to_string(), Color::WHITE)]);
        let device = device(driver.clone(), &["logo", "rim"]);

        device.save_state().await.unwrap();
        assert!(matches!(
            device.saved_appearance().await,
            Some(SavedAppearance::Snapshot(_))
        ));
        device.set_color(Color::RED).await.unwrap();
        driver.clear();

        device.restore_state().await.unwrap();
        let mut writes = driver.writes();
        writes.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(
            writes,
            vec![
                ("logo".to_string(), Color::BLUE),
                ("rim".to_string(), Color::WHITE)
            ]
        );

        // consumed
        driver.clear();
        device.restore_state().await.unwrap();
        assert!(driver.writes().is_empty());
    }

    #[tokio::test]
    async fn test_unreadable_zones_fall_back_to_profile_reload() {
        let driver = Arc::new(RecordingDriver::default());
        driver
            .readable
            .lock()
            .unwrap()
            .insert("logo".to_string(), Color::BLUE);
        let device = device(driver.clone(), &["logo", "rim"]);

        device.save_state().await.unwrap();
        assert_eq!(
            device.saved_appearance().await,
            Some(SavedAppearance::ReloadProfile)
        );
        device.restore_state().await.unwrap();
        assert_eq!(*driver.reloads.lock().unwrap(), 1);
        assert!(driver.writes().is_empty());
    }

    #[tokio::test]
    async fn test_log_zone_driver_remembers_colors() {
        let driver = LogZoneDriver::new(Logger::new(RecordingSink::new(), "zones"));
        assert_eq!(driver.zone_color("logo").await.unwrap(), None);
        driver.set_zone_color("logo", Color::GREEN).await.unwrap();
        assert_eq!(driver.zone_color("logo").await.unwrap(), Some(Color::GREEN));
        driver.reload_profile().await.unwrap();
        assert_eq!(driver.zone_color("logo").await.unwrap(), None);
    }
}
