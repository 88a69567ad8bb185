use std::{
    collections::HashSet,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::{
    PitlightError,
    lighting::engine::DEFAULT_DEBOUNCE_MS,
    telemetry::{
        producer::{DEFAULT_POLL_INTERVAL_MS, IRACING_SOURCE, ReaderSettings},
        segment::{DEFAULT_SEGMENT_NAME, MappedFileOpener, SegmentOpener},
    },
};

const CONFIG_DIR_NAME: &str = "pitlight";
const CONFIG_FILE_NAME: &str = "config.json";
const DEFAULT_EXECUTABLE: &str = "iRacingSim64DX11.exe";

/// Where the reader finds the telemetry segment.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "kind")]
pub enum SegmentSource {
    /// OS named file mapping (Windows only).
    Named { name: String },
    /// A file holding a segment image, mapped read-only.
    File { path: PathBuf },
}

impl Default for SegmentSource {
    fn default() -> Self {
        if cfg!(windows) {
            Self::Named {
                name: DEFAULT_SEGMENT_NAME.to_string(),
            }
        } else {
            Self::File {
                path: PathBuf::from("/dev/shm").join("IRSDKMemMapFileName"),
            }
        }
    }
}

impl SegmentSource {
    pub fn opener(&self) -> Result<Box<dyn SegmentOpener>, PitlightError> {
        match self {
            Self::File { path } => Ok(Box::new(MappedFileOpener::new(path.clone()))),
            #[cfg(windows)]
            Self::Named { name } => Ok(Box::new(
                crate::telemetry::segment::NamedSegmentOpener::new(name.clone()),
            )),
            #[cfg(not(windows))]
            Self::Named { name } => Err(PitlightError::InvalidConfig {
                reason: format!("named segment {name} is only available on Windows"),
            }),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct SimulatorConfig {
    /// Segment opens are attempted only while this executable runs. `None`
    /// skips the check.
    pub executable: Option<String>,
    pub segment: SegmentSource,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            executable: cfg!(windows).then(|| DEFAULT_EXECUTABLE.to_string()),
            segment: SegmentSource::default(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DeviceConfig {
    pub name: String,
    pub zones: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct AppConfig {
    pub poll_interval_ms: u64,
    pub debounce_ms: u64,
    pub simulator: SimulatorConfig,
    pub devices: Vec<DeviceConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            simulator: SimulatorConfig::default(),
            devices: vec![DeviceConfig {
                name: "wheel".to_string(),
                zones: vec!["logo".to_string()],
            }],
        }
    }
}

impl AppConfig {
    pub fn local_path() -> Result<PathBuf, PitlightError> {
        Ok(dirs::config_dir()
            .ok_or(PitlightError::NoConfigDir)?
            .join(CONFIG_DIR_NAME)
            .join(CONFIG_FILE_NAME))
    }

    /// Load `config.json` from the user's config directory. `Ok(None)` when
    /// there is none yet.
    pub fn from_local_file() -> Result<Option<Self>, PitlightError> {
        Self::from_path(&Self::local_path()?)
    }

    pub fn from_path(path: &Path) -> Result<Option<Self>, PitlightError> {
        if !path.exists() {
            return Ok(None);
        }
        let file =
            std::fs::File::open(path).map_err(|e| PitlightError::ConfigIOError { source: e })?;
        let config: Self = serde_json::from_reader(file)
            .map_err(|e| PitlightError::ConfigSerializeError { source: e })?;
        config.validate()?;
        Ok(Some(config))
    }

    pub fn save(&self) -> Result<(), PitlightError> {
        self.save_to(&Self::local_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), PitlightError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| PitlightError::ConfigIOError { source: e })?;
        }

        let file =
            std::fs::File::create(path).map_err(|e| PitlightError::ConfigIOError { source: e })?;
        serde_json::to_writer_pretty(file, self)
            .map_err(|e| PitlightError::ConfigSerializeError { source: e })
    }

    pub fn validate(&self) -> Result<(), PitlightError> {
        let invalid = |reason: String| Err(PitlightError::InvalidConfig { reason });

        if self.poll_interval_ms == 0 {
            return invalid("poll_interval_ms must be greater than zero".to_string());
        }

        let mut names = HashSet::new();
        for device in &self.devices {
            if !names.insert(device.name.as_str()) {
                return invalid(format!("device {} is listed twice", device.name));
            }
            if device.zones.is_empty() {
                return invalid(format!("device {} has no zones", device.name));
            }
            let mut zones = HashSet::new();
            if let Some(zone) = device.zones.iter().find(|z| !zones.insert(z.as_str())) {
                return invalid(format!("device {} lists zone {zone} twice", device.name));
            }
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn reader_settings(&self) -> ReaderSettings {
        ReaderSettings {
            source: IRACING_SOURCE.to_string(),
            executable: self.simulator.executable.clone(),
            poll_interval: self.poll_interval(),
        }
    }
}
