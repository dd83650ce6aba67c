//! Application configuration
//!
//! Layered: built-in defaults, then `drowsiness-monitor.toml` if present,
//! then `DROWSY_*` environment variables (`__` separates sections, e.g.
//! `DROWSY_SERVER__ADDR`, `DROWSY_DMS__HYSTERESIS_THRESHOLD`).

use std::path::Path;

use config::{Config, ConfigError, Environment, File};
use dms::DmsConfig;
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIG_FILE: &str = "drowsiness-monitor.toml";
const ENV_PREFIX: &str = "DROWSY";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub capture: CaptureConfig,
    pub dms: DmsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address
    pub addr: String,
    /// Default log filter when `RUST_LOG` is unset
    pub log_level: String,
    /// Emit JSON log lines instead of plain text
    pub json_logs: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:8080".to_string(),
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

/// Where frames come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Image files under `capture.directory`
    #[default]
    Directory,
    /// Local camera (needs the `webcam` feature)
    Webcam,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub source: SourceKind,
    /// Root of the per-camera frame directories
    pub directory: String,
    /// Requested webcam resolution and rate
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            source: SourceKind::Directory,
            directory: "./frames".to_string(),
            width: 640,
            height: 480,
            fps: 30,
        }
    }
}

impl AppConfig {
    /// Load from the default file and the process environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(Some(Path::new(DEFAULT_CONFIG_FILE)))
    }

    /// Load from `path` (skipped when missing) and the process environment
    pub fn load_from(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::build(path, environment())
    }

    fn build(path: Option<&Path>, env: Environment) -> Result<Self, ConfigError> {
        let mut builder = Config::builder().add_source(Config::try_from(&AppConfig::default())?);
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(false));
        }
        builder.add_source(env).build()?.try_deserialize()
    }
}

fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}
