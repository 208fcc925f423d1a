/*!
Configuration management for the detector control application.
*/

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;
use xpad::{protocol, AcqMode, OutSignal, SessionOptions, SocketOptions};

use crate::writer::ImageFormat;

/// Main application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub defaults: DefaultsConfig,
    pub polling: PollingConfig,
}

impl AppConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self {
            server: ServerConfig::default(),
            storage: StorageConfig::default(),
            defaults: DefaultsConfig::default(),
            polling: PollingConfig::default(),
        }
    }

    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: AppConfig =
            toml::from_str(&content).with_context(|| "Failed to parse config file as TOML")?;

        Ok(config)
    }

    /// Load the file if it exists, defaults otherwise
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::load_from_file(path)
        } else {
            warn!(
                "Config file {} not found, using defaults",
                path.as_ref().display()
            );
            Ok(Self::new())
        }
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content =
            toml::to_string_pretty(self).with_context(|| "Failed to serialize config to TOML")?;

        std::fs::write(path.as_ref(), content)
            .with_context(|| format!("Failed to write config file: {}", path.as_ref().display()))?;

        Ok(())
    }

    /// `host:port` of the detector server
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            socket: SocketOptions {
                recv_buffer_size: self.server.recv_buffer_size,
                nodelay: self.server.nodelay,
            },
            ..SessionOptions::default()
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Detector server connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server host name or address
    pub host: String,

    /// Server port, shared by the command and status connections
    pub port: u16,

    /// Kernel receive buffer size in bytes
    pub recv_buffer_size: Option<usize>,

    /// Disable Nagle's algorithm
    pub nodelay: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "192.168.0.15".to_string(),
            port: protocol::DEFAULT_PORT,
            recv_buffer_size: Some(1024 * 1024),
            nodelay: true,
        }
    }
}

/// Where images and calibrations are written
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub images_dir: PathBuf,
    pub calibration_dir: PathBuf,
    pub image_format: ImageFormat,

    /// Put each exposure in its own timestamped subdirectory
    pub timestamped_sessions: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            images_dir: PathBuf::from("Images"),
            calibration_dir: PathBuf::from("Calib"),
            image_format: ImageFormat::Dat,
            timestamped_sessions: false,
        }
    }
}

/// Acquisition settings applied right after `Init`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DefaultsConfig {
    pub geometrical_correction: bool,
    pub flat_field_correction: bool,
    pub output_signal: OutSignal,
    pub acquisition_mode: AcqMode,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            geometrical_correction: false,
            flat_field_correction: false,
            output_signal: OutSignal::ExposureBusy,
            acquisition_mode: AcqMode::Standard,
        }
    }
}

/// Status polling during asynchronous exposures
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    /// Interval between status polls while the detector is busy
    pub interval_ms: u64,

    /// Interval while waiting for the exposure to start
    pub start_interval_ms: u64,
}

impl PollingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn start_interval(&self) -> Duration {
        Duration::from_millis(self.start_interval_ms)
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_ms: 1000,
            start_interval_ms: 100,
        }
    }
}
