//! Application configuration
//!
//! Loaded from TOML. Every section falls back to its defaults, so an empty
//! file is a valid config. A `[client.stream]` table, when present, must be
//! complete since it is sent verbatim as the session's stream config.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::constants::{
    ACTIVITY_LOG_CAPACITY, DEFAULT_CAPTURE_BLOCK_FRAMES, DEFAULT_WS_PORT, MAX_GAIN,
};
use crate::error::{Error, Result};
use crate::protocol::StreamConfig;
use crate::session::{ActivityLog, SessionOptions};

const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub client: ClientConfig,
    pub receiver: ReceiverConfig,
    pub meter: MeterConfig,
}

/// Sender side settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    /// Initial gain; later changes stay in memory
    pub gain: f32,
    /// Remote output device to pre-select
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<u32>,
    /// Local input device name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_device: Option<String>,
    pub capture_block_frames: u32,
    pub stream: StreamConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_WS_PORT,
            gain: 1.0,
            device: None,
            input_device: None,
            capture_block_frames: DEFAULT_CAPTURE_BLOCK_FRAMES,
            stream: StreamConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceiverConfig {
    pub bind_address: String,
    pub port: u16,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: DEFAULT_WS_PORT,
        }
    }
}

/// Level meter display
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeterConfig {
    pub enabled: bool,
    pub refresh_hz: u32,
}

impl Default for MeterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            refresh_hz: 60,
        }
    }
}

impl AppConfig {
    /// Default config file location for this platform
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "mic-bridge")
            .map(|dirs| dirs.config_dir().join(CONFIG_FILE))
    }

    /// Parse and validate a config file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        tracing::info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Load from `path` when given, else the platform config file if it
    /// exists, else defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load(path);
        }

        match Self::default_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => {
                tracing::debug!("No config file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Write the config as TOML, creating parent directories
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let content = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        fs::write(path, content)?;
        tracing::info!("Saved configuration to {}", path.display());
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let stream = &self.client.stream;

        if !(1..=2).contains(&stream.channel_count) {
            return Err(Error::Config(format!(
                "client.stream.channels must be 1 or 2, got {}",
                stream.channel_count
            )));
        }
        if stream.sample_rate_hz == 0 {
            return Err(Error::Config("client.stream.sampleRate must be positive".to_string()));
        }
        if stream.server_buffer_frames == 0 {
            return Err(Error::Config(
                "client.stream.framesPerBuffer must be positive".to_string(),
            ));
        }
        if self.client.capture_block_frames == 0 {
            return Err(Error::Config(
                "client.capture_block_frames must be positive".to_string(),
            ));
        }
        if !(0.0..=MAX_GAIN).contains(&self.client.gain) {
            return Err(Error::Config(format!(
                "client.gain must be within [0, {}], got {}",
                MAX_GAIN, self.client.gain
            )));
        }
        if self.meter.refresh_hz == 0 {
            return Err(Error::Config("meter.refresh_hz must be positive".to_string()));
        }
        Ok(())
    }
}

impl ClientConfig {
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            capture_block_frames: self.capture_block_frames,
            input_device: self.input_device.clone(),
            preferred_device: self.device,
            initial_gain: self.gain,
            log: ActivityLog::new(ACTIVITY_LOG_CAPACITY),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::SampleFormat;

    #[test]
    fn test_empty_file_is_defaults() {
        let config: AppConfig = toml::from_str("").unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.client.port, 8765);
        assert_eq!(config.client.stream.sample_rate_hz, 48000);
        assert_eq!(config.client.stream.sample_format, SampleFormat::Int16);
        assert_eq!(config.client.stream.server_buffer_frames, 128);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_full_config() {
        let config: AppConfig = toml::from_str(
            r#"
            [client]
            host = "192.168.1.20"
            port = 9000
            gain = 1.5
            device = 2
            input_device = "USB Mic"

            [client.stream]
            sampleRate = 44100
            channels = 2
            sampleWidthBytes = 4
            framesPerBuffer = 256

            [receiver]
            port = 9000

            [meter]
            enabled = false
            "#,
        )
        .unwrap();

        assert_eq!(config.client.host, "192.168.1.20");
        assert_eq!(config.client.device, Some(2));
        assert_eq!(config.client.stream.channel_count, 2);
        assert_eq!(config.client.stream.sample_format, SampleFormat::Float32);
        assert_eq!(config.receiver.bind_address, "0.0.0.0");
        assert!(!config.meter.enabled);
        assert_eq!(config.meter.refresh_hz, 60);

        let options = config.client.session_options();
        assert_eq!(options.preferred_device, Some(2));
        assert_eq!(options.input_device.as_deref(), Some("USB Mic"));
        assert_eq!(options.initial_gain, 1.5);
    }

    #[test]
    fn test_rejects_bad_sample_width() {
        let parsed: std::result::Result<AppConfig, _> = toml::from_str(
            r#"
            [client.stream]
            sampleRate = 48000
            channels = 1
            sampleWidthBytes = 3
            framesPerBuffer = 128
            "#,
        );
        assert!(parsed.is_err());
    }

    #[test]
    fn test_validate() {
        let mut config = AppConfig::default();
        config.client.stream.channel_count = 3;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.client.gain = 3.5;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.meter.refresh_hz = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.client.stream.server_buffer_frames = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_then_load() {
        let dir = std::env::temp_dir().join(format!("mic-bridge-{}", uuid::Uuid::new_v4()));
        let path = dir.join(CONFIG_FILE);

        let mut config = AppConfig::default();
        config.client.host = "10.1.2.3".to_string();
        config.client.device = Some(4);
        config.save(&path).unwrap();

        let loaded = AppConfig::load(&path).unwrap();
        assert_eq!(loaded, config);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_missing_explicit_path_is_error() {
        let path = std::env::temp_dir().join("mic-bridge-does-not-exist.toml");
        assert!(AppConfig::load_or_default(Some(&path)).is_err());
    }
}
