//! Application configuration
//!
//! Loaded from `voice.toml` in the platform config directory. Every field
//! has a default, so a partial file (or none at all) is valid.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::constants::*;
use crate::error::{Error, Result};

/// Environment variable consulted when the file has no API key
pub const API_KEY_ENV: &str = "DUPLEX_VOICE_API_KEY";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub audio: AudioConfig,
    pub playback: PlaybackConfig,
    pub transport: TransportConfig,
}

/// Capture settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Input device name; default device when unset
    pub input_device: Option<String>,
    /// Output device name; default device when unset
    pub output_device: Option<String>,
    /// Rate of the frames sent to the model
    pub capture_sample_rate: u32,
    /// Samples per capture block
    pub block_size: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            input_device: None,
            output_device: None,
            capture_sample_rate: CAPTURE_SAMPLE_RATE,
            block_size: CAPTURE_BLOCK_SIZE,
        }
    }
}

/// Playback settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Rate assumed for model audio without a declared rate
    pub sample_rate: u32,
    /// Safety margin before the first item after idle
    pub lead_in_ms: u32,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            sample_rate: PLAYBACK_SAMPLE_RATE,
            lead_in_ms: DEFAULT_LEAD_IN_MS,
        }
    }
}

impl PlaybackConfig {
    pub fn lead_in(&self) -> Duration {
        Duration::from_millis(self.lead_in_ms as u64)
    }
}

/// Realtime backend settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// WebSocket endpoint
    pub endpoint: String,
    /// Model announced in the setup message
    pub model: String,
    /// Appended to the endpoint as the `key` query parameter
    pub api_key: Option<String>,
    pub system_instruction: Option<String>,
    pub connect_timeout_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            model: DEFAULT_MODEL.to_string(),
            api_key: None,
            system_instruction: None,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
        }
    }
}

impl TransportConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl AppConfig {
    /// Path of the config file, if the platform has a config directory
    pub fn config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "duplex-voice")
            .map(|dirs| dirs.config_dir().join("voice.toml"))
    }

    /// Load from the config file, falling back to defaults when absent
    pub fn load() -> Result<Self> {
        let mut config = match Self::config_path() {
            Some(path) if path.exists() => {
                tracing::info!("Loading config from {}", path.display());
                let text = std::fs::read_to_string(&path)?;
                Self::from_toml_str(&text)?
            }
            _ => {
                tracing::debug!("No config file, using defaults");
                Self::default()
            }
        };

        if config.transport.api_key.is_none() {
            config.transport.api_key = std::env::var(API_KEY_ENV).ok().filter(|k| !k.is_empty());
        }
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }

    fn validate(&self) -> Result<()> {
        if self.audio.capture_sample_rate == 0 || self.playback.sample_rate == 0 {
            return Err(Error::Config("sample rates must be non-zero".to_string()));
        }
        if self.audio.block_size == 0 {
            return Err(Error::Config("block_size must be non-zero".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.audio.capture_sample_rate, 16_000);
        assert_eq!(config.audio.block_size, 512);
        assert_eq!(config.playback.sample_rate, 24_000);
        assert_eq!(config.playback.lead_in(), Duration::from_millis(50));
        assert_eq!(config.transport.connect_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_partial_file() {
        let config = AppConfig::from_toml_str(
            r#"
            [playback]
            lead_in_ms = 80

            [transport]
            endpoint = "wss://example.invalid/live"
            "#,
        )
        .unwrap();

        assert_eq!(config.playback.lead_in_ms, 80);
        assert_eq!(config.playback.sample_rate, 24_000);
        assert_eq!(config.transport.endpoint, "wss://example.invalid/live");
        assert_eq!(config.audio.block_size, 512);
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(
            AppConfig::from_toml_str("[audio]\nblock_size = 0"),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            AppConfig::from_toml_str("[audio]\nblock_size = \"big\""),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_toml_roundtrip() {
        let mut config = AppConfig::default();
        config.audio.input_device = Some("USB Mic".to_string());
        let text = config.to_toml_string().unwrap();
        let restored = AppConfig::from_toml_str(&text).unwrap();
        assert_eq!(restored.audio.input_device.as_deref(), Some("USB Mic"));
    }
}
