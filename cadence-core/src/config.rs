//! Session configuration: JSON file, environment overrides, validation.
//!
//! Precedence: built-in defaults < JSON file < `CADENCE_*` environment.
//!
//! | Variable | Field |
//! |----------|-------|
//! | `CADENCE_TARGET_BLOCKS` | `playback.targetBlocks` |
//! | `CADENCE_BLOCK_LEN` | `blockLen` |
//! | `CADENCE_STREAM_RATE` | `streamSampleRate` |
//! | `CADENCE_DEVICE_RATE` | `deviceSampleRate` |

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::control::ControllerConfig;
use crate::engine::PlaybackConfig;
use crate::error::{CadenceError, Result};

/// Top-level configuration for a [`crate::PlaybackSession`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct SessionConfig {
    /// Rate the render engine and device run at (Hz). Replaced by the actual
    /// device rate when a device stream is opened.
    pub device_sample_rate: u32,
    /// Rate of PCM arriving from the network (Hz).
    pub stream_sample_rate: u32,
    /// Samples per render block.
    pub block_len: usize,
    /// Samples per stream-rate conversion call.
    pub convert_chunk: usize,
    /// Undelivered engine events held before the engine starts dropping.
    pub event_channel_capacity: usize,
    pub playback: PlaybackConfig,
    pub controller: ControllerConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            device_sample_rate: 24_000,
            stream_sample_rate: 24_000,
            block_len: 128,
            convert_chunk: 480,
            event_channel_capacity: 4_096,
            playback: PlaybackConfig::default(),
            controller: ControllerConfig::default(),
        }
    }
}

impl SessionConfig {
    /// Read a JSON config file; missing fields take their defaults.
    ///
    /// # Errors
    /// `ConfigNotFound` if the file does not exist, `ConfigParse` on bad JSON.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => CadenceError::ConfigNotFound {
                path: path.to_path_buf(),
            },
            _ => CadenceError::Io(e),
        })?;
        let config = serde_json::from_str(&raw)?;
        debug!(path = %path.display(), "loaded session config");
        Ok(config)
    }

    /// Defaults, then `path` if given, then the environment. Validated.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Apply `CADENCE_*` overrides. Unparseable values are logged and skipped.
    pub fn apply_env(&mut self) {
        if let Some(v) = env_parse::<usize>("CADENCE_TARGET_BLOCKS") {
            self.playback.target_blocks = v;
        }
        if let Some(v) = env_parse::<usize>("CADENCE_BLOCK_LEN") {
            self.block_len = v;
        }
        if let Some(v) = env_parse::<u32>("CADENCE_STREAM_RATE") {
            self.stream_sample_rate = v;
        }
        if let Some(v) = env_parse::<u32>("CADENCE_DEVICE_RATE") {
            self.device_sample_rate = v;
        }
    }

    /// # Errors
    /// Returns `CadenceError::InvalidConfig` naming the first bad field.
    pub fn validate(&self) -> Result<()> {
        if self.block_len == 0 {
            return Err(CadenceError::InvalidConfig("blockLen must be non-zero".into()));
        }
        if self.device_sample_rate == 0 || self.stream_sample_rate == 0 {
            return Err(CadenceError::InvalidConfig(
                "sample rates must be non-zero".into(),
            ));
        }
        if self.convert_chunk == 0 {
            return Err(CadenceError::InvalidConfig(
                "convertChunk must be non-zero".into(),
            ));
        }
        self.playback.validate()?;
        self.controller.validate()
    }

    /// Write the config as pretty JSON, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}

/// Platform default location of `cadence.json`.
pub fn default_config_path() -> PathBuf {
    std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            std::env::var_os("HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".config")
        })
        .join("cadence")
        .join("cadence.json")
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(key, value = %raw, "ignoring unparseable environment override");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("cadence-config-test-{}", std::process::id()))
            .join(name)
    }

    #[test]
    fn defaults_are_valid() {
        assert!(SessionConfig::default().validate().is_ok());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: SessionConfig = serde_json::from_str(
            r#"{"blockLen": 256, "playback": {"targetBlocks": 12}, "controller": {"maxBufferMs": 400}}"#,
        )
        .expect("parse config");
        assert_eq!(config.block_len, 256);
        assert_eq!(config.playback.target_blocks, 12);
        assert_eq!(config.playback.smoothing, 0.9);
        assert_eq!(config.controller.max_buffer_ms, 400.0);
        assert_eq!(config.controller.target_buffer_ms, 120.0);
        assert_eq!(config.stream_sample_rate, 24_000);
    }

    #[test]
    fn zero_block_len_is_rejected() {
        let config = SessionConfig {
            block_len: 0,
            ..SessionConfig::default()
        };
        assert!(matches!(config.validate(), Err(CadenceError::InvalidConfig(_))));
    }

    #[test]
    fn save_then_load_from_file() {
        let path = temp_path("save_then_load.json");
        let mut config = SessionConfig::default();
        config.playback.target_blocks = 40;
        config.save(&path).expect("save config");

        let loaded = SessionConfig::from_file(&path).expect("load config");
        assert_eq!(loaded.playback.target_blocks, 40);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn missing_file_reports_path() {
        let path = temp_path("does-not-exist.json");
        match SessionConfig::from_file(&path) {
            Err(CadenceError::ConfigNotFound { path: p }) => assert_eq!(p, path),
            other => panic!("expected ConfigNotFound, got {other:?}"),
        }
    }
}
