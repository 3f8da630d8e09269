//! Engine Configuration
//!
//! Every suspending call into an external system gets a timeout so a session
//! can never sit in "processing" forever.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {}: {1}", .0.display())]
    Io(PathBuf, #[source] std::io::Error),

    #[error("Invalid config {}: {1}", .0.display())]
    Parse(PathBuf, #[source] serde_json::Error),

    #[error("Invalid config value: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowConfig {
    #[serde(default = "default_camera_timeout_ms")]
    pub camera_timeout_ms: u64,
    #[serde(default = "default_background_removal_timeout_ms")]
    pub background_removal_timeout_ms: u64,
    #[serde(default = "default_encoder_timeout_ms")]
    pub encoder_timeout_ms: u64,
    #[serde(default = "default_directory_timeout_ms")]
    pub directory_timeout_ms: u64,
    #[serde(default = "default_validity_years")]
    pub badge_validity_years: u32,
    #[serde(default = "default_export_dir")]
    pub export_dir: PathBuf,
    #[serde(default)]
    pub stream: StreamConfig,
}

fn default_camera_timeout_ms() -> u64 { 10_000 }
fn default_background_removal_timeout_ms() -> u64 { 30_000 }
fn default_encoder_timeout_ms() -> u64 { 15_000 }
fn default_directory_timeout_ms() -> u64 { 10_000 }
fn default_validity_years() -> u32 { 4 }
fn default_export_dir() -> PathBuf { PathBuf::from("exports") }

/// Requested capture resolution
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct StreamConfig {
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
}

fn default_width() -> u32 { 640 }
fn default_height() -> u32 { 480 }

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
        }
    }
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            camera_timeout_ms: default_camera_timeout_ms(),
            background_removal_timeout_ms: default_background_removal_timeout_ms(),
            encoder_timeout_ms: default_encoder_timeout_ms(),
            directory_timeout_ms: default_directory_timeout_ms(),
            badge_validity_years: default_validity_years(),
            export_dir: default_export_dir(),
            stream: StreamConfig::default(),
        }
    }
}

impl WorkflowConfig {
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|e| ConfigError::Parse(path.to_path_buf(), e))?;
        config.check()?;
        Ok(config)
    }

    /// Zero timeouts would fail every call immediately.
    pub fn check(&self) -> Result<(), ConfigError> {
        let timeouts = [
            ("cameraTimeoutMs", self.camera_timeout_ms),
            ("backgroundRemovalTimeoutMs", self.background_removal_timeout_ms),
            ("encoderTimeoutMs", self.encoder_timeout_ms),
            ("directoryTimeoutMs", self.directory_timeout_ms),
        ];
        for (name, value) in timeouts {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{} must be greater than zero", name)));
            }
        }
        if self.stream.width == 0 || self.stream.height == 0 {
            return Err(ConfigError::Invalid("stream size must be non-zero".into()));
        }
        Ok(())
    }

    pub fn camera_timeout(&self) -> Duration {
        Duration::from_millis(self.camera_timeout_ms)
    }

    pub fn background_removal_timeout(&self) -> Duration {
        Duration::from_millis(self.background_removal_timeout_ms)
    }

    pub fn encoder_timeout(&self) -> Duration {
        Duration::from_millis(self.encoder_timeout_ms)
    }

    pub fn directory_timeout(&self) -> Duration {
        Duration::from_millis(self.directory_timeout_ms)
    }
}
