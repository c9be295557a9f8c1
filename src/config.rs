// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Render orchestration configuration

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default config file looked up in the working directory
pub const CONFIG_FILE: &str = "render.toml";

const GIB: u64 = 1024 * 1024 * 1024;

fn serialize_duration<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_f64(duration.as_secs_f64())
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let secs = f64::deserialize(deserializer)?;
    Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
}

/// Orchestration configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Directory holding the engine artifacts, manifest, fonts and libraries
    pub asset_dir: PathBuf,
    /// OpenSCAD executable path (auto-detected when unset)
    pub engine_path: Option<String>,
    /// Timeout applied when a request does not carry its own
    #[serde(serialize_with = "serialize_duration", deserialize_with = "deserialize_duration")]
    pub default_timeout: Duration,
    /// Fixed reference for memory percentages
    pub memory_limit_bytes: u64,
    /// Percentage of the limit above which a memory warning is emitted
    pub memory_warning_percent: f64,
    /// Hash artifacts listed in the manifest, not just compare sizes
    pub verify_checksums: bool,
    /// Kill a still-running engine process when its job times out
    pub kill_on_timeout: bool,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            asset_dir: PathBuf::from("assets"),
            engine_path: None, // Auto-detect
            default_timeout: Duration::from_secs(60),
            memory_limit_bytes: 2 * GIB,
            memory_warning_percent: 75.0,
            verify_checksums: false,
            kill_on_timeout: true,
        }
    }
}

impl RenderConfig {
    /// Load configuration from file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;
        let config: RenderConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path.as_ref()))?;
        Ok(config)
    }

    /// Load configuration with environment variable overrides
    pub fn load() -> Result<Self> {
        let mut config = if PathBuf::from(CONFIG_FILE).exists() {
            Self::from_file(CONFIG_FILE)?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply `POLYFRAME_*` / `OPENSCAD_PATH` overrides from the environment
    pub fn apply_env_overrides(&mut self) {
        if let Ok(asset_dir) = std::env::var("POLYFRAME_ASSET_DIR") {
            self.asset_dir = PathBuf::from(asset_dir);
        }

        if let Ok(openscad) = std::env::var("OPENSCAD_PATH") {
            self.engine_path = Some(openscad);
        }

        if let Ok(timeout) = std::env::var("POLYFRAME_TIMEOUT_MS") {
            if let Ok(ms) = timeout.parse::<u64>() {
                self.default_timeout = Duration::from_millis(ms);
            }
        }

        if let Ok(limit) = std::env::var("POLYFRAME_MEMORY_LIMIT") {
            if let Ok(bytes) = limit.parse::<u64>() {
                self.memory_limit_bytes = bytes;
            }
        }

        if let Ok(verify) = std::env::var("POLYFRAME_VERIFY_CHECKSUMS") {
            self.verify_checksums = verify.parse().unwrap_or(false);
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path.as_ref(), content)
            .with_context(|| format!("Failed to write config file: {:?}", path.as_ref()))?;
        Ok(())
    }

    /// Same configuration pointed at another asset directory
    pub fn with_asset_dir(&self, asset_dir: impl Into<PathBuf>) -> Self {
        Self {
            asset_dir: asset_dir.into(),
            ..self.clone()
        }
    }

    /// Timeout for a job, preferring the request's own value
    pub fn timeout_for(&self, requested_ms: Option<u64>) -> Duration {
        match requested_ms {
            Some(ms) if ms > 0 => Duration::from_millis(ms),
            _ => self.default_timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_config_roundtrip_through_toml() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join(CONFIG_FILE);

        let mut config = RenderConfig::default();
        config.default_timeout = Duration::from_millis(1500);
        config.verify_checksums = true;
        config.save(&path)?;

        let loaded = RenderConfig::from_file(&path)?;
        assert_eq!(loaded.default_timeout, Duration::from_millis(1500));
        assert!(loaded.verify_checksums);
        assert_eq!(loaded.memory_limit_bytes, 2 * GIB);
        Ok(())
    }

    #[test]
    fn test_partial_file_keeps_defaults() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, "asset_dir = \"/opt/openscad\"\n")?;

        let loaded = RenderConfig::from_file(&path)?;
        assert_eq!(loaded.asset_dir, PathBuf::from("/opt/openscad"));
        assert!(loaded.kill_on_timeout);
        assert_eq!(loaded.default_timeout, Duration::from_secs(60));
        Ok(())
    }

    #[test]
    fn test_invalid_timeout_is_an_error() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join(CONFIG_FILE);

        for value in ["-5.0", "nan", "inf"] {
            std::fs::write(&path, format!("default_timeout = {}\n", value))?;
            assert!(RenderConfig::from_file(&path).is_err(), "accepted {}", value);
        }
        Ok(())
    }

    #[test]
    fn test_timeout_for_prefers_request() {
        let config = RenderConfig::default();
        assert_eq!(config.timeout_for(Some(250)), Duration::from_millis(250));
        assert_eq!(config.timeout_for(Some(0)), config.default_timeout);
        assert_eq!(config.timeout_for(None), config.default_timeout);
    }
}
