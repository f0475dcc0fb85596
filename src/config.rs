//! Ambient daemon configuration: where presets/autoload/symbol table
//! live, how hard to retry a grab, and where logs go (SPEC_FULL.md §4.L
//! "Configuration"). Distinct from a *preset* (`mapping::Preset`) —
//! this is process-wide daemon config, not per-device mappings.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::injector::InjectorConfig;

fn default_config_dir() -> PathBuf {
    PathBuf::from("/etc/input-remapper-2")
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("/var/log/input-remapper")
}

fn default_grab_retry_attempts() -> usize {
    10
}

fn default_grab_retry_interval_ms() -> u64 {
    200
}

/// Top-level daemon configuration, loaded from `Config.toml` next to
/// the binary (or wherever `--config` points).
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct AppConfig {
    /// Where presets, `autoload.json`, and the symbol table snapshot
    /// live. Also where `control.sock` is bound.
    #[serde(default = "default_config_dir")]
    pub config_dir: PathBuf,

    /// Directory for the rolling daemon log file (written via
    /// `tracing-appender`).
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,

    /// How many times to retry grabbing a busy device before giving up
    /// (spec.md §4.I).
    #[serde(default = "default_grab_retry_attempts")]
    pub grab_retry_attempts: usize,

    /// Delay between grab attempts, in milliseconds.
    #[serde(default = "default_grab_retry_interval_ms")]
    pub grab_retry_interval_ms: u64,

    /// Whether to autoload every configured group at startup.
    #[serde(default)]
    pub autoload_on_start: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            config_dir: default_config_dir(),
            log_dir: default_log_dir(),
            grab_retry_attempts: default_grab_retry_attempts(),
            grab_retry_interval_ms: default_grab_retry_interval_ms(),
            autoload_on_start: false,
        }
    }
}

impl AppConfig {
    /// Loads configuration from file, writing a default one out if it
    /// doesn't exist yet.
    pub fn load_or_create<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        if !path.as_ref().exists() {
            let default_config = Self::default();
            default_config.save_to_file(&path)?;
            return Ok(default_config);
        }
        Self::load_from_file(path)
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let serialized = toml::to_string_pretty(self)?;
        fs::write(path, serialized)?;
        Ok(())
    }

    pub fn socket_path(&self) -> PathBuf {
        self.config_dir.join("control.sock")
    }

    pub fn injector_config(&self) -> InjectorConfig {
        InjectorConfig {
            grab_retry_attempts: self.grab_retry_attempts,
            grab_retry_interval: Duration::from_millis(self.grab_retry_interval_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_or_create_writes_defaults_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Config.toml");
        let config = AppConfig::load_or_create(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn load_or_create_reads_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Config.toml");
        let mut config = AppConfig::default();
        config.grab_retry_attempts = 3;
        config.save_to_file(&path).unwrap();

        let loaded = AppConfig::load_or_create(&path).unwrap();
        assert_eq!(loaded.grab_retry_attempts, 3);
    }

    #[test]
    fn injector_config_reflects_configured_retry_tuning() {
        let mut config = AppConfig::default();
        config.grab_retry_attempts = 5;
        config.grab_retry_interval_ms = 50;
        let injector_config = config.injector_config();
        assert_eq!(injector_config.grab_retry_attempts, 5);
        assert_eq!(injector_config.grab_retry_interval, Duration::from_millis(50));
    }

    #[test]
    fn socket_path_is_nested_under_config_dir() {
        let mut config = AppConfig::default();
        config.config_dir = PathBuf::from("/tmp/imr");
        assert_eq!(config.socket_path(), PathBuf::from("/tmp/imr/control.sock"));
    }
}
