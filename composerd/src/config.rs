//! composerd configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::engine::StartupParams;
use crate::session::SessionConfig;

/// Main composerd configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[serde(rename = "log-level")]
    pub log_level: Option<String>,

    /// Engine startup parameters
    pub engine: EngineConfig,

    /// Session tuning
    pub session: SessionConfig,
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .composerd.yml
        let local_config = PathBuf::from(".composerd.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/composerd/composerd.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("composerd").join("composerd.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        // No config file found, use defaults
        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Read only the log level, before logging is set up
    ///
    /// Errors are swallowed; the full load reports them later.
    pub fn load_log_level(config_path: Option<&PathBuf>) -> Option<String> {
        let candidates: Vec<PathBuf> = match config_path {
            Some(path) => vec![path.clone()],
            None => {
                let mut paths = vec![PathBuf::from(".composerd.yml")];
                if let Some(config_dir) = dirs::config_dir() {
                    paths.push(config_dir.join("composerd").join("composerd.yml"));
                }
                paths
            }
        };

        candidates
            .iter()
            .filter(|path| path.exists())
            .find_map(|path| Self::load_from_file(path).ok())
            .and_then(|config| config.log_level)
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// Where the engine finds its resources
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Read-only shared data (schemas, dictionaries)
    #[serde(rename = "shared-dir")]
    pub shared_dir: PathBuf,

    /// Writable user data
    #[serde(rename = "user-dir")]
    pub user_dir: PathBuf,

    /// Version tag passed to the engine
    #[serde(rename = "version-tag")]
    pub version_tag: String,

    /// Verify compiled artifacts at startup
    #[serde(rename = "full-check")]
    pub full_check: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("composerd");
        Self {
            shared_dir: data_dir.join("shared"),
            user_dir: data_dir.join("user"),
            version_tag: env!("CARGO_PKG_VERSION").to_string(),
            full_check: false,
        }
    }
}

impl EngineConfig {
    pub fn to_startup_params(&self) -> StartupParams {
        StartupParams {
            shared_dir: self.shared_dir.clone(),
            user_dir: self.user_dir.clone(),
            version_tag: self.version_tag.clone(),
            full_check: self.full_check,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.log_level.is_none());
        assert!(!config.engine.full_check);
        assert_eq!(config.engine.version_tag, env!("CARGO_PKG_VERSION"));
        assert_eq!(config.session, SessionConfig::default());
    }

    #[test]
    fn test_load_explicit_file() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("composerd.yml");
        fs::write(
            &path,
            r#"
log-level: debug
engine:
  shared-dir: /opt/composer/shared
  full-check: true
session:
  bootstrap-timeout-ms: 1000
  worker-thread-name: engine-test
"#,
        )
        .unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.log_level.as_deref(), Some("debug"));
        assert_eq!(config.engine.shared_dir, PathBuf::from("/opt/composer/shared"));
        assert!(config.engine.full_check);
        assert_eq!(config.session.bootstrap_timeout_ms, 1000);
        assert_eq!(config.session.worker_thread_name, "engine-test");
        assert_eq!(config.session.subscriber_capacity, 15);
    }

    #[test]
    fn test_explicit_missing_file_is_error() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("missing.yml");
        assert!(Config::load(Some(&path)).is_err());
    }

    #[test]
    fn test_load_log_level() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("composerd.yml");
        fs::write(&path, "log-level: warn\n").unwrap();
        assert_eq!(Config::load_log_level(Some(&path)).as_deref(), Some("warn"));

        fs::write(&path, "log-level: [not, a, string]\n").unwrap();
        assert_eq!(Config::load_log_level(Some(&path)), None);
    }

    #[test]
    fn test_to_startup_params() {
        let engine = EngineConfig {
            shared_dir: PathBuf::from("/shared"),
            user_dir: PathBuf::from("/user"),
            version_tag: "1.2.3".to_string(),
            full_check: true,
        };
        let params = engine.to_startup_params();
        assert_eq!(params.shared_dir, PathBuf::from("/shared"));
        assert_eq!(params.version_tag, "1.2.3");
        assert!(params.full_check);
    }
}
