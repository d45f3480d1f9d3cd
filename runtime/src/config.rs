//! Service configuration loaded from TOML. Every key is optional.
//!
//! ```toml
//! max_loop = 100
//! max_pause_retries = 3
//! max_flow_switches = 4
//! flow_ttl_seconds = 1200
//!
//! [log]
//! filter = "info,authflow_runtime=debug"
//! format = "json"
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// React iterations allowed in one accept call.
    pub max_loop: usize,
    /// Internal retries while the tree reports `PauseAndRetry`.
    pub max_pause_retries: u32,
    /// Flow switches and rewrites allowed in one submission.
    pub max_flow_switches: u32,
    pub flow_ttl_seconds: i64,
    pub log: LogConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            max_loop: crate::accept::MAX_LOOP,
            max_pause_retries: 3,
            max_flow_switches: 4,
            flow_ttl_seconds: 1200,
            log: LogConfig::default(),
        }
    }
}

impl ServiceConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn flow_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.flow_ttl_seconds)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `EnvFilter` directives, used when `RUST_LOG` is unset.
    pub filter: String,
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_for_missing_keys() {
        let config = ServiceConfig::from_toml_str("max_pause_retries = 7\n").unwrap();
        assert_eq!(config.max_pause_retries, 7);
        assert_eq!(config.max_loop, 100);
        assert_eq!(config.max_flow_switches, 4);
        assert_eq!(config.flow_ttl(), chrono::Duration::minutes(20));
        assert_eq!(config.log, LogConfig::default());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "flow_ttl_seconds = 60\n[log]\nformat = \"json\"").unwrap();
        let config = ServiceConfig::load(file.path()).unwrap();
        assert_eq!(config.flow_ttl_seconds, 60);
        assert_eq!(config.log.format, LogFormat::Json);
        assert_eq!(config.log.filter, "info");
    }

    #[test]
    fn test_errors() {
        assert!(matches!(
            ServiceConfig::from_toml_str("max_loop = \"many\""),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            ServiceConfig::load("/nonexistent/authflow.toml"),
            Err(ConfigError::Read { .. })
        ));
    }
}
