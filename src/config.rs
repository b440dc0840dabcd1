use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Log group Bedrock writes model-invocation logs to.
pub const DEFAULT_LOG_GROUP: &str = "/aws/bedrock";
/// Stream inside [`DEFAULT_LOG_GROUP`] holding the invocation records.
pub const DEFAULT_LOG_STREAM: &str = "aws/bedrock/modelinvocations";

/// Top-level configuration loaded from bedrock-usage.toml.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct UsageConfig {
    pub source: SourceConfig,
    pub retry: RetryConfig,
    pub serve: ServeConfig,
    pub tools: ToolsConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SourceConfig {
    pub log_group: String,
    pub log_stream: String,
    /// AWS region; falls back to the ambient provider chain when unset.
    pub region: Option<String>,
    /// Named profile from the shared AWS config files.
    pub profile: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServeConfig {
    pub bind: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// Lookback used when a call omits `days`.
    pub default_days: u32,
}

// --- Default implementations ---

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            log_group: DEFAULT_LOG_GROUP.to_string(),
            log_stream: DEFAULT_LOG_STREAM.to_string(),
            region: None,
            profile: None,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_delay_ms: 500,
            max_delay_ms: 5_000,
        }
    }
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 8417,
        }
    }
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self { default_days: 7 }
    }
}

/// Load config from `path`. A missing file yields defaults; an unreadable or
/// malformed one is an error.
pub fn load_config(path: &Path) -> Result<UsageConfig, ConfigError> {
    let contents = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "config file not found, using defaults");
            return Ok(UsageConfig::default());
        }
        Err(e) => {
            return Err(ConfigError::Read {
                path: path.to_path_buf(),
                source: e,
            })
        }
    };

    toml::from_str(&contents).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        source: e,
    })
}

#[derive(Debug)]
pub enum ConfigError {
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(f, "failed to read {}: {source}", path.display())
            }
            ConfigError::Parse { path, source } => {
                write!(f, "failed to parse {}: {source}", path.display())
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let cfg = load_config(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(cfg.source.log_group, DEFAULT_LOG_GROUP);
        assert_eq!(cfg.source.log_stream, DEFAULT_LOG_STREAM);
        assert_eq!(cfg.retry.max_retries, 2);
        assert_eq!(cfg.tools.default_days, 7);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bedrock-usage.toml");
        std::fs::write(
            &path,
            "[source]\nregion = \"us-east-1\"\n\n[retry]\nmax_retries = 0\n",
        )
        .unwrap();
        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.source.region.as_deref(), Some("us-east-1"));
        assert_eq!(cfg.source.log_group, DEFAULT_LOG_GROUP);
        assert_eq!(cfg.retry.max_retries, 0);
        assert_eq!(cfg.retry.initial_delay_ms, 500);
        assert_eq!(cfg.serve.port, 8417);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bedrock-usage.toml");
        std::fs::write(&path, "[retry\nmax_retries = ").unwrap();
        let err = load_config(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("bedrock-usage.toml"));
    }
}
