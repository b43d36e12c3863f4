//! Store configuration loading.
//!
//! Reads a YAML config describing the document-store endpoint. Secrets may
//! be given as `${ENV_VAR}` references so tokens never live in the file.

use std::path::Path;

use serde::Deserialize;

use super::errors::StoreError;

/// Connection settings for the HTTP document store.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Base URL of the store API, e.g. `https://content.example.com/v1`.
    pub base_url: String,
    /// Bearer token, or a `${ENV_VAR}` reference resolved at load time.
    #[serde(default)]
    pub token: Option<String>,
    /// Request timeout in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Timeout for the long-lived change-feed connection, in seconds.
    #[serde(default = "default_listen_timeout_secs")]
    pub listen_timeout_secs: u64,
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_listen_timeout_secs() -> u64 {
    300
}

impl StoreConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            token: None,
            request_timeout_secs: default_request_timeout_secs(),
            listen_timeout_secs: default_listen_timeout_secs(),
        }
    }

    /// Load from a YAML file, resolving `${ENV_VAR}` token references.
    pub fn from_yaml_file(path: &Path) -> Result<Self, StoreError> {
        let content = std::fs::read_to_string(path).map_err(|e| StoreError::Config {
            reason: format!("cannot read {}: {e}", path.display()),
        })?;
        let mut config: StoreConfig =
            serde_yaml::from_str(&content).map_err(|e| StoreError::Config {
                reason: format!("invalid store config: {e}"),
            })?;
        if let Some(token) = config.token.take() {
            config.token = Some(resolve_env_ref(&token)?);
        }
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), StoreError> {
        if self.base_url.trim().is_empty() {
            return Err(StoreError::Config {
                reason: "base_url must not be empty".to_string(),
            });
        }
        Ok(())
    }
}

/// Resolve a `${ENV_VAR}` reference; plain values pass through.
fn resolve_env_ref(value: &str) -> Result<String, StoreError> {
    let Some(name) = value.strip_prefix("${").and_then(|v| v.strip_suffix('}')) else {
        return Ok(value.to_string());
    };
    std::env::var(name).map_err(|_| StoreError::Config {
        reason: format!("environment variable '{name}' is not set"),
    })
}

// ─── Tests ──────────────────────────────────────────────────────────────────
