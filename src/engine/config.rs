//! Engine configuration.
//!
//! Tunables for the validator, the incremental builder, and the action
//! store. Loadable from YAML so hosts can ship one config file for the
//! whole integration.

use std::path::Path;

use serde::Deserialize;

use super::errors::EngineError;

/// Pipeline tunables.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Minimum length a `[key=="…"]` predicate value must have before the
    /// validator stops treating word-like values as fabricated. Real backend
    /// keys are 10+ characters; lower this only if yours are shorter.
    #[serde(default = "default_min_random_key_len")]
    pub min_random_key_len: usize,

    /// How many content blocks the builder inserts per patch call. Must stay
    /// small enough that a single batch never exceeds the write depth
    /// ceiling.
    #[serde(default = "default_content_batch_size")]
    pub content_batch_size: usize,

    /// How long an idle conversation's action list is retained, in seconds.
    #[serde(default = "default_action_ttl_secs")]
    pub action_ttl_secs: u64,
}

fn default_min_random_key_len() -> usize {
    10
}

fn default_content_batch_size() -> usize {
    4
}

fn default_action_ttl_secs() -> u64 {
    1800
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            min_random_key_len: default_min_random_key_len(),
            content_batch_size: default_content_batch_size(),
            action_ttl_secs: default_action_ttl_secs(),
        }
    }
}

impl EngineConfig {
    /// Load from a YAML file; absent keys fall back to defaults.
    pub fn from_yaml_file(path: &Path) -> Result<Self, EngineError> {
        let content = std::fs::read_to_string(path).map_err(|e| EngineError::Serialization {
            reason: format!("cannot read {}: {e}", path.display()),
        })?;
        serde_yaml::from_str(&content).map_err(|e| EngineError::Serialization {
            reason: format!("invalid engine config: {e}"),
        })
    }
}
