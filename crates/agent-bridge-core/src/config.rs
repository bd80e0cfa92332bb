//! Bridge configuration.
//!
//! Loaded from TOML, then overridden by `AGENT_BRIDGE_BASE_URL` and
//! `AGENT_BRIDGE_API_TOKEN`. Every section has defaults so an empty file is
//! a valid configuration pointing at a local server.

use std::{collections::HashMap, path::Path, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::MemoryBlock;

/// Environment variable overriding `server.base_url`.
pub const ENV_BASE_URL: &str = "AGENT_BRIDGE_BASE_URL";
/// Environment variable overriding `server.api_token`.
pub const ENV_API_TOKEN: &str = "AGENT_BRIDGE_API_TOKEN";

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Configuration root.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub server: ServerConfig,
    pub retry: RetryConfig,
    pub sessions: SessionConfig,
    pub memory: MemoryConfig,
}

impl BridgeConfig {
    /// Parse from a TOML document.
    ///
    /// # Errors
    /// Returns error if the document is not valid TOML for this schema.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    /// Load from a TOML file and apply environment overrides.
    ///
    /// # Errors
    /// Returns error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let mut config = Self::from_toml_str(&raw)?;
        config.apply_env();
        Ok(config)
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_with(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary lookup.
    pub fn apply_env_with(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(ENV_BASE_URL).filter(|v| !v.trim().is_empty()) {
            self.server.base_url = url;
        }
        if let Some(token) = lookup(ENV_API_TOKEN).filter(|v| !v.trim().is_empty()) {
            self.server.api_token = Some(token);
        }
    }
}

/// `[server]`: remote agent server endpoint and timeouts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Base URL, without the `/v1` suffix.
    pub base_url: String,
    /// Bearer credential.
    pub api_token: Option<String>,
    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,
    /// Maximum silence between stream chunks, in seconds.
    pub stream_idle_timeout_secs: u64,
    /// Model handle used when creating agents.
    pub agent_model: Option<String>,
    /// Embedding handle used when creating agents.
    pub embedding_model: Option<String>,
}

impl ServerConfig {
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    #[must_use]
    pub const fn stream_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.stream_idle_timeout_secs)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8283".to_string(),
            api_token: None,
            request_timeout_secs: 30,
            stream_idle_timeout_secs: 120,
            agent_model: Some("letta/letta-free".to_string()),
            embedding_model: Some("letta/letta-free".to_string()),
        }
    }
}

/// `[retry]`: exponential backoff for transient failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts including the first (1 = no retries).
    pub max_attempts: u32,
    /// Base delay in milliseconds.
    pub base_delay_ms: u64,
    /// Cap on a single delay in milliseconds.
    pub max_delay_ms: u64,
    /// Jitter as a fraction of the delay, applied in both directions.
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 10_000,
            jitter: 0.25,
        }
    }
}

impl RetryConfig {
    /// A policy that never retries.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }
}

/// How a session's first command picks its agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentSelection {
    /// Bind to an existing agent carrying the default name, else create one.
    #[default]
    ReuseByName,
    /// Always create a fresh agent.
    AlwaysCreate,
}

/// `[sessions]`: naming, selection and eviction policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Prefix for default agent names (`<prefix><session key>`).
    pub agent_name_prefix: String,
    pub selection: AgentSelection,
    /// Blocks given to agents the bridge creates.
    pub initial_blocks: Vec<MemoryBlock>,
    /// Idle time after which a binding may be evicted. `None` disables eviction.
    pub idle_timeout_secs: Option<u64>,
    /// Interval of the eviction sweep.
    pub sweep_interval_secs: u64,
}

impl SessionConfig {
    /// Default agent name for a session key.
    #[must_use]
    pub fn agent_name_for(&self, session_key: &str) -> String {
        format!("{}{session_key}", self.agent_name_prefix)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            agent_name_prefix: "agent-".to_string(),
            selection: AgentSelection::default(),
            initial_blocks: vec![
                MemoryBlock::new("persona", "I am a helpful assistant with persistent memory."),
                MemoryBlock::new("human", "Nothing is known about the user yet."),
            ],
            idle_timeout_secs: Some(3600),
            sweep_interval_secs: 300,
        }
    }
}

/// `[memory]`: block cache and limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Cached blocks younger than this are served without a remote read.
    pub staleness_ms: u64,
    /// Limit assumed for blocks whose limit is unknown.
    pub default_block_limit: usize,
    /// Per-label limit overrides.
    pub block_limits: HashMap<String, usize>,
}

impl MemoryConfig {
    #[must_use]
    pub const fn staleness(&self) -> Duration {
        Duration::from_millis(self.staleness_ms)
    }

    /// Configured limit for a label.
    #[must_use]
    pub fn limit_for(&self, label: &str) -> usize {
        self.block_limits
            .get(label)
            .copied()
            .unwrap_or(self.default_block_limit)
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            staleness_ms: 30_000,
            default_block_limit: 5000,
            block_limits: HashMap::new(),
        }
    }
}
