//! Service configuration: TOML file with per-field defaults, overridden by
//! the recognized environment variables (`API_TOKEN`, `API_BASE_URL`,
//! `MODE`, `REDIS_HOST`, `REDIS_PORT`).

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::chat::ChatMode;
use crate::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub llm: LlmConfig,
    pub platform: PlatformConfig,
    pub redis: RedisConfig,
    pub runtime: RuntimeConfig,
    pub limits: LimitsConfig,
    pub paths: PathsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Upper bound on concurrently served requests.
    pub max_concurrent: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8061,
            max_concurrent: 256,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub base_url: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    pub model: String,
    /// Cheaper model used for commit-message generation.
    pub commit_model: String,
    pub max_output_tokens: u32,
    /// Extended-thinking budget; 0 disables thinking.
    pub thinking_budget_tokens: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.anthropic.com".into(),
            api_key_env: "ANTHROPIC_API_KEY".into(),
            model: "claude-sonnet-4-20250514".into(),
            commit_model: "claude-3-5-haiku-20241022".into(),
            max_output_tokens: 8_192,
            thinking_budget_tokens: 4_096,
        }
    }
}

/// Default downstream credentials and the chat mode ceiling. Per-request
/// headers override token/base_url; `mode` caps what a request may ask for.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformConfig {
    pub token: String,
    pub base_url: String,
    pub mode: ChatMode,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            base_url: "https://api.example-platform.com/v1".into(),
            mode: ChatMode::ReadOnly,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 6379,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Hard cap on model↔tool iterations per message.
    pub max_iterations: u32,
    /// How long a superseding message waits for its predecessor to wind down.
    pub supersede_grace_ms: u64,
    pub keepalive_secs: u64,
    pub tool_timeout_secs: u64,
    pub sub_agent_timeout_secs: u64,
    pub llm_timeout_secs: u64,
    /// Delay between dispatching writes that target the same category.
    pub write_stagger_ms: u64,
    /// Run is cancelled when no event reaches the client for this long.
    pub stall_ceiling_secs: u64,
    pub snapshot_ttl_days: u64,
    /// Chat metadata/transcript TTL in the store; 0 = no expiry.
    pub chat_ttl_days: u64,
    pub sub_agent_max_iterations: u32,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_iterations: 30,
            supersede_grace_ms: 2_000,
            keepalive_secs: 15,
            tool_timeout_secs: 60,
            sub_agent_timeout_secs: 60,
            llm_timeout_secs: 180,
            write_stagger_ms: 500,
            stall_ceiling_secs: 30,
            snapshot_ttl_days: 7,
            chat_ttl_days: 0,
            sub_agent_max_iterations: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub chat_create_per_minute: u32,
    pub messages_per_minute: u32,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            chat_create_per_minute: 30,
            messages_per_minute: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Per-chat output directories are created under this root.
    pub output_root: PathBuf,
    pub skills_dir: PathBuf,
    pub knowledge_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            output_root: PathBuf::from("./data/outputs"),
            skills_dir: PathBuf::from("./skills"),
            knowledge_dir: PathBuf::from("./knowledge"),
        }
    }
}

impl Config {
    /// Load from a TOML file (all fields optional), then apply environment
    /// overrides. A missing file yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) if p.exists() => {
                let raw = std::fs::read_to_string(p)?;
                toml::from_str(&raw).map_err(|e| Error::Config(format!("{}: {e}", p.display())))?
            }
            Some(p) => {
                return Err(Error::Config(format!("config file not found: {}", p.display())))
            }
            None => Config::default(),
        };
        config.apply_env();
        Ok(config)
    }

    /// Apply the recognized environment variables on top of file values.
    pub fn apply_env(&mut self) {
        if let Ok(token) = std::env::var("API_TOKEN") {
            self.platform.token = token;
        }
        if let Ok(url) = std::env::var("API_BASE_URL") {
            self.platform.base_url = url;
        }
        if let Ok(mode) = std::env::var("MODE") {
            match mode.parse() {
                Ok(m) => self.platform.mode = m,
                Err(_) => tracing::warn!(value = %mode, "ignoring invalid MODE"),
            }
        }
        if let Ok(host) = std::env::var("REDIS_HOST") {
            self.redis.host = host;
        }
        if let Ok(port) = std::env::var("REDIS_PORT") {
            match port.parse() {
                Ok(p) => self.redis.port = p,
                Err(_) => tracing::warn!(value = %port, "ignoring invalid REDIS_PORT"),
            }
        }
    }

    /// Reject configurations the runtime cannot operate under.
    pub fn validate(&self) -> Result<()> {
        if self.runtime.max_iterations == 0 {
            return Err(Error::Config("runtime.max_iterations must be > 0".into()));
        }
        if self.runtime.keepalive_secs == 0 {
            return Err(Error::Config("runtime.keepalive_secs must be > 0".into()));
        }
        if self.limits.chat_create_per_minute == 0 || self.limits.messages_per_minute == 0 {
            return Err(Error::Config("limits must be > 0".into()));
        }
        if self.llm.max_output_tokens == 0 {
            return Err(Error::Config("llm.max_output_tokens must be > 0".into()));
        }
        Ok(())
    }

    pub fn redis_url(&self) -> String {
        format!("redis://{}:{}/", self.redis.host, self.redis.port)
    }
}
