use anyhow::{bail, Result};
use relay_routing::RouterConfig;
use std::env;
use std::time::Duration;

/// Which embedding backend to construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingMode {
    /// Remote Ollama-style embedding service.
    Http,
    /// Deterministic offline hashing, for tests and degraded operation.
    Hash,
}

impl EmbeddingMode {
    fn from_env() -> Result<Self> {
        let raw = env::var("RELAY_EMBEDDING_MODE")
            .unwrap_or_else(|_| "http".to_string())
            .to_ascii_lowercase();
        match raw.as_str() {
            "http" => Ok(Self::Http),
            "hash" => Ok(Self::Hash),
            other => bail!("Unsupported RELAY_EMBEDDING_MODE '{other}' (expected 'http' or 'hash')"),
        }
    }
}

/// Which language-model judge to construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmMode {
    Http,
    Stub,
}

impl LlmMode {
    fn from_env() -> Result<Self> {
        let raw = env::var("RELAY_LLM_MODE")
            .unwrap_or_else(|_| "http".to_string())
            .to_ascii_lowercase();
        match raw.as_str() {
            "http" => Ok(Self::Http),
            "stub" => Ok(Self::Stub),
            other => bail!("Unsupported RELAY_LLM_MODE '{other}' (expected 'http' or 'stub')"),
        }
    }
}

/// Process-level configuration, assembled from `RELAY_*` environment
/// variables at startup.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub registry_file: String,
    pub settings_file: String,
    pub embedding_mode: EmbeddingMode,
    pub embedding_url: String,
    pub embedding_model: String,
    pub llm_mode: LlmMode,
    pub llm_url: String,
    pub llm_model: String,
    pub llm_api_key: Option<String>,
    pub call_timeout: Duration,
    pub max_idle: Duration,
    pub router: RouterConfig,
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            registry_file: env::var("RELAY_REGISTRY_FILE")
                .unwrap_or_else(|_| "relay_registry.json".to_string()),
            settings_file: env::var("RELAY_SETTINGS_FILE")
                .unwrap_or_else(|_| "relay_settings.json".to_string()),
            embedding_mode: EmbeddingMode::from_env()?,
            embedding_url: env::var("RELAY_EMBEDDING_URL")
                .unwrap_or_else(|_| "http://localhost:11434".to_string()),
            embedding_model: env::var("RELAY_EMBEDDING_MODEL")
                .unwrap_or_else(|_| "all-minilm".to_string()),
            llm_mode: LlmMode::from_env()?,
            llm_url: env::var("RELAY_LLM_URL")
                .unwrap_or_else(|_| "http://localhost:11434".to_string()),
            llm_model: env::var("RELAY_LLM_MODEL").unwrap_or_else(|_| "qwen3:8b".to_string()),
            llm_api_key: env::var("RELAY_LLM_API_KEY").ok(),
            call_timeout: Duration::from_secs(parse_secs("RELAY_CALL_TIMEOUT_SECS", 30)?),
            max_idle: Duration::from_secs(parse_secs("RELAY_MAX_IDLE_SECS", 300)?),
            router: RouterConfig::from_env().map_err(|e| anyhow::anyhow!(e.to_string()))?,
        })
    }
}

fn parse_secs(name: &str, default: u64) -> Result<u64> {
    match env::var(name) {
        Err(_) => Ok(default),
        Ok(raw) => match raw.parse() {
            Ok(value) => Ok(value),
            Err(_) => bail!("{name} has invalid value '{raw}'"),
        },
    }
}
