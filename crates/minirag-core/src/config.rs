use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{MiniragError, Result};

pub const DEFAULT_PORT: u16 = 8400;
pub const DEFAULT_BIND: &str = "127.0.0.1";
/// The single shared vector collection. Tenant isolation happens via
/// payload filters, never via per-tenant collections.
pub const VECTOR_COLLECTION: &str = "minirag_chunks";

/// Top-level config (minirag.toml + MINIRAG_* env overrides + the well-known
/// bare environment variables).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MiniragConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub vector: VectorConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub models: ModelsConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub cors: CorsConfig,
    #[serde(default)]
    pub timeouts: TimeoutsConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite path for the metadata store.
    #[serde(default = "default_db_url")]
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_db_url(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct VectorConfig {
    /// Qdrant endpoint, e.g. "http://localhost:6334". Unset selects the
    /// in-process memory backend.
    pub url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// SQLite path for the durable job queue. Defaults to the metadata
    /// database path so a single-file deployment works out of the box.
    pub url: Option<String>,
    #[serde(default = "default_poll_ms")]
    pub poll_interval_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            url: None,
            poll_interval_ms: default_poll_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// 256-bit key for field encryption, hex or base64. Required.
    #[serde(default)]
    pub encryption_key: String,
    /// HMAC key for signed session tokens. Required.
    #[serde(default)]
    pub session_signing_key: String,
    #[serde(default = "default_session_expire")]
    pub session_expire_minutes: u64,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            encryption_key: String::new(),
            session_signing_key: String::new(),
            session_expire_minutes: default_session_expire(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsConfig {
    #[serde(default = "default_llm_model")]
    pub default_llm_model: String,
    #[serde(default = "default_embedding_model")]
    pub default_embedding_model: String,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            default_llm_model: default_llm_model(),
            default_embedding_model: default_embedding_model(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProvidersConfig {
    pub openai: Option<OpenAiConfig>,
    pub anthropic: Option<AnthropicConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiConfig {
    pub api_key: String,
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicConfig {
    pub api_key: String,
    #[serde(default = "default_anthropic_base_url")]
    pub base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CorsConfig {
    /// Origins allowed by the browser dashboard and the embeddable widget.
    /// Empty means same-origin only.
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutsConfig {
    #[serde(default = "default_llm_timeout")]
    pub llm_secs: u64,
    #[serde(default = "default_embed_timeout")]
    pub embedding_secs: u64,
    #[serde(default = "default_search_timeout")]
    pub search_secs: u64,
    #[serde(default = "default_fetch_timeout")]
    pub fetch_secs: u64,
    #[serde(default = "default_webhook_timeout")]
    pub webhook_secs: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            llm_secs: default_llm_timeout(),
            embedding_secs: default_embed_timeout(),
            search_secs: default_search_timeout(),
            fetch_secs: default_fetch_timeout(),
            webhook_secs: default_webhook_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Run the ingestion worker and the refresh scheduler inside this
    /// process. Disable when a dedicated worker process consumes the queue.
    #[serde(default = "bool_true")]
    pub enabled: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

fn bool_true() -> bool {
    true
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_db_url() -> String {
    "minirag.db".to_string()
}
fn default_poll_ms() -> u64 {
    1000
}
fn default_session_expire() -> u64 {
    60
}
fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}
fn default_openai_base_url() -> String {
    "https://api.openai.com".to_string()
}
fn default_anthropic_base_url() -> String {
    "https://api.anthropic.com".to_string()
}
fn default_llm_timeout() -> u64 {
    120
}
fn default_embed_timeout() -> u64 {
    60
}
fn default_search_timeout() -> u64 {
    10
}
fn default_fetch_timeout() -> u64 {
    30
}
fn default_webhook_timeout() -> u64 {
    10
}

impl MiniragConfig {
    /// Load config from a TOML file with MINIRAG_* env var overrides, then
    /// apply the bare well-known variables (DATABASE_URL, ENCRYPTION_KEY, …)
    /// that deployment environments conventionally set.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let path = config_path.unwrap_or("minirag.toml");

        let mut config: MiniragConfig = Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("MINIRAG_").split("__"))
            .extract()
            .map_err(|e| MiniragError::Config(e.to_string()))?;

        config.apply_well_known_env();
        config.validate()?;
        Ok(config)
    }

    /// The bare variable names from the deployment contract take precedence
    /// over both the TOML file and the MINIRAG_* overrides.
    fn apply_well_known_env(&mut self) {
        if let Ok(v) = std::env::var("DATABASE_URL") {
            self.database.url = v;
        }
        if let Ok(v) = std::env::var("VECTOR_URL") {
            self.vector.url = Some(v);
        }
        if let Ok(v) = std::env::var("QUEUE_URL") {
            self.queue.url = Some(v);
        }
        if let Ok(v) = std::env::var("ENCRYPTION_KEY") {
            self.security.encryption_key = v;
        }
        if let Ok(v) = std::env::var("SESSION_SIGNING_KEY") {
            self.security.session_signing_key = v;
        }
        if let Ok(v) = std::env::var("SESSION_EXPIRE_MINUTES") {
            if let Ok(mins) = v.parse() {
                self.security.session_expire_minutes = mins;
            }
        }
        if let Ok(v) = std::env::var("DEFAULT_LLM_MODEL") {
            self.models.default_llm_model = v;
        }
        if let Ok(v) = std::env::var("DEFAULT_EMBEDDING_MODEL") {
            self.models.default_embedding_model = v;
        }
        if let Ok(v) = std::env::var("OPENAI_API_KEY") {
            let base_url = self
                .providers
                .openai
                .as_ref()
                .map(|c| c.base_url.clone())
                .unwrap_or_else(default_openai_base_url);
            self.providers.openai = Some(OpenAiConfig { api_key: v, base_url });
        }
        if let Ok(v) = std::env::var("ANTHROPIC_API_KEY") {
            let base_url = self
                .providers
                .anthropic
                .as_ref()
                .map(|c| c.base_url.clone())
                .unwrap_or_else(default_anthropic_base_url);
            self.providers.anthropic = Some(AnthropicConfig { api_key: v, base_url });
        }
        if let Ok(v) = std::env::var("ALLOWED_ORIGINS") {
            self.cors.allowed_origins = v
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
    }

    fn validate(&self) -> Result<()> {
        if self.security.encryption_key.is_empty() {
            return Err(MiniragError::Config(
                "ENCRYPTION_KEY is required (256-bit, hex or base64)".to_string(),
            ));
        }
        if self.security.session_signing_key.is_empty() {
            return Err(MiniragError::Config(
                "SESSION_SIGNING_KEY is required".to_string(),
            ));
        }
        Ok(())
    }

    /// Effective queue database path.
    pub fn queue_url(&self) -> &str {
        self.queue.url.as_deref().unwrap_or(&self.database.url)
    }

    /// Session lifetime in seconds, as used by the token signer.
    pub fn session_ttl_secs(&self) -> i64 {
        self.security.session_expire_minutes as i64 * 60
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = MiniragConfig::default();
        assert_eq!(cfg.server.port, DEFAULT_PORT);
        assert_eq!(cfg.security.session_expire_minutes, 60);
        assert_eq!(cfg.timeouts.llm_secs, 120);
        assert_eq!(cfg.timeouts.webhook_secs, 10);
        assert!(cfg.worker.enabled);
        assert_eq!(cfg.queue_url(), cfg.database.url);
    }

    #[test]
    fn validate_requires_keys() {
        let mut cfg = MiniragConfig::default();
        assert!(cfg.validate().is_err());
        cfg.security.encryption_key = "k".repeat(64);
        assert!(cfg.validate().is_err());
        cfg.security.session_signing_key = "signing".to_string();
        assert!(cfg.validate().is_ok());
    }
}
