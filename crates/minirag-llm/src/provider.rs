use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use minirag_core::config::{ProvidersConfig, TimeoutsConfig};

use crate::anthropic::AnthropicProvider;
use crate::openai::OpenAiProvider;
use crate::stream::StreamEvent;

/// A single message in the conversation sent to a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// Request to an LLM provider.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f64,
    pub max_tokens: u32,
}

/// Non-streaming completion result.
#[derive(Debug, Clone)]
pub struct Completion {
    pub content: String,
    pub model: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

/// Common interface for all LLM providers.
///
/// `api_key` carries a per-bot override decrypted on demand; `None` falls
/// back to the provider's process-wide default key.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider name for logging and error messages.
    fn name(&self) -> &str;

    /// Embed a batch of texts, preserving input order.
    async fn embed(
        &self,
        model: &str,
        texts: &[String],
        api_key: Option<&str>,
    ) -> Result<Vec<Vec<f32>>, ProviderError>;

    /// Send a non-streaming completion request, wait for the full response.
    async fn complete(
        &self,
        req: &CompletionRequest,
        api_key: Option<&str>,
    ) -> Result<Completion, ProviderError>;

    /// Stream response events through a channel. The final event is `Done`
    /// with usage, or `Error`.
    async fn complete_stream(
        &self,
        req: &CompletionRequest,
        api_key: Option<&str>,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<(), ProviderError>;
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("provider rejected credentials")]
    Auth,

    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("provider unavailable: {0}")]
    Unavailable(String),

    #[error("unknown or unsupported model: {0}")]
    InvalidModel(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("parse error: {0}")]
    Parse(String),
}

/// Map an error response status to the canonical error kinds.
pub(crate) fn classify_status(status: u16, body: String) -> ProviderError {
    match status {
        401 | 403 => ProviderError::Auth,
        429 => ProviderError::RateLimited {
            retry_after_ms: 5000,
        },
        500..=599 => ProviderError::Unavailable(format!("status {}", status)),
        _ => ProviderError::Api {
            status,
            message: body,
        },
    }
}

/// Decrypted per-bot provider credentials, stored as sealed JSON on the bot
/// profile. A present key overrides the process default for that provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BotCredentials {
    #[serde(default)]
    pub openai_api_key: Option<String>,
    #[serde(default)]
    pub anthropic_api_key: Option<String>,
}

impl BotCredentials {
    /// Lenient parse: malformed credential JSON falls back to process keys
    /// rather than failing the request.
    pub fn parse(json: &str) -> Self {
        serde_json::from_str(json).unwrap_or_default()
    }

    /// The override key for whichever provider serves `model`.
    pub fn key_for_model(&self, model: &str) -> Option<&str> {
        if model.starts_with("claude") {
            self.anthropic_api_key.as_deref()
        } else {
            self.openai_api_key.as_deref()
        }
    }
}

/// Embedding width per model; fixed at collection creation time.
pub fn embedding_dimension(model: &str) -> u64 {
    match model {
        "text-embedding-3-large" => 3072,
        // -3-small, ada-002, and anything unrecognised share the common width.
        _ => 1536,
    }
}

/// Routes a model name to the provider that serves it. Keeps provider
/// selection out of the orchestrator: callers hand over a model string and
/// get the uniform `LlmProvider` surface back.
pub struct ProviderRouter {
    openai: Arc<dyn LlmProvider>,
    anthropic: Arc<dyn LlmProvider>,
}

impl ProviderRouter {
    /// Wire explicit provider implementations. Production goes through
    /// `from_config`; tests inject stubs here.
    pub fn with_providers(openai: Arc<dyn LlmProvider>, anthropic: Arc<dyn LlmProvider>) -> Self {
        Self { openai, anthropic }
    }

    pub fn from_config(providers: &ProvidersConfig, timeouts: &TimeoutsConfig) -> Self {
        let llm_timeout = Duration::from_secs(timeouts.llm_secs);
        let embed_timeout = Duration::from_secs(timeouts.embedding_secs);

        let (openai_key, openai_base) = match &providers.openai {
            Some(c) => (Some(c.api_key.clone()), c.base_url.clone()),
            None => (None, "https://api.openai.com".to_string()),
        };
        let (anthropic_key, anthropic_base) = match &providers.anthropic {
            Some(c) => (Some(c.api_key.clone()), c.base_url.clone()),
            None => (None, "https://api.anthropic.com".to_string()),
        };

        Self {
            openai: Arc::new(OpenAiProvider::new(
                openai_key,
                openai_base,
                llm_timeout,
                embed_timeout,
            )),
            anthropic: Arc::new(AnthropicProvider::new(
                anthropic_key,
                anthropic_base,
                llm_timeout,
            )),
        }
    }

    /// Model-name prefix dispatch: `claude-*` goes to Anthropic, everything
    /// else to the OpenAI-compatible endpoint.
    pub fn provider_for(&self, model: &str) -> Arc<dyn LlmProvider> {
        if model.starts_with("claude") {
            self.anthropic.clone()
        } else {
            self.openai.clone()
        }
    }

    pub async fn embed(
        &self,
        model: &str,
        texts: &[String],
        api_key: Option<&str>,
    ) -> Result<Vec<Vec<f32>>, ProviderError> {
        self.provider_for(model).embed(model, texts, api_key).await
    }

    pub async fn complete(
        &self,
        req: &CompletionRequest,
        api_key: Option<&str>,
    ) -> Result<Completion, ProviderError> {
        self.provider_for(&req.model).complete(req, api_key).await
    }

    pub async fn complete_stream(
        &self,
        req: &CompletionRequest,
        api_key: Option<&str>,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<(), ProviderError> {
        self.provider_for(&req.model)
            .complete_stream(req, api_key, tx)
            .await
    }
}
