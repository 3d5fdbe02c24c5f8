//! Uniform completion/embedding interface over external LLM providers,
//! selected by model-name prefix. Per-bot API keys override the process
//! defaults and are never logged.

pub mod anthropic;
pub mod openai;
pub mod pricing;
pub mod provider;
pub mod stream;

pub use pricing::{cost, CostEstimate};
pub use provider::{
    embedding_dimension, BotCredentials, ChatMessage, ChatRole, Completion, CompletionRequest,
    LlmProvider, ProviderError, ProviderRouter,
};
pub use stream::StreamEvent;
