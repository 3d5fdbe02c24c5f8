//! RAG orchestrator: retrieval context, prompt assembly, LLM invocation,
//! token streaming, persistence of the turn, and usage accounting.

pub mod error;
pub mod orchestrator;
pub mod prompt;

pub use error::{RagError, Result};
pub use orchestrator::{
    ChatTurnResponse, ContextChunk, RagOrchestrator, TurnEvent, TurnUsage, HISTORY_MESSAGES,
    SEARCH_TOP_K,
};
pub use prompt::build_messages;
