use minirag_llm::{ChatMessage, ChatRole};
use minirag_store::types::{Message, MessageRole};

use crate::orchestrator::ContextChunk;

/// Assemble the provider message list: one system message carrying the bot
/// prompt and the numbered retrieval context, the truncated history, then
/// the incoming user message.
pub fn build_messages(
    system_prompt: &str,
    context: &[ContextChunk],
    history: &[Message],
    user_message: &str,
) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(ChatMessage {
        role: ChatRole::System,
        content: render_system(system_prompt, context),
    });

    for msg in history {
        messages.push(ChatMessage {
            role: match msg.role {
                MessageRole::System => ChatRole::System,
                MessageRole::User => ChatRole::User,
                MessageRole::Assistant => ChatRole::Assistant,
            },
            content: msg.content.clone(),
        });
    }

    messages.push(ChatMessage {
        role: ChatRole::User,
        content: user_message.to_string(),
    });
    messages
}

fn render_system(system_prompt: &str, context: &[ContextChunk]) -> String {
    let mut out = String::with_capacity(system_prompt.len() + 256);
    out.push_str(system_prompt);
    out.push_str("\n---\nRelevant context from the knowledge base:\n");
    for (i, chunk) in context.iter().enumerate() {
        out.push_str(&format!("[{}] {}\n", i + 1, chunk.content));
    }
    out.push_str("---\nUse the context above to answer the user's question.");
    out
}
