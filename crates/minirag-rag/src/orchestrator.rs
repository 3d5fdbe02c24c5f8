use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{error, warn};

use minirag_core::types::AuthContext;
use minirag_crypto::FieldCipher;
use minirag_hooks::{WebhookDispatcher, EVENT_CHAT_MESSAGE};
use minirag_llm::{BotCredentials, CompletionRequest, ProviderRouter, StreamEvent};
use minirag_store::chats::{NewMessage, NewUsageEvent};
use minirag_store::types::{BotProfile, Message, MessageRole};
use minirag_store::MetaStore;
use minirag_vector::VectorStore;

use crate::error::{RagError, Result};
use crate::prompt::build_messages;

/// History window: the most recent 10 turns.
pub const HISTORY_MESSAGES: u32 = 20;
pub const SEARCH_TOP_K: u64 = 5;

#[derive(Debug, Clone, Serialize)]
pub struct ContextChunk {
    pub chunk_id: String,
    pub content: String,
    pub score: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct TurnUsage {
    pub model: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

/// Tagged stream variants for one chat turn. The HTTP layer serializes
/// these to SSE frames; closing the consumer end propagates cancellation
/// back into the producer.
#[derive(Debug, Clone)]
pub enum TurnEvent {
    Sources {
        sources: Vec<ContextChunk>,
    },
    Delta {
        content: String,
    },
    Done {
        chat_id: String,
        message_id: String,
        usage: TurnUsage,
    },
    Error {
        detail: String,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatTurnResponse {
    pub chat_id: String,
    pub message_id: String,
    pub content: String,
    pub usage: TurnUsage,
    pub sources: Vec<ContextChunk>,
}

/// Everything the LLM call needs, produced by the shared turn prelude:
/// persist the user message, load history, embed, search, assemble the
/// prompt.
struct PreparedTurn {
    sources: Vec<ContextChunk>,
    messages: Vec<minirag_llm::ChatMessage>,
    context_chunk_ids: String,
    llm_key: Option<String>,
}

#[derive(Clone)]
pub struct RagOrchestrator {
    store: MetaStore,
    vector: Arc<dyn VectorStore>,
    llm: Arc<ProviderRouter>,
    hooks: WebhookDispatcher,
    cipher: Arc<FieldCipher>,
    embedding_model: String,
    search_timeout: Duration,
}

impl RagOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: MetaStore,
        vector: Arc<dyn VectorStore>,
        llm: Arc<ProviderRouter>,
        hooks: WebhookDispatcher,
        cipher: Arc<FieldCipher>,
        embedding_model: String,
        search_timeout: Duration,
    ) -> Self {
        Self {
            store,
            vector,
            llm,
            hooks,
            cipher,
            embedding_model,
            search_timeout,
        }
    }

    fn bot_credentials(&self, bot: &BotProfile) -> BotCredentials {
        bot.encrypted_credentials
            .as_deref()
            .and_then(|sealed| self.cipher.decrypt_value(sealed).ok())
            .map(|plain| BotCredentials::parse(&plain))
            .unwrap_or_default()
    }

    async fn prepare_turn(
        &self,
        auth: &AuthContext,
        bot: &BotProfile,
        chat_id: &str,
        user_message: &str,
    ) -> Result<PreparedTurn> {
        let tenant_id = &auth.tenant_id;

        // The user message is persisted first and survives whatever
        // happens downstream.
        let user_msg = self.store.append_message(
            chat_id,
            tenant_id,
            MessageRole::User,
            NewMessage {
                content: user_message.to_string(),
                ..Default::default()
            },
        )?;

        // History covers prior turns only; the row just written is
        // appended separately by the prompt builder.
        let history: Vec<Message> = self
            .store
            .recent_messages(chat_id, tenant_id, HISTORY_MESSAGES + 1)?
            .into_iter()
            .filter(|m| m.id != user_msg.id)
            .collect();

        let creds = self.bot_credentials(bot);

        let embed_key = creds.key_for_model(&self.embedding_model);
        let query = self
            .llm
            .embed(&self.embedding_model, &[user_message.to_string()], embed_key)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| {
                minirag_llm::ProviderError::Parse("empty embedding response".to_string())
            })?;

        // Search is hard-filtered on the caller's tenant and bot.
        let hits = tokio::time::timeout(
            self.search_timeout,
            self.vector
                .search(tenant_id, &bot.id, &query, SEARCH_TOP_K),
        )
        .await
        .map_err(|_| RagError::SearchTimeout)??;

        let ids: Vec<String> = hits.iter().map(|h| h.chunk_id.clone()).collect();
        let rows = self.store.get_chunks_by_ids(tenant_id, &ids)?;
        let content_by_id: HashMap<String, String> =
            rows.into_iter().map(|c| (c.id, c.content)).collect();

        let sources: Vec<ContextChunk> = hits
            .iter()
            .filter_map(|hit| {
                content_by_id.get(&hit.chunk_id).map(|content| ContextChunk {
                    chunk_id: hit.chunk_id.clone(),
                    content: content.clone(),
                    score: hit.score,
                })
            })
            .collect();

        let messages = build_messages(&bot.system_prompt, &sources, &history, user_message);
        let context_chunk_ids = serde_json::to_string(&ids).unwrap_or_else(|_| "[]".to_string());

        Ok(PreparedTurn {
            sources,
            messages,
            context_chunk_ids,
            llm_key: creds.key_for_model(&bot.model).map(String::from),
        })
    }

    /// Non-streaming turn: call the model, persist the assistant message
    /// and its usage event, notify webhooks.
    pub async fn run_chat_turn(
        &self,
        auth: &AuthContext,
        bot: &BotProfile,
        chat_id: &str,
        user_message: &str,
    ) -> Result<ChatTurnResponse> {
        let turn = self.prepare_turn(auth, bot, chat_id, user_message).await?;

        let req = CompletionRequest {
            model: bot.model.clone(),
            messages: turn.messages,
            temperature: bot.temperature,
            max_tokens: bot.max_tokens,
        };
        let completion = self.llm.complete(&req, turn.llm_key.as_deref()).await?;

        let model = if completion.model.is_empty() {
            bot.model.clone()
        } else {
            completion.model.clone()
        };

        let assistant = self.store.append_message(
            chat_id,
            &auth.tenant_id,
            MessageRole::Assistant,
            NewMessage {
                content: completion.content.clone(),
                context_chunks: Some(turn.context_chunk_ids),
                prompt_tokens: completion.prompt_tokens,
                completion_tokens: completion.completion_tokens,
            },
        )?;
        self.store.record_usage(
            &auth.tenant_id,
            NewUsageEvent {
                chat_id: chat_id.to_string(),
                message_id: assistant.id.clone(),
                model: model.clone(),
                prompt_tokens: completion.prompt_tokens,
                completion_tokens: completion.completion_tokens,
                is_stream: false,
                time_to_first_token_ms: None,
                stream_duration_ms: None,
            },
        )?;

        self.hooks.dispatch(
            &auth.tenant_id,
            EVENT_CHAT_MESSAGE,
            serde_json::json!({
                "chat_id": chat_id,
                "message_id": assistant.id,
                "bot_profile_id": bot.id,
            }),
        );

        Ok(ChatTurnResponse {
            chat_id: chat_id.to_string(),
            message_id: assistant.id,
            content: completion.content,
            usage: TurnUsage {
                model,
                prompt_tokens: completion.prompt_tokens,
                completion_tokens: completion.completion_tokens,
            },
            sources: turn.sources,
        })
    }

    /// Streaming turn. Returns the consumer end of the event channel;
    /// dropping it cancels the provider stream, and whatever content was
    /// delivered up to that point is still persisted.
    pub fn run_chat_turn_stream(
        &self,
        auth: &AuthContext,
        bot: &BotProfile,
        chat_id: &str,
        user_message: &str,
    ) -> mpsc::Receiver<TurnEvent> {
        let (tx, rx) = mpsc::channel(64);
        let this = self.clone();
        let auth = auth.clone();
        let bot = bot.clone();
        let chat_id = chat_id.to_string();
        let user_message = user_message.to_string();

        tokio::spawn(async move {
            this.stream_turn(auth, bot, chat_id, user_message, tx).await;
        });
        rx
    }

    async fn stream_turn(
        &self,
        auth: AuthContext,
        bot: BotProfile,
        chat_id: String,
        user_message: String,
        tx: mpsc::Sender<TurnEvent>,
    ) {
        let turn = match self.prepare_turn(&auth, &bot, &chat_id, &user_message).await {
            Ok(turn) => turn,
            Err(e) => {
                warn!(chat_id = %chat_id, "stream turn setup failed: {e}");
                let _ = tx
                    .send(TurnEvent::Error {
                        detail: e.to_string(),
                    })
                    .await;
                return;
            }
        };

        // A send failure on the sources event means the client is already
        // gone; the LLM call hasn't started, so there is nothing to persist.
        if tx
            .send(TurnEvent::Sources {
                sources: turn.sources.clone(),
            })
            .await
            .is_err()
        {
            return;
        }

        let req = CompletionRequest {
            model: bot.model.clone(),
            messages: turn.messages,
            temperature: bot.temperature,
            max_tokens: bot.max_tokens,
        };

        let (provider_tx, mut provider_rx) = mpsc::channel::<StreamEvent>(64);
        let llm = self.llm.clone();
        let llm_key = turn.llm_key.clone();
        let provider_task = tokio::spawn(async move {
            llm.complete_stream(&req, llm_key.as_deref(), provider_tx).await
        });

        let started = Instant::now();
        let mut time_to_first_token_ms: Option<u64> = None;
        let mut accumulated = String::new();
        let mut usage: Option<TurnUsage> = None;
        let mut stream_error: Option<String> = None;
        let mut client_gone = false;

        while let Some(event) = provider_rx.recv().await {
            match event {
                StreamEvent::Delta { text } => {
                    if time_to_first_token_ms.is_none() {
                        time_to_first_token_ms = Some(started.elapsed().as_millis() as u64);
                    }
                    accumulated.push_str(&text);
                    if tx
                        .send(TurnEvent::Delta { content: text })
                        .await
                        .is_err()
                    {
                        client_gone = true;
                        break;
                    }
                }
                StreamEvent::Done {
                    model,
                    prompt_tokens,
                    completion_tokens,
                } => {
                    let model = if model.is_empty() {
                        bot.model.clone()
                    } else {
                        model
                    };
                    usage = Some(TurnUsage {
                        model,
                        prompt_tokens,
                        completion_tokens,
                    });
                    break;
                }
                StreamEvent::Error { message } => {
                    stream_error = Some(message);
                    break;
                }
            }
        }

        if client_gone {
            // Client disconnected: abort the provider stream and fall
            // through to persist the partial content.
            provider_task.abort();
        } else if usage.is_none() && stream_error.is_none() {
            // Provider closed its channel without Done: surface its error.
            match provider_task.await {
                Ok(Err(e)) => stream_error = Some(e.to_string()),
                Ok(Ok(())) => stream_error = Some("stream ended without usage".to_string()),
                Err(e) => stream_error = Some(e.to_string()),
            }
        }

        // Errors before any delivered content: no assistant row is written.
        if accumulated.is_empty() && usage.is_none() {
            if let Some(detail) = stream_error {
                let _ = tx.send(TurnEvent::Error { detail }).await;
            }
            return;
        }

        let stream_duration_ms = started.elapsed().as_millis() as u64;
        let (model, prompt_tokens, completion_tokens) = match &usage {
            Some(u) => (u.model.clone(), u.prompt_tokens, u.completion_tokens),
            None => (bot.model.clone(), 0, 0),
        };

        // The assistant content is exactly the concatenation of the deltas
        // that were delivered.
        let assistant = match self.store.append_message(
            &chat_id,
            &auth.tenant_id,
            MessageRole::Assistant,
            NewMessage {
                content: accumulated,
                context_chunks: Some(turn.context_chunk_ids),
                prompt_tokens,
                completion_tokens,
            },
        ) {
            Ok(msg) => msg,
            Err(e) => {
                error!(chat_id = %chat_id, "assistant persist failed: {e}");
                let _ = tx
                    .send(TurnEvent::Error {
                        detail: "failed to persist assistant message".to_string(),
                    })
                    .await;
                return;
            }
        };

        if let Err(e) = self.store.record_usage(
            &auth.tenant_id,
            NewUsageEvent {
                chat_id: chat_id.clone(),
                message_id: assistant.id.clone(),
                model: model.clone(),
                prompt_tokens,
                completion_tokens,
                is_stream: true,
                time_to_first_token_ms,
                stream_duration_ms: Some(stream_duration_ms),
            },
        ) {
            error!(chat_id = %chat_id, "usage record failed: {e}");
        }

        self.hooks.dispatch(
            &auth.tenant_id,
            EVENT_CHAT_MESSAGE,
            serde_json::json!({
                "chat_id": chat_id,
                "message_id": assistant.id,
                "bot_profile_id": bot.id,
            }),
        );

        if client_gone {
            return;
        }

        // A mid-stream failure suppresses the done event.
        if let Some(detail) = stream_error {
            let _ = tx.send(TurnEvent::Error { detail }).await;
            return;
        }

        let _ = tx
            .send(TurnEvent::Done {
                chat_id,
                message_id: assistant.id,
                usage: TurnUsage {
                    model,
                    prompt_tokens,
                    completion_tokens,
                },
            })
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use minirag_core::config::{ProvidersConfig, TimeoutsConfig};
    use minirag_core::types::Role;
    use minirag_vector::MemoryStore;

    fn orchestrator_fixture() -> (RagOrchestrator, MetaStore, AuthContext, BotProfile, String) {
        let store = MetaStore::open_in_memory().unwrap();
        let tenant = store.create_tenant("Acme", "acme", "free").unwrap();
        let user = store
            .create_user(&tenant.id, "a@x.com", "h", Role::Owner)
            .unwrap();
        let bot = store
            .create_bot_profile(&tenant.id, "support", "gpt-4o-mini", "Be helpful.", 0.7, 512, None)
            .unwrap();
        let chat = store.create_chat(&tenant.id, &bot.id, &user.id, "test").unwrap();

        // No provider keys configured: LLM calls fail with Auth, which is
        // exactly what the failure-path tests need.
        let llm = Arc::new(ProviderRouter::from_config(
            &ProvidersConfig::default(),
            &TimeoutsConfig::default(),
        ));
        let hooks = WebhookDispatcher::new(store.clone(), Duration::from_secs(10));
        let cipher = Arc::new(FieldCipher::from_key_material(&"ab".repeat(32)).unwrap());
        let orchestrator = RagOrchestrator::new(
            store.clone(),
            Arc::new(MemoryStore::new()),
            llm,
            hooks,
            cipher,
            "text-embedding-3-small".to_string(),
            Duration::from_secs(10),
        );
        let auth = AuthContext {
            tenant_id: tenant.id.clone(),
            user_id: user.id.clone(),
            role: Role::Owner,
        };
        (orchestrator, store, auth, bot, chat.id)
    }

    #[tokio::test]
    async fn failed_turn_keeps_user_message_only() {
        let (orchestrator, store, auth, bot, chat_id) = orchestrator_fixture();

        let err = orchestrator
            .run_chat_turn(&auth, &bot, &chat_id, "What does it support?")
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::Provider(_)));

        let messages = store.list_messages(&chat_id, &auth.tenant_id).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, MessageRole::User);
        assert_eq!(messages[0].content, "What does it support?");
    }

    #[tokio::test]
    async fn failed_stream_emits_error_and_writes_no_assistant_row() {
        let (orchestrator, store, auth, bot, chat_id) = orchestrator_fixture();

        let mut rx = orchestrator.run_chat_turn_stream(&auth, &bot, &chat_id, "Hello?");
        let mut saw_error = false;
        let mut saw_done = false;
        while let Some(event) = rx.recv().await {
            match event {
                TurnEvent::Error { .. } => saw_error = true,
                TurnEvent::Done { .. } => saw_done = true,
                _ => {}
            }
        }
        assert!(saw_error);
        assert!(!saw_done);

        let messages = store.list_messages(&chat_id, &auth.tenant_id).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, MessageRole::User);
    }

    #[test]
    fn credentials_fall_back_on_garbage() {
        let (orchestrator, _store, _auth, mut bot, _chat) = orchestrator_fixture();
        bot.encrypted_credentials = Some("not-sealed".to_string());
        let creds = orchestrator.bot_credentials(&bot);
        assert!(creds.key_for_model("gpt-4o-mini").is_none());
    }
}
