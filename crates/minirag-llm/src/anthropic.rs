use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::provider::{
    classify_status, ChatRole, Completion, CompletionRequest, LlmProvider, ProviderError,
};
use crate::stream::{parse_sse_line, SseParsed, StreamEvent};

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Anthropic messages API. Completion-only; embedding requests are routed
/// to an embedding-capable provider by model name, so `embed` here means a
/// misconfigured bot.
pub struct AnthropicProvider {
    client: reqwest::Client,
    default_key: Option<String>,
    base_url: String,
    llm_timeout: Duration,
}

impl AnthropicProvider {
    pub fn new(default_key: Option<String>, base_url: String, llm_timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            default_key,
            base_url,
            llm_timeout,
        }
    }

    fn key<'a>(&'a self, override_key: Option<&'a str>) -> Result<&'a str, ProviderError> {
        override_key
            .or(self.default_key.as_deref())
            .ok_or(ProviderError::Auth)
    }
}

/// The messages API takes the system prompt as a top-level field; system
/// entries are folded out of the message list.
fn build_request_body(req: &CompletionRequest, stream: bool) -> serde_json::Value {
    let system: String = req
        .messages
        .iter()
        .filter(|m| m.role == ChatRole::System)
        .map(|m| m.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");

    let messages: Vec<serde_json::Value> = req
        .messages
        .iter()
        .filter(|m| m.role != ChatRole::System)
        .map(|m| {
            serde_json::json!({
                "role": match m.role {
                    ChatRole::Assistant => "assistant",
                    _ => "user",
                },
                "content": m.content,
            })
        })
        .collect();

    serde_json::json!({
        "model": req.model,
        "system": system,
        "messages": messages,
        "max_tokens": req.max_tokens,
        "temperature": req.temperature,
        "stream": stream,
    })
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn embed(
        &self,
        model: &str,
        _texts: &[String],
        _api_key: Option<&str>,
    ) -> Result<Vec<Vec<f32>>, ProviderError> {
        Err(ProviderError::InvalidModel(format!(
            "{} does not serve embeddings",
            model
        )))
    }

    async fn complete(
        &self,
        req: &CompletionRequest,
        api_key: Option<&str>,
    ) -> Result<Completion, ProviderError> {
        let key = self.key(api_key)?;
        let body = build_request_body(req, false);
        let url = format!("{}/v1/messages", self.base_url);

        debug!(model = %req.model, "sending completion request");

        let resp = self
            .client
            .post(&url)
            .header("x-api-key", key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .timeout(self.llm_timeout)
            .json(&body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, "anthropic API error");
            return Err(classify_status(status, text));
        }

        let api_resp: ApiResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;

        let content = api_resp
            .content
            .iter()
            .filter_map(|block| block.text.as_deref())
            .collect::<Vec<_>>()
            .join("");

        Ok(Completion {
            content,
            model: api_resp.model,
            prompt_tokens: api_resp.usage.input_tokens,
            completion_tokens: api_resp.usage.output_tokens,
        })
    }

    async fn complete_stream(
        &self,
        req: &CompletionRequest,
        api_key: Option<&str>,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<(), ProviderError> {
        let key = self.key(api_key)?;
        let body = build_request_body(req, true);
        let url = format!("{}/v1/messages", self.base_url);

        debug!(model = %req.model, "sending streaming completion request");

        let resp = self
            .client
            .post(&url)
            .header("x-api-key", key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .timeout(self.llm_timeout)
            .json(&body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, "anthropic streaming API error");
            return Err(classify_status(status, text));
        }

        process_anthropic_stream(resp, tx).await;
        Ok(())
    }
}

/// Parse an Anthropic streaming SSE response, reading from a reqwest byte
/// stream and emitting StreamEvents.
async fn process_anthropic_stream(resp: reqwest::Response, tx: mpsc::Sender<StreamEvent>) {
    use futures_util::StreamExt;

    let mut current_event = String::new();
    let mut model = String::new();
    let mut prompt_tokens: u32 = 0;
    let mut completion_tokens: u32 = 0;
    let mut line_buf = String::new();

    let mut byte_stream = resp.bytes_stream();

    while let Some(chunk) = byte_stream.next().await {
        let chunk = match chunk {
            Ok(c) => c,
            Err(e) => {
                let _ = tx
                    .send(StreamEvent::Error {
                        message: e.to_string(),
                    })
                    .await;
                return;
            }
        };

        let text = match std::str::from_utf8(&chunk) {
            Ok(t) => t,
            Err(_) => continue,
        };

        // Multiple SSE lines can arrive per chunk; keep the incomplete tail.
        line_buf.push_str(text);
        let lines: Vec<&str> = line_buf.split('\n').collect();
        let (complete, remainder) = lines.split_at(lines.len() - 1);
        let remainder = remainder.first().unwrap_or(&"").to_string();

        for line in complete {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            match parse_sse_line(line) {
                Some(SseParsed::Event(ev)) => current_event = ev,
                Some(SseParsed::Data(data)) => {
                    match current_event.as_str() {
                        "message_start" => {
                            if let Ok(msg) = serde_json::from_str::<MessageStart>(&data) {
                                model = msg.message.model;
                                prompt_tokens = msg.message.usage.input_tokens;
                            }
                        }
                        "content_block_delta" => {
                            if let Ok(delta) = serde_json::from_str::<ContentBlockDelta>(&data) {
                                if let Some(text) = delta.delta.text {
                                    if tx.send(StreamEvent::Delta { text }).await.is_err() {
                                        return; // receiver dropped
                                    }
                                }
                            }
                        }
                        "message_delta" => {
                            if let Ok(delta) = serde_json::from_str::<MessageDelta>(&data) {
                                completion_tokens = delta.usage.output_tokens;
                            }
                        }
                        "error" => {
                            warn!(data = %data, "anthropic stream error");
                            let _ = tx.send(StreamEvent::Error { message: data }).await;
                            return;
                        }
                        _ => {}
                    }
                }
                None => {}
            }
        }

        line_buf = remainder;
    }

    let _ = tx
        .send(StreamEvent::Done {
            model,
            prompt_tokens,
            completion_tokens,
        })
        .await;
}

// Anthropic SSE data types (deserialization only)

#[derive(Deserialize)]
struct ApiResponse {
    model: String,
    content: Vec<ContentBlock>,
    usage: ApiUsage,
}

#[derive(Deserialize)]
struct ContentBlock {
    text: Option<String>,
}

#[derive(Deserialize)]
struct ApiUsage {
    input_tokens: u32,
    output_tokens: u32,
}

#[derive(Deserialize)]
struct MessageStart {
    message: MessageStartInner,
}

#[derive(Deserialize)]
struct MessageStartInner {
    model: String,
    usage: InputUsage,
}

#[derive(Deserialize)]
struct InputUsage {
    input_tokens: u32,
}

#[derive(Deserialize)]
struct ContentBlockDelta {
    delta: DeltaContent,
}

#[derive(Deserialize)]
struct DeltaContent {
    text: Option<String>,
}

#[derive(Deserialize)]
struct MessageDelta {
    usage: OutputUsage,
}

#[derive(Deserialize)]
struct OutputUsage {
    output_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ChatMessage;

    #[test]
    fn system_messages_fold_into_top_level_field() {
        let req = CompletionRequest {
            model: "claude-sonnet-4".into(),
            messages: vec![
                ChatMessage {
                    role: ChatRole::System,
                    content: "Be terse.".into(),
                },
                ChatMessage {
                    role: ChatRole::User,
                    content: "Hi".into(),
                },
                ChatMessage {
                    role: ChatRole::Assistant,
                    content: "Hello".into(),
                },
            ],
            temperature: 0.5,
            max_tokens: 256,
        };

        let body = build_request_body(&req, true);
        assert_eq!(body["system"], "Be terse.");
        assert_eq!(body["messages"].as_array().unwrap().len(), 2);
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["messages"][1]["role"], "assistant");
        assert_eq!(body["stream"], true);
    }

    #[tokio::test]
    async fn embeddings_are_invalid_model() {
        let p = AnthropicProvider::new(
            Some("key".into()),
            "https://api.anthropic.com".into(),
            Duration::from_secs(1),
        );
        let err = p
            .embed("claude-sonnet-4", &["text".into()], None)
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::InvalidModel(_)));
    }
}
