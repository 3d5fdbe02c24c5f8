use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::provider::{
    classify_status, ChatMessage, ChatRole, Completion, CompletionRequest, LlmProvider,
    ProviderError,
};
use crate::stream::{parse_sse_line, SseParsed, StreamEvent};

/// OpenAI-compatible provider: chat completions and embeddings.
pub struct OpenAiProvider {
    client: reqwest::Client,
    default_key: Option<String>,
    base_url: String,
    llm_timeout: Duration,
    embed_timeout: Duration,
}

impl OpenAiProvider {
    pub fn new(
        default_key: Option<String>,
        base_url: String,
        llm_timeout: Duration,
        embed_timeout: Duration,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            default_key,
            base_url,
            llm_timeout,
            embed_timeout,
        }
    }

    fn key<'a>(&'a self, override_key: Option<&'a str>) -> Result<&'a str, ProviderError> {
        override_key
            .or(self.default_key.as_deref())
            .ok_or(ProviderError::Auth)
    }
}

fn build_request_body(req: &CompletionRequest, stream: bool) -> serde_json::Value {
    let messages: Vec<serde_json::Value> = req
        .messages
        .iter()
        .map(|m| {
            serde_json::json!({
                "role": match m.role {
                    ChatRole::System => "system",
                    ChatRole::User => "user",
                    ChatRole::Assistant => "assistant",
                },
                "content": m.content,
            })
        })
        .collect();

    let mut body = serde_json::json!({
        "model": req.model,
        "messages": messages,
        "max_tokens": req.max_tokens,
        "temperature": req.temperature,
        "stream": stream,
    });
    if stream {
        // Ask for usage on the final chunk so Done can carry real numbers.
        body["stream_options"] = serde_json::json!({"include_usage": true});
    }
    body
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn embed(
        &self,
        model: &str,
        texts: &[String],
        api_key: Option<&str>,
    ) -> Result<Vec<Vec<f32>>, ProviderError> {
        let key = self.key(api_key)?;
        let url = format!("{}/v1/embeddings", self.base_url);

        debug!(model, batch = texts.len(), "sending embedding request");

        let resp = self
            .client
            .post(&url)
            .bearer_auth(key)
            .timeout(self.embed_timeout)
            .json(&serde_json::json!({ "model": model, "input": texts }))
            .send()
            .await?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, "embedding API error");
            return Err(classify_status(status, text));
        }

        let api_resp: EmbeddingResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;

        let mut data = api_resp.data;
        data.sort_by_key(|d| d.index);
        Ok(data.into_iter().map(|d| d.embedding).collect())
    }

    async fn complete(
        &self,
        req: &CompletionRequest,
        api_key: Option<&str>,
    ) -> Result<Completion, ProviderError> {
        let key = self.key(api_key)?;
        let body = build_request_body(req, false);
        let url = format!("{}/v1/chat/completions", self.base_url);

        debug!(model = %req.model, "sending completion request");

        let resp = self
            .client
            .post(&url)
            .bearer_auth(key)
            .timeout(self.llm_timeout)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, "completion API error");
            return Err(classify_status(status, text));
        }

        let api_resp: ApiResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;

        let content = api_resp
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();

        Ok(Completion {
            content,
            model: api_resp.model,
            prompt_tokens: api_resp.usage.as_ref().map(|u| u.prompt_tokens).unwrap_or(0),
            completion_tokens: api_resp
                .usage
                .as_ref()
                .map(|u| u.completion_tokens)
                .unwrap_or(0),
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
        let url = format!("{}/v1/chat/completions", self.base_url);

        debug!(model = %req.model, "sending streaming completion request");

        let resp = self
            .client
            .post(&url)
            .bearer_auth(key)
            .timeout(self.llm_timeout)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, "streaming completion API error");
            return Err(classify_status(status, text));
        }

        process_openai_stream(resp, req.model.clone(), tx).await;
        Ok(())
    }
}

/// Parse an OpenAI streaming SSE response and emit StreamEvents. Each data
/// line is a JSON delta chunk; `data: [DONE]` signals the end.
async fn process_openai_stream(
    resp: reqwest::Response,
    model: String,
    tx: mpsc::Sender<StreamEvent>,
) {
    use futures_util::StreamExt;

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

        line_buf.push_str(text);
        let lines: Vec<&str> = line_buf.split('\n').collect();
        let (complete, remainder) = lines.split_at(lines.len() - 1);
        let remainder = remainder.first().unwrap_or(&"").to_string();

        for line in complete {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            if let Some(SseParsed::Data(data)) = parse_sse_line(line) {
                if data.trim() == "[DONE]" {
                    break;
                }

                if let Ok(chunk_resp) = serde_json::from_str::<StreamChunk>(&data) {
                    if let Some(usage) = &chunk_resp.usage {
                        prompt_tokens = usage.prompt_tokens;
                        completion_tokens = usage.completion_tokens;
                    }

                    for choice in &chunk_resp.choices {
                        if let Some(content) = &choice.delta.content {
                            if !content.is_empty()
                                && tx
                                    .send(StreamEvent::Delta {
                                        text: content.clone(),
                                    })
                                    .await
                                    .is_err()
                            {
                                return; // receiver dropped
                            }
                        }
                    }
                }
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

// OpenAI API response types (deserialization only)

#[derive(Deserialize)]
struct ApiResponse {
    model: String,
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    index: usize,
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Deserialize)]
struct StreamDelta {
    content: Option<String>,
}
