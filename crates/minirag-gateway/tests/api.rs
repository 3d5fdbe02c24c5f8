//! End-to-end tests through the full router: bootstrap, auth, tenant
//! isolation, ingestion, retrieval-grounded chat, and SSE streaming. A stub
//! provider stands in for the LLM/embedding backends; everything else is
//! the real stack on in-memory storage.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tower::ServiceExt;

use minirag_core::config::MiniragConfig;
use minirag_crypto::{FieldCipher, SessionSigner};
use minirag_gateway::app::{build_router, AppState};
use minirag_gateway::stats_cache::StatsCache;
use minirag_hooks::WebhookDispatcher;
use minirag_ingest::{IngestWorker, INGEST_JOB};
use minirag_llm::{
    Completion, CompletionRequest, LlmProvider, ProviderError, ProviderRouter, StreamEvent,
};
use minirag_queue::{JobQueue, QueueWorker};
use minirag_rag::RagOrchestrator;
use minirag_store::MetaStore;
use minirag_vector::MemoryStore;

const STUB_ANSWER: &str = "It supports multi-tenancy.";
const STUB_PROMPT_TOKENS: u32 = 42;
const STUB_COMPLETION_TOKENS: u32 = 7;

/// Deterministic stand-in for both chat and embedding providers.
struct StubProvider;

fn stub_embedding(text: &str) -> Vec<f32> {
    let mut v = [1.0f32; 4];
    for (i, b) in text.bytes().enumerate() {
        v[i % 4] += (b as f32) / 255.0;
    }
    v.to_vec()
}

#[async_trait]
impl LlmProvider for StubProvider {
    fn name(&self) -> &str {
        "stub"
    }

    async fn embed(
        &self,
        _model: &str,
        texts: &[String],
        _api_key: Option<&str>,
    ) -> Result<Vec<Vec<f32>>, ProviderError> {
        Ok(texts.iter().map(|t| stub_embedding(t)).collect())
    }

    async fn complete(
        &self,
        req: &CompletionRequest,
        _api_key: Option<&str>,
    ) -> Result<Completion, ProviderError> {
        Ok(Completion {
            content: STUB_ANSWER.to_string(),
            model: req.model.clone(),
            prompt_tokens: STUB_PROMPT_TOKENS,
            completion_tokens: STUB_COMPLETION_TOKENS,
        })
    }

    async fn complete_stream(
        &self,
        req: &CompletionRequest,
        _api_key: Option<&str>,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<(), ProviderError> {
        for part in ["Hello", ", world"] {
            let _ = tx
                .send(StreamEvent::Delta {
                    text: part.to_string(),
                })
                .await;
        }
        let _ = tx
            .send(StreamEvent::Done {
                model: req.model.clone(),
                prompt_tokens: STUB_PROMPT_TOKENS,
                completion_tokens: STUB_COMPLETION_TOKENS,
            })
            .await;
        Ok(())
    }
}

struct TestApp {
    router: axum::Router,
    worker: QueueWorker,
    vector: Arc<MemoryStore>,
    store: MetaStore,
}

fn test_app() -> TestApp {
    let mut config = MiniragConfig::default();
    config.security.encryption_key = "ab".repeat(32);
    config.security.session_signing_key = "test-signing-key".to_string();

    let store = MetaStore::open_in_memory().unwrap();
    let queue = JobQueue::open_in_memory().unwrap();
    let vector = Arc::new(MemoryStore::new());
    let llm = Arc::new(ProviderRouter::with_providers(
        Arc::new(StubProvider),
        Arc::new(StubProvider),
    ));
    let cipher = Arc::new(FieldCipher::from_key_material(&config.security.encryption_key).unwrap());
    let signer = SessionSigner::new(
        &config.security.session_signing_key,
        config.session_ttl_secs(),
    );
    let hooks = WebhookDispatcher::new(store.clone(), Duration::from_secs(10));
    let orchestrator = RagOrchestrator::new(
        store.clone(),
        vector.clone(),
        llm.clone(),
        hooks.clone(),
        cipher.clone(),
        config.models.default_embedding_model.clone(),
        Duration::from_secs(10),
    );

    let mut worker = QueueWorker::new(queue.clone(), Duration::from_millis(10));
    worker.register(
        INGEST_JOB,
        Arc::new(IngestWorker::new(
            store.clone(),
            vector.clone(),
            llm.clone(),
            hooks.clone(),
            cipher.clone(),
            config.models.default_embedding_model.clone(),
            Duration::from_secs(30),
        )),
    );

    let state = Arc::new(AppState {
        config,
        store: store.clone(),
        vector: vector.clone(),
        queue,
        llm,
        hooks,
        cipher,
        signer,
        orchestrator,
        stats: StatsCache::new(),
    });

    TestApp {
        router: build_router(state),
        worker,
        vector,
        store,
    }
}

async fn request(
    router: &axum::Router,
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

async fn bootstrap(router: &axum::Router, slug: &str) -> (String, Value) {
    let (status, body) = request(
        router,
        "POST",
        "/v1/tenants",
        None,
        Some(json!({
            "tenant_slug": slug,
            "owner_email": format!("owner@{}.test", slug),
            "owner_password": "pw12345678",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let token = body["api_token"].as_str().unwrap().to_string();
    (token, body)
}

async fn create_bot(router: &axum::Router, token: &str) -> String {
    let (status, body) = request(
        router,
        "POST",
        "/v1/bot-profiles",
        Some(token),
        Some(json!({"name": "support", "system_prompt": "Be helpful."})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    body["id"].as_str().unwrap().to_string()
}

async fn create_text_source(router: &axum::Router, token: &str, bot_id: &str) -> String {
    let (status, body) = request(
        router,
        "POST",
        "/v1/sources",
        Some(token),
        Some(json!({
            "bot_profile_id": bot_id,
            "name": "docs",
            "source_type": "text",
            "content": "MiniRAG is a RAG platform. It supports multi-tenancy.",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["status"], "pending");
    body["id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn bootstrap_then_authenticate() {
    let app = test_app();

    let (token, body) = bootstrap(&app.router, "acme").await;
    assert!(token.starts_with("mrk_"));
    assert!(!token.contains('.'));
    assert_eq!(body["user"]["role"], "owner");
    assert_eq!(body["tenant"]["slug"], "acme");
    // The digest never appears in the response.
    assert!(body["token"].get("token_hash").is_none());

    // Same slug again conflicts.
    let (status, _) = request(
        &app.router,
        "POST",
        "/v1/tenants",
        None,
        Some(json!({
            "tenant_slug": "acme",
            "owner_email": "other@acme.test",
            "owner_password": "pw12345678",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    // The raw API token authenticates.
    let (status, me) = request(&app.router, "GET", "/v1/auth/me", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["user"]["email"], "owner@acme.test");
    assert_eq!(me["tenant"]["slug"], "acme");

    // Password login yields a dotted session token that also authenticates.
    let (status, login) = request(
        &app.router,
        "POST",
        "/v1/auth/login",
        None,
        Some(json!({"email": "owner@acme.test", "password": "pw12345678"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let session = login["token"].as_str().unwrap();
    assert!(session.contains('.'));
    let (status, _) = request(&app.router, "GET", "/v1/auth/me", Some(session), None).await;
    assert_eq!(status, StatusCode::OK);

    // Wrong password fails closed.
    let (status, _) = request(
        &app.router,
        "POST",
        "/v1/auth/login",
        None,
        Some(json!({"email": "owner@acme.test", "password": "wrong-pass"})),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn unauthenticated_requests_are_rejected() {
    let app = test_app();
    let (status, _) = request(&app.router, "GET", "/v1/auth/me", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) =
        request(&app.router, "GET", "/v1/bot-profiles", Some("mrk_bogus"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = request(&app.router, "GET", "/v1/auth/me", Some("a.b"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn revoked_token_stops_authenticating() {
    let app = test_app();
    let (token, body) = bootstrap(&app.router, "acme").await;
    let token_id = body["token"]["id"].as_str().unwrap().to_string();

    let (status, _) = request(
        &app.router,
        "DELETE",
        &format!("/v1/api-tokens/{}", token_id),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = request(&app.router, "GET", "/v1/auth/me", Some(&token), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn cross_tenant_references_are_invalid_input() {
    let app = test_app();
    let (token_a, _) = bootstrap(&app.router, "acme").await;
    let (token_b, _) = bootstrap(&app.router, "beta").await;

    let bot_a = create_bot(&app.router, &token_a).await;

    // Tenant B referencing tenant A's bot: 422, not 404 or success.
    let (status, body) = request(
        &app.router,
        "POST",
        "/v1/sources",
        Some(&token_b),
        Some(json!({
            "bot_profile_id": bot_a,
            "name": "sneaky",
            "source_type": "text",
            "content": "data",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["detail"].as_str().unwrap().contains("bot_profile_id"));

    // Direct reads across the boundary are plain 404s.
    let (status, _) = request(
        &app.router,
        "GET",
        &format!("/v1/bot-profiles/{}", bot_a),
        Some(&token_b),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // Tenant B's listings never contain tenant A's rows.
    let (_, bots_b) = request(&app.router, "GET", "/v1/bot-profiles", Some(&token_b), None).await;
    assert_eq!(bots_b.as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn ingest_then_chat_grounds_on_the_source() {
    let app = test_app();
    let (token, _) = bootstrap(&app.router, "acme").await;
    let bot_id = create_bot(&app.router, &token).await;
    let source_id = create_text_source(&app.router, &token, &bot_id).await;

    // Enqueue: 202, never inline.
    let (status, body) = request(
        &app.router,
        "POST",
        &format!("/v1/sources/{}/ingest", source_id),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["status"], "queued");

    // Drive the worker one poll; the source lands in `ready`.
    app.worker.tick().await;
    let (_, source) = request(
        &app.router,
        "GET",
        &format!("/v1/sources/{}", source_id),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(source["status"], "ready");
    assert!(source["chunk_count"].as_u64().unwrap() >= 1);
    assert!(source["last_refreshed_at"].is_string());
    assert_eq!(app.vector.len(), source["chunk_count"].as_u64().unwrap() as usize);

    // Chat: retrieval set is non-empty and the top chunk carries the fact.
    let (status, turn) = request(
        &app.router,
        "POST",
        "/v1/chat",
        Some(&token),
        Some(json!({
            "bot_profile_id": bot_id,
            "message": "What does it support?",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let sources = turn["sources"].as_array().unwrap();
    assert!(!sources.is_empty());
    assert!(sources[0]["content"]
        .as_str()
        .unwrap()
        .contains("multi-tenancy"));
    assert_eq!(turn["content"], STUB_ANSWER);
    assert_eq!(turn["usage"]["prompt_tokens"], STUB_PROMPT_TOKENS);

    // Usage accounting folds into the chat totals.
    let chat_id = turn["chat_id"].as_str().unwrap();
    let (_, chat) = request(
        &app.router,
        "GET",
        &format!("/v1/chat/{}", chat_id),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(chat["total_prompt_tokens"], STUB_PROMPT_TOKENS);
    assert_eq!(chat["total_completion_tokens"], STUB_COMPLETION_TOKENS);

    // Both turn messages are persisted in order.
    let (_, messages) = request(
        &app.router,
        "GET",
        &format!("/v1/chat/{}/messages", chat_id),
        Some(&token),
        None,
    )
    .await;
    let messages = messages.as_array().unwrap().clone();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0]["role"], "user");
    assert_eq!(messages[1]["role"], "assistant");
    assert_eq!(messages[1]["content"], STUB_ANSWER);
}

#[tokio::test]
async fn reingest_is_idempotent_on_vector_ids() {
    let app = test_app();
    let (token, _) = bootstrap(&app.router, "acme").await;
    let bot_id = create_bot(&app.router, &token).await;
    let source_id = create_text_source(&app.router, &token, &bot_id).await;

    for _ in 0..2 {
        let (status, _) = request(
            &app.router,
            "POST",
            &format!("/v1/sources/{}/ingest", source_id),
            Some(&token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        app.worker.tick().await;
    }

    let (_, source) = request(
        &app.router,
        "GET",
        &format!("/v1/sources/{}", source_id),
        Some(&token),
        None,
    )
    .await;
    let chunk_count = source["chunk_count"].as_u64().unwrap() as usize;
    assert_eq!(app.vector.len(), chunk_count);

    // Chunk rows and vector ids line up after the second run.
    let tenant_id = source["tenant_id"].as_str().unwrap();
    let chunks = app.store.list_chunks_by_source(&source_id, tenant_id).unwrap();
    assert_eq!(chunks.len(), chunk_count);
}

#[tokio::test]
async fn streaming_chat_emits_sources_deltas_done() {
    let app = test_app();
    let (token, _) = bootstrap(&app.router, "acme").await;
    let bot_id = create_bot(&app.router, &token).await;
    let source_id = create_text_source(&app.router, &token, &bot_id).await;
    request(
        &app.router,
        "POST",
        &format!("/v1/sources/{}/ingest", source_id),
        Some(&token),
        None,
    )
    .await;
    app.worker.tick().await;

    let req = Request::builder()
        .method("POST")
        .uri("/v1/chat")
        .header("authorization", format!("Bearer {}", token))
        .header("content-type", "application/json")
        .body(Body::from(
            json!({
                "bot_profile_id": bot_id,
                "message": "What does it support?",
                "stream": true,
            })
            .to_string(),
        ))
        .unwrap();

    let response = app.router.clone().oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(content_type.starts_with("text/event-stream"));
    assert_eq!(response.headers().get("cache-control").unwrap(), "no-cache");
    assert_eq!(response.headers().get("x-accel-buffering").unwrap(), "no");

    let body = response.into_body().collect().await.unwrap().to_bytes();
    let text = String::from_utf8(body.to_vec()).unwrap();

    // Ordered event names: sources, then deltas, then done.
    let event_names: Vec<&str> = text
        .lines()
        .filter_map(|line| line.strip_prefix("event: "))
        .collect();
    assert_eq!(event_names.first(), Some(&"sources"));
    assert_eq!(event_names.last(), Some(&"done"));
    assert_eq!(event_names.iter().filter(|n| **n == "delta").count(), 2);

    // Concatenated deltas equal the persisted assistant content.
    let mut streamed = String::new();
    let mut done_payload = None;
    let mut current_event = "";
    for line in text.lines() {
        if let Some(name) = line.strip_prefix("event: ") {
            current_event = name;
        } else if let Some(data) = line.strip_prefix("data: ") {
            match current_event {
                "delta" => {
                    let v: Value = serde_json::from_str(data).unwrap();
                    streamed.push_str(v["content"].as_str().unwrap());
                }
                "done" => done_payload = Some(serde_json::from_str::<Value>(data).unwrap()),
                _ => {}
            }
        }
    }
    assert_eq!(streamed, "Hello, world");

    let done = done_payload.expect("done event present");
    let chat_id = done["chat_id"].as_str().unwrap();
    assert_eq!(done["usage"]["completion_tokens"], STUB_COMPLETION_TOKENS);

    let (_, messages) = request(
        &app.router,
        "GET",
        &format!("/v1/chat/{}/messages", chat_id),
        Some(&token),
        None,
    )
    .await;
    let messages = messages.as_array().unwrap().clone();
    let assistant = messages.last().unwrap();
    assert_eq!(assistant["role"], "assistant");
    assert_eq!(assistant["content"], "Hello, world");
    assert_eq!(assistant["id"], done["message_id"]);
}

#[tokio::test]
async fn feedback_validation_and_update() {
    let app = test_app();
    let (token, _) = bootstrap(&app.router, "acme").await;
    let bot_id = create_bot(&app.router, &token).await;

    let (_, turn) = request(
        &app.router,
        "POST",
        "/v1/chat",
        Some(&token),
        Some(json!({"bot_profile_id": bot_id, "message": "hi"})),
    )
    .await;
    let chat_id = turn["chat_id"].as_str().unwrap();
    let message_id = turn["message_id"].as_str().unwrap();
    let uri = format!("/v1/chat/{}/messages/{}/feedback", chat_id, message_id);

    let (status, updated) = request(
        &app.router,
        "PATCH",
        &uri,
        Some(&token),
        Some(json!({"feedback": "positive"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["feedback"], "positive");

    let (status, _) = request(
        &app.router,
        "PATCH",
        &uri,
        Some(&token),
        Some(json!({"feedback": "meh"})),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, cleared) = request(
        &app.router,
        "PATCH",
        &uri,
        Some(&token),
        Some(json!({"feedback": null})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(cleared["feedback"].is_null());
}

#[tokio::test]
async fn member_cannot_manage_users() {
    let app = test_app();
    let (owner_token, _) = bootstrap(&app.router, "acme").await;

    let (status, _) = request(
        &app.router,
        "POST",
        "/v1/users",
        Some(&owner_token),
        Some(json!({"email": "member@acme.test", "password": "pw12345678", "role": "member"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (_, login) = request(
        &app.router,
        "POST",
        "/v1/auth/login",
        None,
        Some(json!({"email": "member@acme.test", "password": "pw12345678"})),
    )
    .await;
    let member_session = login["token"].as_str().unwrap();

    let (status, _) = request(&app.router, "GET", "/v1/users", Some(member_session), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = request(
        &app.router,
        "POST",
        "/v1/users",
        Some(member_session),
        Some(json!({"email": "x@acme.test", "password": "pw12345678"})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn health_reports_dependency_status() {
    let app = test_app();
    let (token, _) = bootstrap(&app.router, "acme").await;

    let (status, health) = request(&app.router, "GET", "/v1/system/health", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "ok");
    assert_eq!(health["store"]["ok"], true);
    assert_eq!(health["vector"]["ok"], true);
    assert_eq!(health["queue"]["ok"], true);
}

#[tokio::test]
async fn stats_reflect_activity() {
    let app = test_app();
    let (token, _) = bootstrap(&app.router, "acme").await;
    let bot_id = create_bot(&app.router, &token).await;
    let (_, turn) = request(
        &app.router,
        "POST",
        "/v1/chat",
        Some(&token),
        Some(json!({"bot_profile_id": bot_id, "message": "hi"})),
    )
    .await;
    assert!(turn["message_id"].is_string());

    let (status, overview) = request(
        &app.router,
        "GET",
        "/v1/stats/overview",
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(overview["bot_count"], 1);
    assert_eq!(overview["chat_count"], 1);
    assert_eq!(overview["total_prompt_tokens"], STUB_PROMPT_TOKENS);

    let (status, cost) = request(&app.router, "GET", "/v1/stats/cost", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    let models = cost["models"].as_array().unwrap();
    assert_eq!(models.len(), 1);
    assert_eq!(models[0]["known_model"], true);
}
