use std::sync::Arc;

use axum::http::HeaderValue;
use axum::routing::{get, patch, post};
use axum::Router;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use minirag_core::config::MiniragConfig;
use minirag_crypto::{FieldCipher, SessionSigner};
use minirag_hooks::WebhookDispatcher;
use minirag_llm::ProviderRouter;
use minirag_queue::JobQueue;
use minirag_rag::RagOrchestrator;
use minirag_store::MetaStore;
use minirag_vector::VectorStore;

use crate::stats_cache::StatsCache;

/// Central shared state; the explicit application context constructed at
/// startup. Keys, pools, and clients are immutable from here on; handlers
/// receive it as `Arc<AppState>`.
pub struct AppState {
    pub config: MiniragConfig,
    pub store: MetaStore,
    pub vector: Arc<dyn VectorStore>,
    pub queue: JobQueue,
    pub llm: Arc<ProviderRouter>,
    pub hooks: WebhookDispatcher,
    pub cipher: Arc<FieldCipher>,
    pub signer: SessionSigner,
    pub orchestrator: RagOrchestrator,
    pub stats: StatsCache,
}

/// Assemble the full Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state.config);

    Router::new()
        .route("/v1/tenants", post(crate::http::tenants::bootstrap))
        .route("/v1/tenants/me", get(crate::http::tenants::current_tenant))
        .route("/v1/auth/login", post(crate::http::auth::login))
        .route("/v1/auth/me", get(crate::http::auth::me))
        .route(
            "/v1/api-tokens",
            post(crate::http::tokens::create).get(crate::http::tokens::list),
        )
        .route(
            "/v1/api-tokens/{id}",
            axum::routing::delete(crate::http::tokens::revoke),
        )
        .route(
            "/v1/bot-profiles",
            post(crate::http::bots::create).get(crate::http::bots::list),
        )
        .route(
            "/v1/bot-profiles/{id}",
            get(crate::http::bots::get_one)
                .patch(crate::http::bots::update)
                .delete(crate::http::bots::delete),
        )
        .route(
            "/v1/sources",
            post(crate::http::sources::create).get(crate::http::sources::list),
        )
        .route("/v1/sources/upload", post(crate::http::sources::upload))
        .route("/v1/sources/batch", post(crate::http::sources::batch))
        .route(
            "/v1/sources/{id}",
            get(crate::http::sources::get_one)
                .patch(crate::http::sources::update)
                .delete(crate::http::sources::delete),
        )
        .route("/v1/sources/{id}/ingest", post(crate::http::sources::ingest))
        .route(
            "/v1/chat",
            post(crate::http::chat::send).get(crate::http::chat::list),
        )
        .route("/v1/chat/{id}", get(crate::http::chat::get_one))
        .route("/v1/chat/{id}/messages", get(crate::http::chat::messages))
        .route(
            "/v1/chat/{id}/messages/{mid}/feedback",
            patch(crate::http::chat::feedback),
        )
        .route(
            "/v1/webhooks",
            post(crate::http::webhooks::create).get(crate::http::webhooks::list),
        )
        .route(
            "/v1/webhooks/{id}",
            axum::routing::delete(crate::http::webhooks::delete),
        )
        .route("/v1/webhooks/{id}/test", post(crate::http::webhooks::test))
        .route("/v1/stats/overview", get(crate::http::stats::overview))
        .route("/v1/stats/usage", get(crate::http::stats::usage))
        .route("/v1/stats/cost", get(crate::http::stats::cost))
        .route("/v1/stats/feedback", get(crate::http::stats::feedback))
        .route(
            "/v1/users",
            post(crate::http::users::create).get(crate::http::users::list),
        )
        .route(
            "/v1/users/{id}",
            get(crate::http::users::get_one)
                .patch(crate::http::users::update)
                .delete(crate::http::users::delete),
        )
        .route("/v1/system/health", get(crate::http::system::health))
        .with_state(state)
        .layer(cors)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

fn cors_layer(config: &MiniragConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .cors
        .allowed_origins
        .iter()
        .filter_map(|o| o.parse().ok())
        .collect();

    if origins.is_empty() {
        // No configured origins: the dashboard is same-origin; the widget
        // needs explicit configuration to talk cross-origin.
        CorsLayer::new()
    } else if config.cors.allowed_origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods(Any)
            .allow_headers(Any)
    }
}
