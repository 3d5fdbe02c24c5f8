use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::Serialize;

use crate::app::AppState;
use crate::auth::resolve_bearer;
use crate::error::ApiResult;

#[derive(Serialize)]
pub struct HealthCheck {
    pub ok: bool,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub store: HealthCheck,
    pub vector: HealthCheck,
    pub queue: HealthCheck,
}

fn check<E: std::fmt::Display>(started: Instant, result: Result<(), E>) -> HealthCheck {
    match result {
        Ok(()) => HealthCheck {
            ok: true,
            latency_ms: started.elapsed().as_millis() as u64,
            error: None,
        },
        Err(e) => HealthCheck {
            ok: false,
            latency_ms: started.elapsed().as_millis() as u64,
            error: Some(e.to_string()),
        },
    }
}

/// GET /v1/system/health: live connectivity to the store, the vector
/// backend, and the queue.
pub async fn health(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<Json<HealthResponse>> {
    resolve_bearer(&state, &headers)?;

    let t = Instant::now();
    let store = check(t, state.store.ping());

    let t = Instant::now();
    let vector = check(t, state.vector.ping().await);

    let t = Instant::now();
    let queue = check(t, state.queue.ping());

    let status = if store.ok && vector.ok && queue.ok {
        "ok"
    } else {
        "degraded"
    };

    Ok(Json(HealthResponse {
        status,
        store,
        vector,
        queue,
    }))
}
