use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;

use crate::app::AppState;
use crate::auth::resolve_bearer;
use crate::error::ApiResult;
use crate::stats_cache::StatsCache;

#[derive(Deserialize)]
pub struct UsageQuery {
    #[serde(default = "default_days")]
    pub days: u32,
}

fn default_days() -> u32 {
    7
}

/// GET /v1/stats/overview
pub async fn overview(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<Json<serde_json::Value>> {
    let auth = resolve_bearer(&state, &headers)?;
    let key = StatsCache::key("overview", &auth.tenant_id, "");
    let value = state.stats.get_or(key, || {
        let overview = state.store.stats_overview(&auth.tenant_id)?;
        Ok(serde_json::to_value(overview).unwrap_or_default())
    })?;
    Ok(Json(value))
}

/// GET /v1/stats/usage?days=N
pub async fn usage(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<UsageQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let auth = resolve_bearer(&state, &headers)?;
    let days = query.days.clamp(1, 365);
    let key = StatsCache::key("usage", &auth.tenant_id, &days.to_string());
    let value = state.stats.get_or(key, || {
        let rows = state.store.usage_by_day(&auth.tenant_id, days)?;
        Ok(serde_json::json!({ "days": days, "usage": rows }))
    })?;
    Ok(Json(value))
}

/// GET /v1/stats/cost: per-model usage joined with the static price table.
/// Models without a price entry are flagged rather than silently zeroed.
pub async fn cost(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<Json<serde_json::Value>> {
    let auth = resolve_bearer(&state, &headers)?;
    let key = StatsCache::key("cost", &auth.tenant_id, "");
    let value = state.stats.get_or(key, || {
        let rows = state.store.usage_by_model(&auth.tenant_id)?;
        let mut total_usd = 0.0;
        let mut models = Vec::with_capacity(rows.len());
        for row in rows {
            let estimate =
                minirag_llm::cost(&row.model, row.prompt_tokens, row.completion_tokens);
            total_usd += estimate.cost_usd;
            models.push(serde_json::json!({
                "model": row.model,
                "prompt_tokens": row.prompt_tokens,
                "completion_tokens": row.completion_tokens,
                "cost_usd": estimate.cost_usd,
                "known_model": estimate.known_model,
            }));
        }
        Ok(serde_json::json!({ "total_usd": total_usd, "models": models }))
    })?;
    Ok(Json(value))
}

/// GET /v1/stats/feedback
pub async fn feedback(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<Json<serde_json::Value>> {
    let auth = resolve_bearer(&state, &headers)?;
    let key = StatsCache::key("feedback", &auth.tenant_id, "");
    let value = state.stats.get_or(key, || {
        let counts = state.store.feedback_counts(&auth.tenant_id)?;
        Ok(serde_json::to_value(counts).unwrap_or_default())
    })?;
    Ok(Json(value))
}
