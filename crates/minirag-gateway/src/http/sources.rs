use std::sync::Arc;

use axum::extract::{Multipart, Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;

use minirag_ingest::extract::{BasicExtractor, ContentExtractor};
use minirag_ingest::INGEST_JOB;
use minirag_store::sources::SourcePatch;
use minirag_store::types::{RefreshSchedule, Source, SourceType};

use crate::admission::cross_tenant_ref;
use crate::app::AppState;
use crate::auth::resolve_bearer;
use crate::error::{ApiError, ApiResult};

#[derive(Deserialize)]
pub struct CreateSourceRequest {
    pub bot_profile_id: String,
    pub name: String,
    pub source_type: SourceType,
    pub content: String,
    #[serde(default)]
    pub config: Option<serde_json::Value>,
    #[serde(default)]
    pub refresh_schedule: Option<RefreshSchedule>,
    #[serde(default)]
    pub parent_source_id: Option<String>,
}

#[derive(Deserialize)]
pub struct UpdateSourceRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub config: Option<serde_json::Value>,
    #[serde(default)]
    pub refresh_schedule: Option<RefreshSchedule>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

#[derive(Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub bot_profile_id: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
}

fn default_limit() -> u32 {
    50
}

fn config_json(config: Option<serde_json::Value>) -> ApiResult<String> {
    match config {
        None => Ok("{}".to_string()),
        Some(value) if value.is_object() => serde_json::to_string(&value)
            .map_err(|_| ApiError::InvalidInput("config is not serializable".to_string())),
        Some(_) => Err(ApiError::InvalidInput(
            "config must be a JSON object".to_string(),
        )),
    }
}

/// Shared admission for new sources: the referenced bot must live in the
/// caller's tenant, and a parent must be a root source of the same tenant
/// (one level of nesting; anything deeper would allow cycles).
fn admit_source_refs(
    state: &AppState,
    tenant_id: &str,
    bot_profile_id: &str,
    parent_source_id: Option<&str>,
) -> ApiResult<()> {
    cross_tenant_ref(
        state.store.get_bot_profile(bot_profile_id, tenant_id),
        "bot_profile_id",
    )?;

    if let Some(parent_id) = parent_source_id {
        let parent = cross_tenant_ref(
            state.store.get_source(parent_id, tenant_id),
            "parent_source_id",
        )?;
        if parent.parent_source_id.is_some() {
            return Err(ApiError::InvalidInput(
                "parent_source_id must reference a root source".to_string(),
            ));
        }
    }
    Ok(())
}

/// POST /v1/sources
pub async fn create(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<CreateSourceRequest>,
) -> ApiResult<(StatusCode, Json<Source>)> {
    let auth = resolve_bearer(&state, &headers)?;

    if req.name.trim().is_empty() {
        return Err(ApiError::InvalidInput("name must not be empty".to_string()));
    }
    if req.content.trim().is_empty() {
        return Err(ApiError::InvalidInput("content must not be empty".to_string()));
    }
    match req.source_type {
        SourceType::Upload => {
            return Err(ApiError::InvalidInput(
                "upload sources go through /v1/sources/upload".to_string(),
            ))
        }
        SourceType::Url => {
            if !req.content.starts_with("http://") && !req.content.starts_with("https://") {
                return Err(ApiError::InvalidInput(
                    "url sources need an http(s) content URL".to_string(),
                ));
            }
        }
        SourceType::Text => {}
    }

    admit_source_refs(
        &state,
        &auth.tenant_id,
        &req.bot_profile_id,
        req.parent_source_id.as_deref(),
    )?;

    let source = state.store.create_source(
        &auth.tenant_id,
        &req.bot_profile_id,
        req.parent_source_id.as_deref(),
        req.source_type,
        req.name.trim(),
        &req.content,
        &config_json(req.config)?,
        req.refresh_schedule.unwrap_or_default(),
    )?;

    Ok((StatusCode::CREATED, Json(source)))
}

/// POST /v1/sources/upload: multipart file source. The file is reduced to
/// text at upload time; the stored source then behaves like a text source.
pub async fn upload(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> ApiResult<(StatusCode, Json<Source>)> {
    let auth = resolve_bearer(&state, &headers)?;

    let mut bot_profile_id: Option<String> = None;
    let mut name: Option<String> = None;
    let mut content: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::InvalidInput(format!("bad multipart body: {}", e)))?
    {
        match field.name().unwrap_or("") {
            "bot_profile_id" => {
                bot_profile_id = Some(field.text().await.map_err(|e| {
                    ApiError::InvalidInput(format!("bad bot_profile_id field: {}", e))
                })?);
            }
            "name" => {
                name = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| ApiError::InvalidInput(format!("bad name field: {}", e)))?,
                );
            }
            "file" => {
                let file_name = field.file_name().unwrap_or("upload").to_string();
                let content_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::InvalidInput(format!("bad file field: {}", e)))?;

                let text = BasicExtractor
                    .extract(&bytes, &content_type)
                    .map_err(|e| ApiError::InvalidInput(format!("unreadable file: {}", e)))?;
                content = Some(text);
                if name.is_none() {
                    name = Some(file_name);
                }
            }
            _ => {}
        }
    }

    let bot_profile_id = bot_profile_id
        .ok_or_else(|| ApiError::InvalidInput("bot_profile_id field is required".to_string()))?;
    let content =
        content.ok_or_else(|| ApiError::InvalidInput("file field is required".to_string()))?;
    if content.trim().is_empty() {
        return Err(ApiError::InvalidInput("file contains no text".to_string()));
    }

    admit_source_refs(&state, &auth.tenant_id, &bot_profile_id, None)?;

    let source = state.store.create_source(
        &auth.tenant_id,
        &bot_profile_id,
        None,
        SourceType::Upload,
        name.as_deref().unwrap_or("upload"),
        &content,
        "{}",
        RefreshSchedule::None,
    )?;

    Ok((StatusCode::CREATED, Json(source)))
}

#[derive(Deserialize)]
pub struct BatchChild {
    pub name: String,
    pub source_type: SourceType,
    pub content: String,
    #[serde(default)]
    pub config: Option<serde_json::Value>,
}

#[derive(Deserialize)]
pub struct BatchRequest {
    pub parent_source_id: String,
    pub sources: Vec<BatchChild>,
}

/// POST /v1/sources/batch: create children under an existing parent.
pub async fn batch(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<BatchRequest>,
) -> ApiResult<(StatusCode, Json<Vec<Source>>)> {
    let auth = resolve_bearer(&state, &headers)?;
    if req.sources.is_empty() {
        return Err(ApiError::InvalidInput("sources must not be empty".to_string()));
    }

    let parent = cross_tenant_ref(
        state.store.get_source(&req.parent_source_id, &auth.tenant_id),
        "parent_source_id",
    )?;
    if parent.parent_source_id.is_some() {
        return Err(ApiError::InvalidInput(
            "parent_source_id must reference a root source".to_string(),
        ));
    }

    let mut created = Vec::with_capacity(req.sources.len());
    for child in req.sources {
        if child.name.trim().is_empty() || child.content.trim().is_empty() {
            return Err(ApiError::InvalidInput(
                "every child needs a name and content".to_string(),
            ));
        }
        if child.source_type == SourceType::Upload {
            return Err(ApiError::InvalidInput(
                "upload sources go through /v1/sources/upload".to_string(),
            ));
        }
        created.push(state.store.create_source(
            &auth.tenant_id,
            &parent.bot_profile_id,
            Some(&parent.id),
            child.source_type,
            child.name.trim(),
            &child.content,
            &config_json(child.config)?,
            RefreshSchedule::None,
        )?);
    }

    Ok((StatusCode::CREATED, Json(created)))
}

/// GET /v1/sources
pub async fn list(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Vec<Source>>> {
    let auth = resolve_bearer(&state, &headers)?;
    Ok(Json(state.store.list_sources(
        &auth.tenant_id,
        query.bot_profile_id.as_deref(),
        query.limit.min(200),
        query.offset,
    )?))
}

/// GET /v1/sources/{id}
pub async fn get_one(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Json<Source>> {
    let auth = resolve_bearer(&state, &headers)?;
    Ok(Json(state.store.get_source(&id, &auth.tenant_id)?))
}

/// PATCH /v1/sources/{id}
pub async fn update(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<UpdateSourceRequest>,
) -> ApiResult<Json<Source>> {
    let auth = resolve_bearer(&state, &headers)?;

    let config = match req.config {
        None => None,
        some => Some(config_json(some)?),
    };

    let source = state.store.update_source(
        &id,
        &auth.tenant_id,
        SourcePatch {
            name: req.name,
            content: req.content,
            config,
            refresh_schedule: req.refresh_schedule,
            is_active: req.is_active,
        },
    )?;
    Ok(Json(source))
}

/// DELETE /v1/sources/{id}: soft delete; the indexed vectors are reclaimed
/// in the background.
pub async fn delete(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    let auth = resolve_bearer(&state, &headers)?;
    state.store.soft_delete_source(&id, &auth.tenant_id)?;

    let vector = state.vector.clone();
    let tenant_id = auth.tenant_id.clone();
    tokio::spawn(async move {
        if let Err(e) = vector.delete_by_source(&tenant_id, &id).await {
            tracing::warn!(source_id = %id, "vector reclamation failed: {e}");
        }
    });

    Ok(StatusCode::NO_CONTENT)
}

#[derive(Serialize)]
pub struct IngestResponse {
    pub job_id: String,
    pub status: &'static str,
}

/// POST /v1/sources/{id}/ingest: enqueue, never inline. 202 with the job id.
pub async fn ingest(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<(StatusCode, Json<IngestResponse>)> {
    let auth = resolve_bearer(&state, &headers)?;
    let source = state.store.get_source(&id, &auth.tenant_id)?;
    if !source.is_active {
        return Err(ApiError::NotFound("source not found".to_string()));
    }

    let job_id = state.queue.enqueue(
        INGEST_JOB,
        serde_json::json!({
            "source_id": source.id,
            "tenant_id": auth.tenant_id,
        }),
    )?;

    info!(source_id = %source.id, job_id = %job_id, "ingest enqueued");
    Ok((
        StatusCode::ACCEPTED,
        Json(IngestResponse {
            job_id,
            status: "queued",
        }),
    ))
}
