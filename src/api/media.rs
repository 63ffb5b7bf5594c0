//! Media endpoints
//!
//! POST /api/media/import mirrors a remote image (admin only).
//! GET  /api/media/{id}   returns a stored media record.

use axum::{
    Json, Router,
    extract::{Path, State, rejection::JsonRejection},
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::ApiError;
use crate::AppState;
use crate::services::{ImportOutcome, ImportRequest, MediaKind};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportBody {
    pub url: Option<String>,
    pub kind: Option<String>,
    pub slug_or_id: Option<String>,
    pub attribution: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ImportResponse {
    pub id: Uuid,
    pub storage_path: String,
    #[serde(rename = "publicUrl")]
    pub public_url: String,
    pub reused: bool,
}

impl From<ImportOutcome> for ImportResponse {
    fn from(outcome: ImportOutcome) -> Self {
        Self {
            id: outcome.id,
            storage_path: outcome.storage_path,
            public_url: outcome.public_url,
            reused: outcome.reused,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MediaResponse {
    pub id: Uuid,
    pub source_url: String,
    pub storage_path: String,
    #[serde(rename = "publicUrl")]
    pub public_url: String,
    pub format: String,
    pub byte_size: i64,
    pub content_hash: String,
    pub attribution: Option<String>,
    pub created_at: DateTime<Utc>,
}

fn required(value: Option<String>, field: &str) -> Result<String, ApiError> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError::BadRequest(format!("missing required field '{field}'")))
}

/// Turn a request body into an import request, rejecting missing or unknown fields
pub fn parse_import_body(body: ImportBody) -> Result<ImportRequest, ApiError> {
    let url = required(body.url, "url")?;
    let kind: MediaKind = required(body.kind, "kind")?.parse()?;

    Ok(ImportRequest {
        url,
        kind,
        slug_or_id: body.slug_or_id.filter(|s| !s.trim().is_empty()),
        attribution: body.attribution.filter(|s| !s.trim().is_empty()),
    })
}

/// Mirror a remote image into the media bucket
async fn import_media(
    State(state): State<AppState>,
    body: Result<Json<ImportBody>, JsonRejection>,
) -> Result<Json<ImportResponse>, ApiError> {
    if !state.config.admin_enabled {
        return Err(ApiError::Forbidden("admin access is disabled".to_string()));
    }

    let Json(body) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let request = parse_import_body(body)?;

    let outcome = state.importer.import_image(&request).await?;
    Ok(Json(outcome.into()))
}

/// Get a stored media record
async fn get_media(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<MediaResponse>, ApiError> {
    let record = state
        .db
        .media()
        .get_by_id(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("media {id} not found")))?;

    Ok(Json(MediaResponse {
        id: record.id,
        public_url: state.importer.public_url(&record.storage_path),
        source_url: record.source_url,
        storage_path: record.storage_path,
        format: record.format,
        byte_size: record.byte_size,
        content_hash: hex::encode(&record.content_hash),
        attribution: record.attribution,
        created_at: record.created_at,
    }))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/media/import", post(import_media))
        .route("/media/{id}", get(get_media))
}
