//! Chunked upload endpoints.

use crate::error::{ApiError, ApiResult};
use crate::handlers::common::{read_body, read_json};
use crate::metrics::{
    CHUNK_BYTES_RECEIVED, CHUNK_UPLOAD_DURATION, CHUNKS_RECEIVED, MERGES_TRIGGERED,
    UPLOADS_INITIALIZED,
};
use crate::state::AppState;
use axum::Json;
use axum::extract::{Path, Query, Request, State};
use pyre_core::{ChunkDescriptor, UploadId, UploadStatus, sanitize_file_name};
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Extra bytes read past `max_chunk_size` so an oversized chunk is reported
/// as too large rather than as a truncated body.
const CHUNK_READ_SLACK: u64 = 64 * 1024;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitUploadRequest {
    pub file_name: String,
    pub file_size: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitUploadResponse {
    pub success: bool,
    pub message: String,
    pub upload_id: String,
}

/// Query string of a chunk request. Numbers are parsed by the handler so
/// that malformed values get a JSON error body.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkParams {
    pub total_chunks: Option<String>,
    pub file_name: Option<String>,
    pub file_size: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkResponse {
    pub success: bool,
    pub message: String,
    pub upload_id: String,
    pub completed: bool,
    pub received_chunks: u32,
    pub total_chunks: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadStatusResponse {
    pub success: bool,
    pub upload_id: String,
    pub status: &'static str,
    pub completed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
}

/// POST /v1/uploads - Start a chunked upload.
#[tracing::instrument(skip(state, req))]
pub async fn init_upload(
    State(state): State<AppState>,
    req: Request,
) -> ApiResult<Json<InitUploadResponse>> {
    let body: InitUploadRequest = read_json(req, state.config.server.max_json_body).await?;

    let file_name = sanitize_file_name(&body.file_name)?;
    let max = state.config.server.max_upload_size;
    if body.file_size > max {
        return Err(ApiError::PayloadTooLarge(format!(
            "file size {} exceeds maximum {max}",
            body.file_size
        )));
    }

    let upload_id = UploadId::new();
    UPLOADS_INITIALIZED.inc();
    tracing::info!(
        upload_id = %upload_id,
        file_name = %file_name,
        file_size = body.file_size,
        "Upload initialized"
    );

    Ok(Json(InitUploadResponse {
        success: true,
        message: "Upload initialized".to_string(),
        upload_id: upload_id.to_string(),
    }))
}

/// PUT /v1/uploads/{upload_id}/chunks/{chunk_number} - Store one chunk.
#[tracing::instrument(skip(state, params, req), fields(upload_id = %upload_id, chunk = %chunk_number))]
pub async fn upload_chunk(
    State(state): State<AppState>,
    Path((upload_id, chunk_number)): Path<(String, String)>,
    Query(params): Query<ChunkParams>,
    req: Request,
) -> ApiResult<Json<ChunkResponse>> {
    let start_time = Instant::now();

    let upload_id = UploadId::parse(&upload_id)?;
    let chunk_number = parse_number::<u32>("chunkNumber", Some(&chunk_number))?;
    let total_chunks = parse_number::<u32>("totalChunks", params.total_chunks.as_deref())?;
    let file_size = parse_number::<u64>("fileSize", params.file_size.as_deref())?;
    let file_name = params
        .file_name
        .ok_or_else(|| ApiError::BadRequest("missing query parameter: fileName".to_string()))?;

    let chunk = ChunkDescriptor::new(
        upload_id,
        chunk_number,
        total_chunks,
        &file_name,
        file_size,
    )?;

    let data = read_body(
        req,
        state.config.server.max_chunk_size.saturating_add(CHUNK_READ_SLACK),
    )
    .await?;
    let size = data.len() as u64;

    let receipt = state.chunks.receive(&chunk, data).await?;

    CHUNKS_RECEIVED.inc();
    CHUNK_BYTES_RECEIVED.inc_by(size);
    CHUNK_UPLOAD_DURATION.observe(start_time.elapsed().as_secs_f64());

    let message = if receipt.merge.is_some() {
        MERGES_TRIGGERED.inc();
        "All chunks received, merging".to_string()
    } else if receipt.already_merged {
        "Upload already complete".to_string()
    } else {
        format!("Chunk {chunk_number}/{total_chunks} received")
    };

    Ok(Json(ChunkResponse {
        success: true,
        message,
        upload_id: chunk.upload_id.to_string(),
        // The merge runs in the background; completion is reported by the status endpoint.
        completed: receipt.already_merged,
        received_chunks: receipt.received,
        total_chunks: receipt.total_chunks,
    }))
}

/// GET /v1/uploads/{upload_id} - Poll upload status.
#[tracing::instrument(skip(state), fields(upload_id = %upload_id))]
pub async fn get_upload_status(
    State(state): State<AppState>,
    Path(upload_id): Path<String>,
) -> ApiResult<Json<UploadStatusResponse>> {
    let upload_id = UploadId::parse(&upload_id)?;

    let status = state.tracker.status(&upload_id).await?;
    let file_path = match &status {
        UploadStatus::NotFound => {
            return Err(ApiError::NotFound("upload not found".to_string()));
        }
        UploadStatus::InProgress => None,
        UploadStatus::Completed { file_path } => Some(file_path.display().to_string()),
    };

    Ok(Json(UploadStatusResponse {
        success: true,
        upload_id: upload_id.to_string(),
        status: status.as_str(),
        completed: status.is_completed(),
        file_path,
    }))
}

fn parse_number<T: std::str::FromStr>(name: &str, raw: Option<&str>) -> ApiResult<T>
where
    T::Err: std::fmt::Display,
{
    let raw = raw.ok_or_else(|| ApiError::BadRequest(format!("missing parameter: {name}")))?;
    raw.trim()
        .parse()
        .map_err(|e| ApiError::BadRequest(format!("invalid {name} {raw:?}: {e}")))
}
