//! Artifact endpoints: store, read, download and burn.

use crate::burn::BurnOrigin;
use crate::error::{ApiError, ApiResult};
use crate::handlers::common::{parse_artifact_id, read_json, require_field};
use crate::metrics::{ARTIFACTS_EXPIRED_ON_READ, ARTIFACTS_STORED};
use crate::state::AppState;
use axum::Json;
use axum::body::{Body, Bytes};
use axum::extract::{Path, Request, State};
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use futures::Stream;
use pyre_core::{
    ArtifactId, ArtifactKind, ArtifactRecord, ExpiryReason, PasswordProtection, UploadId,
    UploadStatus, sanitize_file_name,
};
use pyre_metadata::{ArtifactStore, ReadOutcome};
use pyre_storage::StorageError;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::fs::File;
use tokio::io::AsyncReadExt;

const STREAM_CHUNK_SIZE: usize = 64 * 1024;

const GONE_MESSAGE: &str = "data does not exist or has been burned";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreTextRequest {
    #[serde(default)]
    pub encrypted_data: String,
    #[serde(default)]
    pub iv: String,
    #[serde(default)]
    pub salt: String,
    pub password_protection: Option<PasswordProtection>,
    /// Requested lifetime, honored only in free expiration mode.
    pub set_duration: Option<String>,
    pub content_type: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreFileRequest {
    /// Upload id of the completed upload.
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub iv: String,
    #[serde(default)]
    pub salt: String,
    #[serde(default)]
    pub original_filename: String,
    #[serde(default)]
    pub content_type: String,
    pub password_protection: Option<PasswordProtection>,
    pub set_duration: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StoredResponse {
    pub success: bool,
    pub id: String,
}

/// What a reader needs to decrypt an artifact. Deadlines are not exposed.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactResponse {
    pub iv: String,
    pub salt: String,
    pub content_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub need_password: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password_protection: Option<PasswordProtection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encrypted_data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_filename: Option<String>,
}

impl From<ArtifactRecord> for ArtifactResponse {
    fn from(record: ArtifactRecord) -> Self {
        let kind = record.kind();
        let need_password = record.needs_password().then_some(true);
        Self {
            iv: record.iv,
            salt: record.salt,
            content_type: record.content_type.unwrap_or_default(),
            need_password,
            password_protection: record.password_protection,
            encrypted_data: match kind {
                ArtifactKind::Text => Some(record.encrypted_data.unwrap_or_default()),
                ArtifactKind::File => None,
            },
            original_filename: match kind {
                ArtifactKind::File => record.original_filename,
                ArtifactKind::Text => None,
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: &'static str,
}

/// POST /v1/artifacts - Store a text artifact.
#[tracing::instrument(skip(state, req))]
pub async fn store_text(
    State(state): State<AppState>,
    req: Request,
) -> ApiResult<Json<StoredResponse>> {
    let body: StoreTextRequest = read_json(req, state.config.server.max_json_body).await?;
    require_field("encryptedData", &body.encrypted_data)?;
    require_field("iv", &body.iv)?;
    require_field("salt", &body.salt)?;

    let now = OffsetDateTime::now_utc();
    let expires_at = state
        .policy
        .primary_expiry(now, body.set_duration.as_deref());
    let record = ArtifactRecord::text(
        body.encrypted_data,
        body.iv,
        body.salt,
        body.content_type,
        body.password_protection,
        expires_at,
    );

    let id = ArtifactId::new();
    state.store.insert(&id, &record).await?;
    ARTIFACTS_STORED.with_label_values(&["text"]).inc();
    tracing::info!(artifact_id = %id, expires_at = %expires_at, "Text artifact stored");

    Ok(Json(StoredResponse {
        success: true,
        id: id.to_string(),
    }))
}

/// POST /v1/artifacts/files - Store metadata for a completed upload.
///
/// The file size is taken from the merged file, not from the client.
#[tracing::instrument(skip(state, req))]
pub async fn store_file(
    State(state): State<AppState>,
    req: Request,
) -> ApiResult<Json<StoredResponse>> {
    let body: StoreFileRequest = read_json(req, state.config.server.max_json_body).await?;
    require_field("id", &body.id)?;
    require_field("iv", &body.iv)?;
    require_field("salt", &body.salt)?;
    require_field("originalFilename", &body.original_filename)?;
    require_field("contentType", &body.content_type)?;

    let id = parse_artifact_id(&body.id)?;
    let file_name = sanitize_file_name(&body.original_filename)?;

    let upload_id = UploadId::parse(&id.to_string())?;
    if !matches!(
        state.tracker.status(&upload_id).await?,
        UploadStatus::Completed { .. }
    ) {
        return Err(ApiError::PreconditionFailed(
            "upload has not finished merging".to_string(),
        ));
    }

    let path = state.layout.artifact_file(&id, &file_name);
    let file_size = match tokio::fs::metadata(&path).await {
        Ok(meta) if meta.is_file() => meta.len(),
        Ok(_) => {
            return Err(ApiError::PreconditionFailed(
                "merged file not found".to_string(),
            ));
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ApiError::PreconditionFailed(
                "merged file not found".to_string(),
            ));
        }
        Err(e) => return Err(StorageError::Io(e).into()),
    };

    let now = OffsetDateTime::now_utc();
    let expires_at = state
        .policy
        .primary_expiry(now, body.set_duration.as_deref());
    let record = ArtifactRecord::file(
        file_name,
        file_size,
        body.iv,
        body.salt,
        body.content_type,
        body.password_protection,
        expires_at,
    );

    state.store.insert(&id, &record).await?;
    ARTIFACTS_STORED.with_label_values(&["file"]).inc();
    tracing::info!(
        artifact_id = %id,
        file_size,
        expires_at = %expires_at,
        "File artifact stored"
    );

    Ok(Json(StoredResponse {
        success: true,
        id: id.to_string(),
    }))
}

/// GET /v1/artifacts/{id} - Read an artifact, starting its access window.
#[tracing::instrument(skip(state), fields(artifact_id = %id))]
pub async fn read_artifact(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ArtifactResponse>> {
    let id = parse_artifact_id(&id)?;

    match state.reader.open(&id, OffsetDateTime::now_utc()).await? {
        ReadOutcome::Available(record) => Ok(Json(ArtifactResponse::from(record))),
        ReadOutcome::Expired(reason) => {
            expired(&state, id, reason, BurnOrigin::Read);
            Err(ApiError::NotFound(GONE_MESSAGE.to_string()))
        }
        ReadOutcome::Missing => Err(ApiError::NotFound(GONE_MESSAGE.to_string())),
    }
}

/// GET /v1/artifacts/{id}/download - Stream a file artifact's ciphertext.
///
/// Deadlines are checked but the access window is not started here.
#[tracing::instrument(skip(state), fields(artifact_id = %id))]
pub async fn download_artifact(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let id = parse_artifact_id(&id)?;

    let record = match state.reader.peek(&id, OffsetDateTime::now_utc()).await? {
        ReadOutcome::Available(record) => record,
        ReadOutcome::Expired(reason) => {
            expired(&state, id, reason, BurnOrigin::Download);
            return Err(ApiError::NotFound(GONE_MESSAGE.to_string()));
        }
        ReadOutcome::Missing => return Err(ApiError::NotFound(GONE_MESSAGE.to_string())),
    };

    let content_type = download_content_type(record.content_type.as_deref());
    let file_name = match (record.kind(), record.original_filename) {
        (ArtifactKind::File, Some(name)) => name,
        _ => return Err(ApiError::NotFound("artifact has no file".to_string())),
    };

    let path = state.layout.artifact_file(&id, &file_name);
    let file = match File::open(&path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::warn!("Merged file missing for stored artifact, burning");
            schedule_burn(&state, id, BurnOrigin::Download);
            return Err(ApiError::NotFound(GONE_MESSAGE.to_string()));
        }
        Err(e) => return Err(StorageError::Io(e).into()),
    };
    let size = file.metadata().await.map_err(StorageError::Io)?.len();

    Ok((
        StatusCode::OK,
        [
            (CONTENT_TYPE, content_type),
            (CONTENT_LENGTH, HeaderValue::from(size)),
            (CONTENT_DISPOSITION, attachment(&file_name)),
        ],
        Body::from_stream(file_stream(file)),
    )
        .into_response())
}

/// DELETE /v1/artifacts/{id} - Burn an artifact now.
#[tracing::instrument(skip(state), fields(artifact_id = %id))]
pub async fn burn_artifact(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<MessageResponse>> {
    let id = parse_artifact_id(&id)?;
    state
        .burns
        .enqueue(id, BurnOrigin::Explicit)?
        .wait()
        .await?;
    Ok(Json(MessageResponse {
        message: "Data successfully burned",
    }))
}

fn expired(state: &AppState, id: ArtifactId, reason: ExpiryReason, origin: BurnOrigin) {
    let label = match reason {
        ExpiryReason::Primary => "primary",
        ExpiryReason::AccessWindow => "access_window",
    };
    ARTIFACTS_EXPIRED_ON_READ.with_label_values(&[label]).inc();
    tracing::info!(reason = %reason, "Artifact expired, burning");
    schedule_burn(state, id, origin);
}

fn schedule_burn(state: &AppState, id: ArtifactId, origin: BurnOrigin) {
    // Rejections are logged by the queue and retried by the next cleanup cycle.
    let _ = state.burns.enqueue(id, origin);
}

/// The stored content type, or octet-stream when it is empty or not a valid header value.
fn download_content_type(stored: Option<&str>) -> HeaderValue {
    stored
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .and_then(|value| HeaderValue::from_str(value).ok())
        .unwrap_or_else(|| HeaderValue::from_static("application/octet-stream"))
}

fn attachment(file_name: &str) -> HeaderValue {
    let quoted: String = file_name
        .chars()
        .map(|c| if c == '"' || c == '\\' { '_' } else { c })
        .collect();
    HeaderValue::from_str(&format!("attachment; filename=\"{quoted}.enc\""))
        .unwrap_or_else(|_| HeaderValue::from_static("attachment; filename=\"download.enc\""))
}

fn file_stream(file: File) -> impl Stream<Item = std::io::Result<Bytes>> {
    async_stream::try_stream! {
        let mut file = file;
        let mut buf = vec![0u8; STREAM_CHUNK_SIZE];
        loop {
            let n = file.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            yield Bytes::copy_from_slice(&buf[..n]);
        }
    }
}
