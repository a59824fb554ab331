//! Shared handler helpers.

use crate::error::{ApiError, ApiResult};
use axum::body::Bytes;
use axum::extract::Request;
use axum::http::header::CONTENT_LENGTH;
use bytes::BytesMut;
use futures::StreamExt;
use pyre_core::ArtifactId;
use serde::de::DeserializeOwned;

/// Read a request body of at most `limit` bytes.
///
/// A declared `Content-Length` over the limit is rejected before reading;
/// bodies without one are rejected as soon as they grow past it.
pub async fn read_body(req: Request, limit: u64) -> ApiResult<Bytes> {
    let declared = req
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    if let Some(len) = declared
        && len > limit
    {
        return Err(ApiError::PayloadTooLarge(format!(
            "body of {len} bytes exceeds limit of {limit}"
        )));
    }

    let mut stream = req.into_body().into_data_stream();
    let mut buf = BytesMut::with_capacity(declared.unwrap_or(0) as usize);
    while let Some(frame) = stream.next().await {
        let frame = frame.map_err(|e| ApiError::BadRequest(format!("failed to read body: {e}")))?;
        if (buf.len() + frame.len()) as u64 > limit {
            return Err(ApiError::PayloadTooLarge(format!(
                "body exceeds limit of {limit} bytes"
            )));
        }
        buf.extend_from_slice(&frame);
    }
    Ok(buf.freeze())
}

/// Read and parse a JSON request body.
pub async fn read_json<T: DeserializeOwned>(req: Request, limit: u64) -> ApiResult<T> {
    let bytes = read_body(req, limit).await?;
    serde_json::from_slice(&bytes).map_err(|e| ApiError::BadRequest(format!("invalid JSON: {e}")))
}

/// Parse an artifact id from a path segment or body field.
pub fn parse_artifact_id(raw: &str) -> ApiResult<ArtifactId> {
    ArtifactId::parse(raw).map_err(|e| ApiError::BadRequest(e.to_string()))
}

/// Reject an empty required string field.
pub fn require_field(name: &str, value: &str) -> ApiResult<()> {
    if value.trim().is_empty() {
        return Err(ApiError::BadRequest(format!("missing required field: {name}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    #[tokio::test]
    async fn read_body_enforces_limit_without_content_length() {
        let req = Request::builder().body(Body::from(vec![1u8; 64])).unwrap();
        assert_eq!(read_body(req, 64).await.unwrap().len(), 64);

        let frames = futures::stream::iter(vec![
            Ok::<_, std::io::Error>(Bytes::from(vec![0u8; 40])),
            Ok(Bytes::from(vec![0u8; 40])),
        ]);
        let req = Request::builder().body(Body::from_stream(frames)).unwrap();
        let err = read_body(req, 64).await.unwrap_err();
        assert!(matches!(err, ApiError::PayloadTooLarge(_)));
        assert_eq!(err.status_code(), axum::http::StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn read_body_rejects_declared_length_up_front() {
        let req = Request::builder()
            .header(CONTENT_LENGTH, "65")
            .body(Body::from(vec![1u8; 10]))
            .unwrap();
        let err = read_body(req, 64).await.unwrap_err();
        assert!(matches!(err, ApiError::PayloadTooLarge(_)));
    }
}
