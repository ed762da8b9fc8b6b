//! Endpoints behind the presigned links `LocalStorage` hands out.
//!
//! - `GET /objects/{*key}?expires=..&signature=..`: download
//! - `POST /upload`: browser-style form post (`key`, `expires`, `signature`,
//!   then `file`)
//!
//! Both reject a missing, expired or forged signature with 403 before
//! touching storage.

use axum::{
    body::Bytes,
    extract::{Multipart, Path, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use serde::Deserialize;
use tracing::{debug, warn};

use super::AppState;
use crate::errors::AppError;

/// Query string of a presigned download link.
#[derive(Debug, Deserialize)]
pub struct SignedQuery {
    pub expires: i64,
    pub signature: String,
}

/// Serve an object named by a presigned GET link.
pub async fn download_object(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(query): Query<SignedQuery>,
) -> Result<Response, AppError> {
    if !state
        .signer
        .verify("GET", &key, query.expires, &query.signature, Utc::now())
    {
        warn!(key = %key, "rejected download with bad signature");
        return Err(AppError::forbidden("signature mismatch or link expired"));
    }
    let data = state.storage.get_object(&key).await?;
    debug!(key = %key, size = data.len(), "serving object");
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/octet-stream")],
        data,
    )
        .into_response())
}

/// Accept a presigned form upload.
pub async fn upload_object(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<StatusCode, AppError> {
    let mut key = None;
    let mut expires = None;
    let mut signature = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::bad_request(err.to_string()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "key" => key = Some(field_text(field).await?),
            "signature" => signature = Some(field_text(field).await?),
            "expires" => {
                let raw = field_text(field).await?;
                let parsed = raw
                    .parse::<i64>()
                    .map_err(|_| AppError::bad_request(format!("invalid expires `{}`", raw)))?;
                expires = Some(parsed);
            }
            "file" => {
                let (Some(key), Some(expires), Some(signature)) = (&key, expires, &signature) else {
                    return Err(AppError::bad_request("policy fields must precede the file"));
                };
                if !state.signer.verify("POST", key, expires, signature, Utc::now()) {
                    warn!(key = %key, "rejected upload with bad signature");
                    return Err(AppError::forbidden("signature mismatch or policy expired"));
                }
                let data: Bytes = field
                    .bytes()
                    .await
                    .map_err(|err| AppError::bad_request(err.to_string()))?;
                debug!(key = %key, size = data.len(), "storing uploaded object");
                state.storage.put_object(key, data).await?;
                return Ok(StatusCode::NO_CONTENT);
            }
            // Unknown form fields are ignored.
            _ => {}
        }
    }
    Err(AppError::bad_request("missing file field"))
}

async fn field_text(field: axum::extract::multipart::Field<'_>) -> Result<String, AppError> {
    field
        .text()
        .await
        .map_err(|err| AppError::bad_request(err.to_string()))
}
