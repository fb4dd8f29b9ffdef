use actix_web::{web, HttpRequest, HttpResponse};
use anyhow::Context;
use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::auth::require_user;
use crate::config::{MediaConfig, MAX_UPLOAD_BYTES};
use crate::core::errors::{ApiError, ApiResult};
use crate::core::query_params::{get_string, parse_query_params};
use crate::AppState;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    /// Only `image/*` and `video/*` uploads are accepted.
    pub fn from_content_type(content_type: &str) -> Option<Self> {
        let essence = content_type.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
        if essence.starts_with("image/") {
            Some(MediaKind::Image)
        } else if essence.starts_with("video/") {
            Some(MediaKind::Video)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone)]
pub struct MediaFile {
    pub bytes: Vec<u8>,
    pub file_name: String,
    pub content_type: String,
    pub kind: MediaKind,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct UploadedMedia {
    pub url: String,
    pub file_id: String,
    pub kind: MediaKind,
}

/// External media hosting service.
#[async_trait]
pub trait MediaHost: Send + Sync {
    async fn upload(&self, file: MediaFile) -> anyhow::Result<UploadedMedia>;
}

/// ImageKit-compatible upload API.
pub struct ImageKitHost {
    upload_url: String,
    private_key: String,
    folder: String,
    client: reqwest::Client,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImageKitResponse {
    file_id: String,
    url: String,
}

impl ImageKitHost {
    pub fn new(upload_url: String, private_key: String, folder: String) -> Self {
        Self {
            upload_url,
            private_key,
            folder,
            client: reqwest::Client::new(),
        }
    }

    /// Builds a host when a private key is configured.
    pub fn from_config(config: &MediaConfig) -> Option<Self> {
        let key = config.private_key.clone()?;
        Some(Self::new(config.upload_url.clone(), key, config.folder.clone()))
    }
}

#[async_trait]
impl MediaHost for ImageKitHost {
    async fn upload(&self, file: MediaFile) -> anyhow::Result<UploadedMedia> {
        let part = reqwest::multipart::Part::bytes(file.bytes)
            .file_name(file.file_name.clone())
            .mime_str(&file.content_type)?;
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("fileName", file.file_name.clone())
            .text("folder", self.folder.clone());

        let response = self
            .client
            .post(&self.upload_url)
            .basic_auth(&self.private_key, Some(""))
            .multipart(form)
            .send()
            .await
            .context("sending upload")?
            .error_for_status()
            .context("media host rejected upload")?;

        let body: ImageKitResponse = response.json().await.context("decoding upload response")?;

        Ok(UploadedMedia {
            url: body.url,
            file_id: body.file_id,
            kind: file.kind,
        })
    }
}

/// Keeps `[A-Za-z0-9._-]`, drops leading dots and prefixes a timestamp.
pub fn remote_file_name(requested: Option<&str>) -> String {
    let cleaned: String = requested
        .unwrap_or("")
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    let base = if cleaned.is_empty() { "upload" } else { cleaned };
    format!("{}_{}", chrono::Utc::now().timestamp_millis(), base)
}

fn too_large() -> ApiError {
    ApiError::PayloadTooLarge(format!(
        "File too large (max {} MiB)",
        MAX_UPLOAD_BYTES / (1024 * 1024)
    ))
}

/// Collects the request body, failing as soon as it passes `limit` bytes.
async fn read_body(
    req: &HttpRequest,
    mut payload: web::Payload,
    limit: usize,
) -> ApiResult<web::BytesMut> {
    let declared = req
        .headers()
        .get("Content-Length")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());
    if declared.is_some_and(|len| len > limit) {
        return Err(too_large());
    }

    let mut body = web::BytesMut::new();
    while let Some(chunk) = payload.next().await {
        let chunk = chunk.map_err(|e| ApiError::BadRequest(format!("Upload interrupted: {e}")))?;
        if body.len() + chunk.len() > limit {
            return Err(too_large());
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body)
}

/// `POST /upload?filename=`: raw body, `Content-Type` decides image or video.
pub async fn upload_media(
    state: web::Data<AppState>,
    req: HttpRequest,
    payload: web::Payload,
) -> ApiResult<HttpResponse> {
    let user_id = require_user(&state, &req)?;

    let host = state
        .media
        .as_ref()
        .ok_or_else(|| ApiError::ServiceUnavailable("Media uploads are not configured".to_string()))?;

    let body = read_body(&req, payload, MAX_UPLOAD_BYTES).await?;
    if body.is_empty() {
        return Err(ApiError::BadRequest("No file uploaded".to_string()));
    }

    let content_type = req
        .headers()
        .get("Content-Type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    let kind = MediaKind::from_content_type(&content_type)
        .ok_or_else(|| ApiError::BadRequest("Only images and videos can be uploaded".to_string()))?;

    let params = parse_query_params(req.query_string());
    let file = MediaFile {
        bytes: body.to_vec(),
        file_name: remote_file_name(get_string(&params, "filename").as_deref()),
        content_type,
        kind,
    };

    let size = file.bytes.len();
    let uploaded = host.upload(file).await.map_err(|e| {
        error!("Upload for {user_id} failed: {e:#}");
        ApiError::InternalError("Upload failed".to_string())
    })?;
    info!("User {user_id} uploaded {size} bytes as {:?}: {}", uploaded.kind, uploaded.url);

    Ok(HttpResponse::Ok().json(uploaded))
}
