//! HTTP surface: URL validation, JSON mapping and file serving on top of the
//! shared [`DownloadManager`].

use crate::downloader::{DownloadError, DownloadManager, VideoInfo};
use axum::{
    Json, Router,
    body::Body,
    extract::{Path as AxumPath, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::{path::Path, sync::Arc};
use tokio::{fs::File, task};
use tokio_util::io::ReaderStream;
use tracing::{info, warn};

pub const PLATFORM_DOMAIN: &str = "tiktok.com";
pub const INVALID_URL_MESSAGE: &str = "Please provide a valid TikTok URL";
const FILE_NOT_FOUND: &str = "File not found";
const SERVED_MEDIA_TYPE: &str = "video/mp4";

#[derive(Clone)]
pub struct AppState {
    manager: Arc<DownloadManager>,
    delete_after_serve: bool,
}

impl AppState {
    pub fn new(manager: Arc<DownloadManager>) -> Self {
        Self {
            manager,
            delete_after_serve: false,
        }
    }

    /// Unlinks each file once it has been opened for streaming.
    pub fn with_delete_after_serve(mut self, enabled: bool) -> Self {
        self.delete_after_serve = enabled;
        self
    }
}

#[derive(Debug, Deserialize)]
pub struct DownloadRequest {
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct DownloadResponse {
    pub success: bool,
    pub filename: String,
    pub title: String,
    pub duration: u64,
    pub download_url: String,
}

#[derive(Debug, Serialize)]
struct StatusPayload {
    message: &'static str,
    status: &'static str,
}

#[derive(Debug, Serialize)]
struct MessagePayload {
    message: &'static str,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl From<DownloadError> for ApiError {
    fn from(err: DownloadError) -> Self {
        Self::internal(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "detail": self.message,
        });
        (self.status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/api/info", post(get_video_info))
        .route("/api/download", post(download_video))
        .route("/api/file/{filename}", get(serve_file).delete(delete_file))
        .with_state(state)
}

/// Weak check: anything mentioning the platform domain passes.
pub fn is_platform_url(url: &str) -> bool {
    url.to_lowercase().contains(PLATFORM_DOMAIN)
}

fn validate_url(url: &str) -> ApiResult<()> {
    if is_platform_url(url) {
        Ok(())
    } else {
        Err(ApiError::bad_request(INVALID_URL_MESSAGE))
    }
}

async fn root() -> Json<StatusPayload> {
    Json(StatusPayload {
        message: "TikTok Video Downloader API",
        status: "running",
    })
}

async fn get_video_info(
    State(state): State<AppState>,
    Json(request): Json<DownloadRequest>,
) -> ApiResult<Json<VideoInfo>> {
    validate_url(&request.url)?;
    let manager = state.manager.clone();
    let info = run_blocking(move || manager.get_video_info(&request.url)).await?;
    Ok(Json(info))
}

async fn download_video(
    State(state): State<AppState>,
    Json(request): Json<DownloadRequest>,
) -> ApiResult<Json<DownloadResponse>> {
    validate_url(&request.url)?;
    let manager = state.manager.clone();
    let result = run_blocking(move || manager.download_video(&request.url)).await?;
    Ok(Json(DownloadResponse {
        success: true,
        download_url: format!("/api/file/{}", result.filename),
        filename: result.filename,
        title: result.title,
        duration: result.duration,
    }))
}

async fn serve_file(
    State(state): State<AppState>,
    AxumPath(filename): AxumPath<String>,
) -> ApiResult<Response> {
    let path = state
        .manager
        .resolve_file(&filename)
        .ok_or_else(|| ApiError::not_found(FILE_NOT_FOUND))?;
    let response = stream_file(&path, &filename).await?;

    if state.delete_after_serve {
        // The open handle keeps the bytes readable after the unlink.
        if let Err(err) = tokio::fs::remove_file(&path).await {
            warn!(path = %path.display(), error = %err, "post-serve removal failed");
        }
    }

    Ok(response)
}

async fn delete_file(
    State(state): State<AppState>,
    AxumPath(filename): AxumPath<String>,
) -> ApiResult<Json<MessagePayload>> {
    let manager = state.manager.clone();
    let removed = task::spawn_blocking(move || manager.cleanup_file(&filename))
        .await
        .map_err(|err| ApiError::internal(format!("task join error: {err}")))?;
    if !removed {
        return Err(ApiError::not_found(FILE_NOT_FOUND));
    }
    Ok(Json(MessagePayload {
        message: "File deleted successfully",
    }))
}

/// Extractor calls block until yt-dlp exits, so they run on the blocking pool.
async fn run_blocking<T, F>(work: F) -> ApiResult<T>
where
    F: FnOnce() -> Result<T, DownloadError> + Send + 'static,
    T: Send + 'static,
{
    let result = task::spawn_blocking(work)
        .await
        .map_err(|err| ApiError::internal(format!("task join error: {err}")))?;
    result.map_err(|err| {
        info!(error = %err, "request failed");
        ApiError::from(err)
    })
}

async fn stream_file(path: &Path, filename: &str) -> ApiResult<Response> {
    let file = File::open(path)
        .await
        .map_err(|_| ApiError::not_found(FILE_NOT_FOUND))?;

    let disposition = HeaderValue::from_str(&format!("attachment; filename=\"{filename}\""))
        .map_err(|err| ApiError::internal(format!("invalid filename header: {err}")))?;
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(SERVED_MEDIA_TYPE),
    );
    headers.insert(header::CONTENT_DISPOSITION, disposition);

    let body = Body::from_stream(ReaderStream::new(file));
    Ok((headers, body).into_response())
}
