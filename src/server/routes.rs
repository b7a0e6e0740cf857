//! HTTP handlers

use crate::server::device::{is_mobile_request, user_agent, DeviceProfile};
use crate::server::error::{ApiError, ApiResult};
use crate::server::range::ByteRange;
use crate::server::AppState;
use crate::utils::error::VidgrabError;
use crate::utils::filename::clean_title;
use crate::utils::platform::check_ffmpeg;
use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use std::io::SeekFrom;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;
use tracing::{info, warn};

#[derive(Debug, Deserialize)]
pub struct UrlRequest {
    #[serde(default)]
    pub url: Option<String>,
}

fn requested_url(payload: Result<Json<UrlRequest>, JsonRejection>) -> ApiResult<String> {
    let Json(request) = payload.map_err(|e| ApiError::bad_request(e.body_text()))?;
    request
        .url
        .map(|u| u.trim().to_string())
        .filter(|u| !u.is_empty())
        .ok_or_else(|| ApiError::bad_request("Please provide a video URL"))
}

pub async fn index() -> Json<Value> {
    Json(json!({
        "name": "vidgrab",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": [
            "POST /video-info",
            "POST /download",
            "GET /progress/{id}",
            "GET /download-file/{id}",
            "DELETE /download/{id}",
            "GET /health"
        ]
    }))
}

pub async fn test() -> &'static str {
    "vidgrab is running"
}

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    let ffmpeg = check_ffmpeg().await;
    Json(json!({
        "status": "ok",
        "ytdlp": state.ytdlp_available,
        "ffmpeg": ffmpeg,
        "extractor": state.jobs.extractor().id(),
        "jobs": state.jobs.len().await,
    }))
}

pub async fn video_info(
    State(state): State<AppState>,
    payload: Result<Json<UrlRequest>, JsonRejection>,
) -> Response {
    let url = match requested_url(payload) {
        Ok(url) => url,
        Err(e) => return e.into_response(),
    };

    match state.jobs.video_info(&url).await {
        Ok((resolved, info)) => Json(json!({
            "title": clean_title(&info.title),
            "duration": info.duration,
            "uploader": info.uploader,
            "platform": resolved.platform,
            "url": resolved.url,
            "warning": resolved.warning,
            "available": true,
        }))
        .into_response(),
        Err(VidgrabError::InvalidUrl(reason)) => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": reason, "available": false })),
        )
            .into_response(),
        Err(e) => {
            let analysis = e.analysis();
            warn!("Video info failed for {}: {}", url, e);
            (
                StatusCode::BAD_REQUEST,
                Json(json!({
                    "error": analysis.user_message,
                    "error_type": analysis.kind.as_str(),
                    "fatal": analysis.fatal,
                    "available": false,
                })),
            )
                .into_response()
        }
    }
}

pub async fn start_download(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<UrlRequest>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let url = requested_url(payload)?;
    let mobile = is_mobile_request(user_agent(&headers));

    let id = state.jobs.submit(&url, mobile).await?;
    Ok(Json(json!({
        "download_id": id,
        "message": "Download started",
    })))
}

pub async fn progress(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let snapshot = state
        .jobs
        .snapshot(&id)
        .await
        .ok_or_else(|| ApiError::not_found("Download not found"))?;
    let value = serde_json::to_value(snapshot).map_err(|e| ApiError::internal(e.to_string()))?;
    Ok(Json(value))
}

pub async fn download_file(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let (path, size) = state.jobs.file_for(&id).await?;
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "video.mp4".to_string());

    let mut file = tokio::fs::File::open(&path)
        .await
        .map_err(|_| ApiError::from(VidgrabError::FileMissing(id.clone())))?;

    let profile = DeviceProfile::from_headers(&headers);
    let range = ByteRange::parse(headers.get(header::RANGE), size);
    info!(
        "Serving {} ({} bytes, {:?}) to {} client for job {}",
        filename,
        size,
        range,
        profile.device_type(),
        id
    );

    let mut response_headers = profile.file_headers(&filename, size);
    if let Some(content_range) = range.content_range(size) {
        if let Ok(value) = HeaderValue::from_str(&content_range) {
            response_headers.insert(header::CONTENT_RANGE, value);
        }
    }

    let (status, body) = match range {
        ByteRange::Unsatisfiable => {
            response_headers.insert(header::CONTENT_LENGTH, HeaderValue::from(0u64));
            return Ok((StatusCode::RANGE_NOT_SATISFIABLE, response_headers).into_response());
        }
        ByteRange::Partial { start, end } => {
            let length = end - start + 1;
            file.seek(SeekFrom::Start(start))
                .await
                .map_err(|e| ApiError::internal(e.to_string()))?;
            response_headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
            (
                StatusCode::PARTIAL_CONTENT,
                Body::from_stream(ReaderStream::new(file.take(length))),
            )
        }
        ByteRange::Full => (StatusCode::OK, Body::from_stream(ReaderStream::new(file))),
    };

    // players fetch in several ranged requests; the first one starts the clock
    state
        .jobs
        .schedule_cleanup(&id, profile.cleanup_delay(state.jobs.settings()))
        .await;

    Ok((status, response_headers, body).into_response())
}

pub async fn cancel_download(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    state.jobs.cancel(&id).await?;
    Ok(Json(json!({ "message": "Download cancelled" })))
}
