//! HTTP endpoints for job submission, polling and download.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Json, Router,
    body::Body,
    extract::{ConnectInfo, Path, Request, State},
    http::{HeaderValue, Method, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use tokio_util::io::ReaderStream;
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::AdmissionError;
use crate::jobs::{JobOptions, JobStatus};
use crate::media::{validate_bitrate, validate_url};
use crate::service::JobService;

/// Largest accepted submission body.
const MAX_BODY_BYTES: usize = 64 * 1024;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<JobService>,
}

/// Submission body.
#[derive(Debug, Deserialize)]
pub struct JobRequest {
    pub url: String,
    pub bitrate: Option<u32>,
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
}

/// Build the Axum router with the job API and CORS.
pub fn job_routes(service: Arc<JobService>, cors_origins: &[String]) -> Router {
    let state = AppState { service };

    Router::new()
        .route("/api/health", get(health))
        .route("/api/jobs", post(create_job))
        .route("/api/jobs/{id}", get(job_status))
        .route("/api/download/{id}", get(download))
        .layer(ServiceBuilder::new().layer(cors_layer(cors_origins)))
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.iter().any(|o| o == "*") {
        AllowOrigin::any()
    } else {
        let parsed: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|o| match HeaderValue::from_str(o) {
                Ok(value) => Some(value),
                Err(_) => {
                    warn!(origin = %o, "Ignoring invalid CORS origin");
                    None
                }
            })
            .collect();
        AllowOrigin::list(parsed)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
}

fn error_response(status: StatusCode, code: &str, message: impl Into<String>) -> Response {
    (
        status,
        Json(serde_json::json!({
            "error": { "code": code, "message": message.into() }
        })),
    )
        .into_response()
}

// ── Health ──────────────────────────────────────────────────────────────

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "ok": true,
        "jobs": state.service.summary(),
    }))
}

// ── Jobs ────────────────────────────────────────────────────────────────

async fn create_job(State(state): State<AppState>, request: Request) -> Response {
    let client = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string());

    if let Err(AdmissionError::RateLimited { .. }) = state.service.admit(&client) {
        return error_response(
            StatusCode::TOO_MANY_REQUESTS,
            "RATE_LIMITED",
            "Too many requests, try again later.",
        );
    }

    let body = match axum::body::to_bytes(request.into_body(), MAX_BODY_BYTES).await {
        Ok(body) => body,
        Err(e) => {
            return error_response(StatusCode::BAD_REQUEST, "INVALID_PAYLOAD", e.to_string());
        }
    };
    let payload: JobRequest = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(e) => {
            debug!(client = %client, error = %e, "Rejected malformed job request");
            return error_response(StatusCode::BAD_REQUEST, "INVALID_PAYLOAD", e.to_string());
        }
    };

    let url = match validate_url(&payload.url) {
        Ok(url) => url,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, "INVALID_URL", e.to_string()),
    };
    let bitrate = match validate_bitrate(payload.bitrate) {
        Ok(bitrate) => bitrate,
        Err(e) => {
            return error_response(StatusCode::BAD_REQUEST, "INVALID_BITRATE", e.to_string());
        }
    };

    let mut options = JobOptions::with_bitrate(bitrate);
    for (key, value) in [
        ("title", payload.title),
        ("artist", payload.artist),
        ("album", payload.album),
    ] {
        if let Some(value) = value {
            options = options.with_tag(key, value);
        }
    }

    match state.service.enqueue(&client, url, options) {
        Ok(job_id) => Json(serde_json::json!({ "job_id": job_id })).into_response(),
        Err(e) => error_response(StatusCode::SERVICE_UNAVAILABLE, "UNAVAILABLE", e.to_string()),
    }
}

async fn job_status(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let view = Uuid::parse_str(&id)
        .ok()
        .and_then(|job_id| state.service.get_job(job_id));
    let Some(view) = view else {
        return error_response(StatusCode::NOT_FOUND, "NOT_FOUND", "Job not found.");
    };

    let download_url = (view.status == JobStatus::Done && view.result.is_some())
        .then(|| format!("/api/download/{}", view.job_id));

    Json(serde_json::json!({
        "job_id": view.job_id,
        "status": view.status,
        "progress": view.progress,
        "message": view.message,
        "download_url": download_url,
        "info": view.info,
    }))
    .into_response()
}

async fn download(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let not_ready = || error_response(StatusCode::NOT_FOUND, "NOT_READY", "File not available.");

    let Ok(job_id) = Uuid::parse_str(&id) else {
        return not_ready();
    };
    let Some(artifact) = state.service.open_artifact(job_id).await else {
        return not_ready();
    };

    let filename = artifact
        .path
        .file_name()
        .map(|n| ascii_filename(&n.to_string_lossy()))
        .unwrap_or_else(|| "audio.mp3".to_string());
    let disposition = HeaderValue::from_str(&format!("attachment; filename=\"{filename}\""))
        .unwrap_or_else(|_| HeaderValue::from_static("attachment"));

    (
        [
            (header::CONTENT_TYPE, HeaderValue::from_static("audio/mpeg")),
            (header::CONTENT_LENGTH, HeaderValue::from(artifact.len)),
            (header::CACHE_CONTROL, HeaderValue::from_static("no-store")),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        Body::from_stream(ReaderStream::new(artifact.file)),
    )
        .into_response()
}

/// Header-safe rendition of a file name.
fn ascii_filename(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_graphic() && c != '"' && c != '\\' || c == ' ' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
