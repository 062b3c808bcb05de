use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Json};
use serde_json::{json, Value};
use tracing::{info, warn};

use super::types::*;
use crate::artifacts::ArtifactStore;
use crate::error::Error;
use crate::inference::SpeechToText;
use crate::models::MODEL_CATALOG;
use crate::orchestration::worker::WorkerHandle;

/// Shared server state.
pub struct AppState {
    pub worker: WorkerHandle,
    /// Transcription bypasses the worker queue.
    pub transcriber: Arc<dyn SpeechToText>,
    pub artifacts: ArtifactStore,
    /// Base for `audio_url`, without a trailing slash.
    pub public_url: String,
    pub text_model: String,
    pub vision_model: String,
}

pub type SharedState = Arc<AppState>;

type ApiResult<T> = Result<T, (StatusCode, Json<ApiError>)>;

pub fn api_error(err: Error) -> (StatusCode, Json<ApiError>) {
    let status = match &err {
        Error::InvalidInput(_) => StatusCode::BAD_REQUEST,
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::FatalInit(_) | Error::WorkerUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        Error::Generation(_) | Error::Api { .. } => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        warn!("[api] {}", err);
    }
    (status, Json(ApiError::new(err.to_string(), err.kind())))
}

/// Malformed bodies get the same error shape as every other failure.
fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> ApiResult<T> {
    body.map(|Json(value)| value)
        .map_err(|rejection| api_error(Error::InvalidInput(rejection.body_text())))
}

fn audio_url(state: &AppState, path: &Path) -> String {
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!("{}/audio/{}", state.public_url, filename)
}

// ============================================================================
// Health / status
// ============================================================================

pub async fn health_check() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

pub async fn status(State(state): State<SharedState>) -> Json<StatusResponse> {
    let current = state.worker.status();
    Json(StatusResponse {
        slot: current.slot,
        resident_model: current.model,
        text_model: state.text_model.clone(),
        vision_model: state.vision_model.clone(),
    })
}

pub async fn list_catalog() -> Json<CatalogResponse> {
    let data = MODEL_CATALOG
        .iter()
        .map(|m| CatalogEntry {
            id: m.id,
            name: m.name,
            category: m.category.to_string(),
            repo_id: m.repo_id,
            description: m.description,
            size_hint: m.size_hint,
        })
        .collect();

    Json(CatalogResponse {
        object: "list".to_string(),
        data,
    })
}

// ============================================================================
// Chat / vision
// ============================================================================

pub async fn chat_endpoint(
    State(state): State<SharedState>,
    body: Result<Json<ChatRequest>, JsonRejection>,
) -> ApiResult<Json<ChatResponse>> {
    let req = json_body(body)?;
    info!(
        "[api] Chat: {} history messages, search={}",
        req.chat_history.len(),
        req.use_search
    );
    let outcome = state
        .worker
        .chat(req.chat_history, &req.user_input, req.use_search)
        .await
        .map_err(api_error)?;

    Ok(Json(ChatResponse {
        audio_url: audio_url(&state, &outcome.audio_path),
        response_text: outcome.response_text,
        chat_history: outcome.history,
    }))
}

pub async fn vision_endpoint(
    State(state): State<SharedState>,
    body: Result<Json<VisionRequest>, JsonRejection>,
) -> ApiResult<Json<VisionResponse>> {
    let req = json_body(body)?;
    let image = req.image_path.filter(|p| !p.trim().is_empty()).map(PathBuf::from);
    let result = state
        .worker
        .caption(image, &req.prompt)
        .await
        .map_err(api_error)?;

    Ok(Json(VisionResponse {
        audio_url: audio_url(&state, &result.audio_path),
        response_text: result.response_text,
    }))
}

// ============================================================================
// Audio
// ============================================================================

pub async fn transcribe_audio(
    State(state): State<SharedState>,
    body: Bytes,
) -> ApiResult<Json<TranscriptionResponse>> {
    if body.is_empty() {
        return Err(api_error(Error::InvalidInput("request body is empty".to_string())));
    }

    let upload = std::env::temp_dir().join(format!(
        "omnilocal_upload_{}.wav",
        uuid::Uuid::new_v4().simple()
    ));
    tokio::fs::write(&upload, &body)
        .await
        .map_err(|e| api_error(e.into()))?;

    let result = state.transcriber.transcribe(&upload).await;
    if let Err(e) = tokio::fs::remove_file(&upload).await {
        warn!("[api] Could not remove upload {}: {}", upload.display(), e);
    }

    let text = result.map_err(api_error)?;
    Ok(Json(TranscriptionResponse { text }))
}

/// Serve an artifact once. The file is gone after this returns.
pub async fn get_audio(
    State(state): State<SharedState>,
    axum::extract::Path(filename): axum::extract::Path<String>,
) -> ApiResult<impl IntoResponse> {
    let bytes = state.artifacts.take(&filename).await.map_err(api_error)?;
    Ok(([(header::CONTENT_TYPE, "audio/wav")], bytes))
}
