//! HTTP server for the transcode queue
//!
//! Exposes the queue, control surface, status views, system stats, library
//! listings and preset upload as JSON endpoints.

use axum::extract::multipart::MultipartRejection;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use std::future::Future;
use thiserror::Error;
use tracing::info;

use crate::job::JobId;
use crate::library::{
    list_media_tree, list_presets, save_preset, LibraryEntry, PresetUploadError,
};
use crate::metrics::{collect_system_stats, SystemStats};
use crate::queue::{Direction, QueueError};
use crate::status::{EncodingDetail, HistoryEntry, QueueSnapshot};
use crate::supervisor::{EnqueueRequest, Supervisor, SupervisorError};

/// Errors that can occur when running the HTTP server
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Server error: {0}")]
    Io(#[from] std::io::Error),
}

/// Error returned by a handler, rendered as `{"error": "<message>"}`
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Supervisor(#[from] SupervisorError),

    #[error(transparent)]
    Preset(#[from] PresetUploadError),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Internal(String),
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Supervisor(err) => match err {
                SupervisorError::Queue(QueueError::Duplicate(_))
                | SupervisorError::Queue(QueueError::InvalidState { .. })
                | SupervisorError::NoActiveJob => StatusCode::CONFLICT,
                SupervisorError::Queue(QueueError::NotFound(_)) => StatusCode::NOT_FOUND,
                SupervisorError::PresetNotFound(_)
                | SupervisorError::InvalidSource(_)
                | SupervisorError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            },
            ApiError::Preset(PresetUploadError::Io(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Preset(_) => StatusCode::BAD_REQUEST,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({ "error": self.to_string() }));
        (self.status_code(), body).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

#[derive(Debug, Deserialize)]
struct RemoveRequest {
    id: JobId,
}

#[derive(Debug, Deserialize)]
struct MoveRequest {
    id: JobId,
    direction: Direction,
}

async fn get_queue(State(supervisor): State<Supervisor>) -> Json<QueueSnapshot> {
    Json(supervisor.queue_snapshot().await)
}

async fn get_encoding_details(State(supervisor): State<Supervisor>) -> Json<EncodingDetail> {
    Json(supervisor.encoding_detail().await)
}

async fn get_history(State(supervisor): State<Supervisor>) -> Json<Vec<HistoryEntry>> {
    Json(supervisor.history().await)
}

async fn add_to_queue(
    State(supervisor): State<Supervisor>,
    payload: Result<Json<EnqueueRequest>, JsonRejection>,
) -> ApiResult<Value> {
    let Json(request) = payload?;
    let id = supervisor.enqueue(request).await?;
    Ok(Json(json!({ "status": "added", "id": id })))
}

async fn remove_from_queue(
    State(supervisor): State<Supervisor>,
    payload: Result<Json<RemoveRequest>, JsonRejection>,
) -> ApiResult<Value> {
    let Json(request) = payload?;
    supervisor.remove(request.id).await?;
    Ok(Json(json!({ "status": "removed", "id": request.id })))
}

async fn clear_queue(State(supervisor): State<Supervisor>) -> Json<Value> {
    let removed = supervisor.clear().await;
    Json(json!({ "status": "cleared", "removed": removed }))
}

async fn move_in_queue(
    State(supervisor): State<Supervisor>,
    payload: Result<Json<MoveRequest>, JsonRejection>,
) -> ApiResult<Value> {
    let Json(request) = payload?;
    let moved = supervisor.move_job(request.id, request.direction).await;
    Ok(Json(json!({ "status": "ok", "moved": moved })))
}

async fn start(State(supervisor): State<Supervisor>) -> Json<Value> {
    let outcome = supervisor.start().await;
    Json(json!({ "status": outcome }))
}

async fn pause(State(supervisor): State<Supervisor>) -> ApiResult<Value> {
    let id = supervisor.pause().await?;
    Ok(Json(json!({ "status": "paused", "id": id })))
}

async fn resume(State(supervisor): State<Supervisor>) -> ApiResult<Value> {
    let id = supervisor.resume().await?;
    Ok(Json(json!({ "status": "resumed", "id": id })))
}

async fn stop(State(supervisor): State<Supervisor>) -> ApiResult<Value> {
    let id = supervisor.stop().await?;
    Ok(Json(json!({ "status": "stopped", "id": id })))
}

async fn cancel(State(supervisor): State<Supervisor>) -> ApiResult<Value> {
    let id = supervisor.cancel().await?;
    Ok(Json(json!({ "status": "cancelled", "id": id })))
}

async fn get_system_stats(State(supervisor): State<Supervisor>) -> Json<SystemStats> {
    let pid = supervisor.encoder_pid().await;
    let volume = supervisor.config().output_dir.clone();
    Json(collect_system_stats(pid, volume).await)
}

async fn get_files(State(supervisor): State<Supervisor>) -> ApiResult<Vec<LibraryEntry>> {
    let root = supervisor.config().media_dir.clone();
    let tree = tokio::task::spawn_blocking(move || list_media_tree(&root))
        .await
        .map_err(|e| ApiError::Internal(format!("Media listing failed: {}", e)))?;
    Ok(Json(tree))
}

async fn get_presets(State(supervisor): State<Supervisor>) -> Json<Vec<String>> {
    Json(list_presets(&supervisor.config().preset_dir))
}

/// Save the multipart field `file` into the preset directory
async fn upload_preset(
    State(supervisor): State<Supervisor>,
    multipart: Result<Multipart, MultipartRejection>,
) -> ApiResult<Value> {
    let mut multipart = multipart.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.body_text()))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field.file_name().unwrap_or_default().to_string();
        let contents = field
            .bytes()
            .await
            .map_err(|e| ApiError::BadRequest(e.body_text()))?;

        let saved = save_preset(&supervisor.config().preset_dir, &file_name, &contents).await?;
        return Ok(Json(json!({ "status": "saved", "filename": saved })));
    }

    Err(ApiError::BadRequest("No file provided".to_string()))
}

/// Creates the axum Router with all endpoints
pub fn create_router(supervisor: Supervisor) -> Router {
    Router::new()
        .route("/queue", get(get_queue))
        .route("/queue/add", post(add_to_queue))
        .route("/queue/remove", post(remove_from_queue))
        .route("/queue/clear", post(clear_queue))
        .route("/queue/move", post(move_in_queue))
        .route("/start", post(start))
        .route("/pause", post(pause))
        .route("/resume", post(resume))
        .route("/stop", post(stop))
        .route("/cancel", post(cancel))
        .route("/encoding-details", get(get_encoding_details))
        .route("/history", get(get_history))
        .route("/system-stats", get(get_system_stats))
        .route("/files", get(get_files))
        .route("/presets", get(get_presets))
        .route("/upload-preset", post(upload_preset))
        .with_state(supervisor)
}

/// Serve `router` on `bind` until `shutdown` resolves
pub async fn run_server<F>(bind: &str, router: Router, shutdown: F) -> Result<(), ServerError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .map_err(|source| ServerError::Bind {
            addr: bind.to_string(),
            source,
        })?;
    info!(addr = %bind, "HTTP server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}
