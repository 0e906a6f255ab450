//! Stream control and query routes.
//!
//! Request bodies are parsed leniently: an empty body or a missing field is
//! treated as an absent parameter and reported as `MISSING_PARAMETER` by the
//! stream manager, not rejected by the extractor.

use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post},
};
use bytes::Bytes;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::api::error::{ApiError, ApiResult};
use crate::api::models::{
    CheckIpRequest, CheckIpResponse, StartStreamRequest, StopStreamResponse, ToggleRecordRequest,
    ToggleRecordResponse,
};
use crate::api::server::AppState;
use crate::stream::{StreamInfo, StreamStatus};

/// `/check-ip`, `/start-stream`, `/stop-stream/{id}` and `/toggle-record/{id}`.
pub fn control_router() -> Router<AppState> {
    Router::new()
        .route("/check-ip", post(check_ip))
        .route("/start-stream", post(start_stream))
        .route("/stop-stream/{id}", post(stop_stream))
        .route("/toggle-record/{id}", post(toggle_record))
}

/// Read-only views, mounted under `/api/streams`.
pub fn query_router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_streams))
        .route("/{id}", get(get_stream))
}

fn parse_body<T: DeserializeOwned + Default>(body: &[u8]) -> ApiResult<T> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| {
        debug!("Rejected request body: {}", e);
        ApiError::bad_request("Request body must be a JSON object")
    })
}

async fn check_ip(State(state): State<AppState>, body: Bytes) -> ApiResult<Json<CheckIpResponse>> {
    let request: CheckIpRequest = parse_body(&body)?;
    let online = state.stream_manager.check_device(&request.ip).await?;
    Ok(Json(CheckIpResponse { online }))
}

async fn start_stream(State(state): State<AppState>, body: Bytes) -> ApiResult<Json<StreamInfo>> {
    let request: StartStreamRequest = parse_body(&body)?;
    let info = state
        .stream_manager
        .start_stream(&request.ip, &request.username, &request.password)
        .await?;
    Ok(Json(info))
}

async fn stop_stream(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Json<StopStreamResponse> {
    state.stream_manager.stop_stream(&id).await;
    Json(StopStreamResponse { stopped: true })
}

async fn toggle_record(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<Json<ToggleRecordResponse>> {
    // A malformed body is the same as no body: the URL is missing.
    let request: ToggleRecordRequest = parse_body(&body).unwrap_or_default();
    let recording = state
        .stream_manager
        .toggle_recording(&id, request.rtsp_url.as_deref())
        .await?;
    Ok(Json(ToggleRecordResponse { recording }))
}

async fn list_streams(State(state): State<AppState>) -> Json<Vec<StreamStatus>> {
    Json(state.stream_manager.list_streams())
}

async fn get_stream(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<StreamStatus>> {
    state
        .stream_manager
        .stream_status(&id)
        .map(Json)
        .ok_or_else(|| ApiError::from(crate::Error::stream_not_found(id)))
}
