//! Request and response bodies.

use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Deserialize)]
pub struct CheckIpRequest {
    #[serde(default)]
    pub ip: String,
}

#[derive(Debug, Serialize)]
pub struct CheckIpResponse {
    pub online: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct StartStreamRequest {
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct StopStreamResponse {
    pub stopped: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToggleRecordRequest {
    #[serde(default)]
    pub rtsp_url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ToggleRecordResponse {
    pub recording: bool,
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub active_streams: usize,
}

/// Request to update the log filter.
#[derive(Debug, Deserialize)]
pub struct UpdateLogFilterRequest {
    pub filter: String,
}

#[derive(Debug, Serialize)]
pub struct ModuleInfo {
    pub name: String,
    pub description: String,
}

/// Response for logging configuration.
#[derive(Debug, Serialize)]
pub struct LoggingConfigResponse {
    pub filter: String,
    pub available_modules: Vec<ModuleInfo>,
}
