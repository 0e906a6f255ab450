//! Process configuration, read from the environment.
//!
//! `main` loads a `.env` file with `dotenvy` first, so every variable below can
//! live there as well. Unset or blank variables fall back to the defaults.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::api::server::ApiServerConfig;
use crate::resolver::DEFAULT_RTSP_TEMPLATES;
use crate::{Error, Result};

/// Runtime configuration for the whole service.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_address: String,
    pub port: u16,
    pub enable_cors: bool,
    /// Base used when building the public HLS playlist URL.
    pub public_base_url: String,
    pub hls_root: PathBuf,
    pub recordings_dir: PathBuf,
    pub log_dir: PathBuf,
    pub ffmpeg_path: String,
    pub detector_program: String,
    pub detector_script: String,
    /// Ordered candidate templates with `{ip}`, `{user}` and `{pass}` placeholders.
    pub rtsp_templates: Vec<String>,
    /// How much media a probe reads before declaring success.
    pub probe_duration: Duration,
    /// Upper bound on a single probe run, after which the probe is killed.
    pub probe_timeout: Duration,
    pub ping_timeout: Duration,
    pub startup_timeout: Duration,
    pub readiness_poll: Duration,
    pub graceful_stop_timeout: Duration,
    pub max_streams: Option<usize>,
    pub precheck_reachability: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        let port = 5000;
        Self {
            bind_address: "0.0.0.0".to_string(),
            port,
            enable_cors: true,
            public_base_url: format!("http://localhost:{port}"),
            hls_root: PathBuf::from("hls"),
            recordings_dir: PathBuf::from("recordings"),
            log_dir: PathBuf::from("logs"),
            ffmpeg_path: "ffmpeg".to_string(),
            detector_program: "python".to_string(),
            detector_script: "./python/detect.py".to_string(),
            rtsp_templates: DEFAULT_RTSP_TEMPLATES.iter().map(|t| t.to_string()).collect(),
            probe_duration: Duration::from_secs(2),
            probe_timeout: Duration::from_secs(10),
            ping_timeout: Duration::from_secs(3),
            startup_timeout: Duration::from_secs(30),
            readiness_poll: Duration::from_millis(300),
            graceful_stop_timeout: Duration::from_secs(10),
            max_streams: None,
            precheck_reachability: false,
        }
    }
}

impl AppConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let mut config = Self::default();

        if let Some(bind_address) = get("API_BIND_ADDRESS") {
            config.bind_address = bind_address;
        }
        if let Some(port) = get("API_PORT") {
            config.port = parse_value("API_PORT", &port)?;
        }
        config.public_base_url = get("PUBLIC_BASE_URL")
            .map(|url| url.trim_end_matches('/').to_string())
            .unwrap_or_else(|| format!("http://localhost:{}", config.port));
        if let Some(flag) = get("ENABLE_CORS") {
            config.enable_cors = parse_flag("ENABLE_CORS", &flag)?;
        }

        if let Some(dir) = get("HLS_ROOT") {
            config.hls_root = PathBuf::from(dir);
        }
        if let Some(dir) = get("RECORDINGS_DIR") {
            config.recordings_dir = PathBuf::from(dir);
        }
        if let Some(dir) = get("LOG_DIR") {
            config.log_dir = PathBuf::from(dir);
        }

        if let Some(path) = get("FFMPEG_PATH") {
            config.ffmpeg_path = path;
        }
        if let Some(program) = get("DETECTOR_PROGRAM") {
            config.detector_program = program;
        }
        if let Some(script) = get("DETECTOR_SCRIPT") {
            config.detector_script = script;
        }
        if let Some(templates) = get("RTSP_TEMPLATES") {
            config.rtsp_templates = templates.split_whitespace().map(str::to_string).collect();
        }

        if let Some(secs) = get("PROBE_DURATION_SECS") {
            config.probe_duration = Duration::from_secs(parse_value("PROBE_DURATION_SECS", &secs)?);
        }
        if let Some(secs) = get("PROBE_TIMEOUT_SECS") {
            config.probe_timeout = Duration::from_secs(parse_value("PROBE_TIMEOUT_SECS", &secs)?);
        }
        if let Some(secs) = get("PING_TIMEOUT_SECS") {
            config.ping_timeout = Duration::from_secs(parse_value("PING_TIMEOUT_SECS", &secs)?);
        }
        if let Some(secs) = get("STARTUP_TIMEOUT_SECS") {
            config.startup_timeout =
                Duration::from_secs(parse_value("STARTUP_TIMEOUT_SECS", &secs)?);
        }
        if let Some(ms) = get("READINESS_POLL_MS") {
            config.readiness_poll = Duration::from_millis(parse_value("READINESS_POLL_MS", &ms)?);
        }
        if let Some(secs) = get("GRACEFUL_STOP_TIMEOUT_SECS") {
            config.graceful_stop_timeout =
                Duration::from_secs(parse_value("GRACEFUL_STOP_TIMEOUT_SECS", &secs)?);
        }

        if let Some(max) = get("MAX_STREAMS") {
            config.max_streams = Some(parse_value("MAX_STREAMS", &max)?);
        }
        if let Some(flag) = get("PRECHECK_REACHABILITY") {
            config.precheck_reachability = parse_flag("PRECHECK_REACHABILITY", &flag)?;
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.rtsp_templates.is_empty() {
            return Err(Error::config("RTSP_TEMPLATES must name at least one template"));
        }
        if self.readiness_poll.is_zero() {
            return Err(Error::config("READINESS_POLL_MS must be greater than zero"));
        }
        if self.max_streams == Some(0) {
            return Err(Error::config("MAX_STREAMS must be greater than zero"));
        }
        Ok(())
    }

    /// HTTP server settings derived from this configuration.
    pub fn api_server_config(&self) -> ApiServerConfig {
        ApiServerConfig {
            bind_address: self.bind_address.clone(),
            port: self.port,
            enable_cors: self.enable_cors,
            ..ApiServerConfig::default()
        }
    }
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse::<T>()
        .map_err(|e| Error::config(format!("{key}: invalid value '{raw}': {e}")))
}

fn parse_flag(key: &str, raw: &str) -> Result<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(Error::config(format!("{key}: expected a boolean, got '{raw}'"))),
    }
}
