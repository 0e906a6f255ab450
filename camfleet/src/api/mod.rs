//! HTTP API.
//!
//! Stream control endpoints live at the root, next to `/ws` for detection
//! push, `/hls` for the playlists and `/health`.

pub mod error;
pub mod models;
pub mod routes;
pub mod server;

pub use error::{ApiError, ApiResult};
pub use server::{ApiServer, ApiServerConfig, AppState};
