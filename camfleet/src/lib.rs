//! camfleet library crate.
//!
//! Orchestrates live camera feeds: RTSP discovery, HLS republishing through an
//! encoder process, motion detection and on-demand recording.

pub mod api;
pub mod config;
pub mod error;
pub mod events;
pub mod logging;
pub mod probe;
pub mod registry;
pub mod resolver;
pub mod stream;
pub mod utils;
pub mod worker;

pub use error::{Error, Result};
