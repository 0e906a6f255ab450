//! Connectivity probes used before a stream is started.
//!
//! Both probes run an external program and reduce it to a yes/no answer under
//! a hard timeout. They sit behind traits so the resolver and the stream
//! manager can be driven by fakes.

mod reachability;
mod stream;

use async_trait::async_trait;

pub use reachability::PingProbe;
pub use stream::FfmpegProbe;

/// Checks whether a candidate stream URL actually delivers media.
#[async_trait]
pub trait StreamProbe: Send + Sync {
    async fn probe(&self, url: &str) -> bool;
}

/// Checks whether a device answers on the network at all.
#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    async fn is_reachable(&self, address: &str) -> bool;
}
