use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::ReachabilityProbe;

/// Single ICMP echo through the system `ping` binary.
#[derive(Debug, Clone)]
pub struct PingProbe {
    program: String,
    timeout: Duration,
}

impl PingProbe {
    pub fn new(timeout: Duration) -> Self {
        Self {
            program: "ping".to_string(),
            timeout,
        }
    }

    /// Use a different `ping`-compatible program.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    fn build_args(&self, address: &str) -> Vec<String> {
        if cfg!(windows) {
            let millis = self.timeout.as_millis().max(1);
            vec!["-n".into(), "1".into(), "-w".into(), millis.to_string(), address.into()]
        } else {
            let secs = self.timeout.as_secs().max(1);
            vec!["-c".into(), "1".into(), "-W".into(), secs.to_string(), address.into()]
        }
    }
}

/// Host names and IP literals only; anything that could be read as a flag is refused.
fn is_plausible_address(address: &str) -> bool {
    !address.is_empty()
        && !address.starts_with('-')
        && address
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | ':' | '-' | '_' | '%'))
}

#[async_trait]
impl ReachabilityProbe for PingProbe {
    async fn is_reachable(&self, address: &str) -> bool {
        if !is_plausible_address(address) {
            debug!(address = %address, "Refusing to ping malformed address");
            return false;
        }

        let mut child = match process_utils::silent_command(&self.program)
            .args(self.build_args(address))
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                debug!(address = %address, "Failed to spawn ping: {}", e);
                return false;
            }
        };

        // ping honours its own deadline; the outer bound covers resolver stalls.
        let deadline = self.timeout + Duration::from_secs(1);
        match tokio::time::timeout(deadline, child.wait()).await {
            Ok(Ok(status)) => status.success(),
            Ok(Err(e)) => {
                debug!(address = %address, "Error waiting for ping: {}", e);
                false
            }
            Err(_) => {
                debug!(address = %address, "Ping timed out");
                false
            }
        }
    }
}
