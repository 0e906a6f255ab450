//! RTSP source discovery.
//!
//! Cameras from different vendors expose their main stream under different
//! paths. The resolver renders each known URL template for a device and probes
//! the candidates one at a time, in order, until one delivers media.

use std::sync::Arc;

use tracing::{debug, info};

use crate::probe::StreamProbe;
use crate::utils::url::redact_credentials;
use crate::{Error, Result};

/// Templates tried when none are configured.
pub const DEFAULT_RTSP_TEMPLATES: &[&str] = &[
    "rtsp://{user}:{pass}@{ip}:554/cam/realmonitor?channel=1&subtype=0",
    "rtsp://{user}:{pass}@{ip}:554/h264/ch1/main/av_stream",
];

/// Substitute `{ip}`, `{user}` and `{pass}` in `template`.
///
/// Values are inserted verbatim, without URL escaping, and substituted text is
/// never scanned again. Unknown `{...}` sequences are left alone.
pub fn render_template(template: &str, address: &str, user: &str, pass: &str) -> String {
    let mut out = String::with_capacity(template.len() + address.len() + user.len() + pass.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let tail = &rest[open..];
        let (value, consumed) = if tail.starts_with("{ip}") {
            (address, "{ip}".len())
        } else if tail.starts_with("{user}") {
            (user, "{user}".len())
        } else if tail.starts_with("{pass}") {
            (pass, "{pass}".len())
        } else {
            ("{", 1)
        };
        out.push_str(value);
        rest = &tail[consumed..];
    }
    out.push_str(rest);
    out
}

/// Finds the first working stream URL for a device.
#[derive(Clone)]
pub struct SourceResolver {
    templates: Vec<String>,
    probe: Arc<dyn StreamProbe>,
}

impl SourceResolver {
    pub fn new(templates: Vec<String>, probe: Arc<dyn StreamProbe>) -> Self {
        Self { templates, probe }
    }

    pub fn templates(&self) -> &[String] {
        &self.templates
    }

    /// Probe each rendered template in order and return the first that works.
    ///
    /// Exactly `k + 1` probes run when the `k`-th template (zero based) is the
    /// first to succeed; none run after it.
    pub async fn resolve(&self, address: &str, user: &str, pass: &str) -> Result<String> {
        for (index, template) in self.templates.iter().enumerate() {
            let candidate = render_template(template, address, user, pass);
            debug!(
                address = %address,
                candidate = index,
                url = %redact_credentials(&candidate),
                "Probing RTSP candidate"
            );

            if self.probe.probe(&candidate).await {
                info!(
                    address = %address,
                    url = %redact_credentials(&candidate),
                    "Resolved RTSP source"
                );
                return Ok(candidate);
            }
        }

        Err(Error::RtspNotFound {
            address: address.to_string(),
            attempts: self.templates.len(),
        })
    }
}
