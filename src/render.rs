//! Shared render data
//!
//! Values computed once per process and reused by every page render.

use once_cell::sync::OnceCell;
use serde::Serialize;

static HOST_RENDER: OnceCell<HostRender> = OnceCell::new();

/// Public site host, always carrying a scheme
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostRender {
    pub host: String,
}

impl HostRender {
    pub fn new(host: &str) -> Self {
        let host = host.trim().trim_end_matches('/');
        let host = if host.starts_with("http://") || host.starts_with("https://") {
            host.to_string()
        } else {
            format!("http://{}", host)
        };
        Self { host }
    }

    /// Process-wide value, computed from `host` on the first call only
    ///
    /// Later calls return the cached value and ignore their argument.
    pub fn global(host: &str) -> &'static HostRender {
        HOST_RENDER.get_or_init(|| {
            let render = HostRender::new(host);
            tracing::debug!("Host render initialized: {}", render.host);
            render
        })
    }
}
