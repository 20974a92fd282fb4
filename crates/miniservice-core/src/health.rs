use serde::{Deserialize, Serialize};

use crate::tag::url_host;

/// Path answered by the liveness probe.
pub const HEALTH_PATH: &str = "/health";

pub const DEFAULT_CHECK_INTERVAL: &str = "2s";
pub const DEFAULT_CHECK_TIMEOUT: &str = "2s";

/// HTTP check the registry runs against an instance's probe.
///
/// Interval and timeout are duration strings handed to the registry verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheck {
    pub http: String,
    pub interval: String,
    pub timeout: String,
}

impl HealthCheck {
    pub fn http(host: &str, port: u16) -> Self {
        Self {
            http: format!("http://{}:{port}{HEALTH_PATH}", url_host(host)),
            interval: DEFAULT_CHECK_INTERVAL.to_string(),
            timeout: DEFAULT_CHECK_TIMEOUT.to_string(),
        }
    }

    pub fn with_interval(mut self, interval: impl Into<String>) -> Self {
        self.interval = interval.into();
        self
    }

    pub fn with_timeout(mut self, timeout: impl Into<String>) -> Self {
        self.timeout = timeout.into();
        self
    }
}
