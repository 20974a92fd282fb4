use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use miniservice_core::health::{DEFAULT_CHECK_INTERVAL, DEFAULT_CHECK_TIMEOUT};

use crate::server::REGISTRATION_DELAY;

/// Runtime knobs of a [`MiniService`](crate::MiniService).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Interface both listeners bind to, on ephemeral ports
    pub bind_address: IpAddr,
    /// Host published in the discovery tag. Detected when unset.
    pub advertise_host: Option<String>,
    pub check_interval: String,
    pub check_timeout: String,
    pub registration_delay_ms: u64,
    /// How long the surviving serve loop may drain after the other one ended
    pub drain_timeout_ms: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            advertise_host: None,
            check_interval: DEFAULT_CHECK_INTERVAL.to_string(),
            check_timeout: DEFAULT_CHECK_TIMEOUT.to_string(),
            registration_delay_ms: REGISTRATION_DELAY.as_millis() as u64,
            drain_timeout_ms: 5_000,
        }
    }
}

impl ServiceConfig {
    pub fn registration_delay(&self) -> Duration {
        Duration::from_millis(self.registration_delay_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    pub fn with_bind_address(mut self, addr: IpAddr) -> Self {
        self.bind_address = addr;
        self
    }

    pub fn with_advertise_host(mut self, host: impl Into<String>) -> Self {
        self.advertise_host = Some(host.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_registry_contract() {
        let config = ServiceConfig::default();
        assert_eq!(config.registration_delay(), Duration::from_millis(250));
        assert_eq!(config.check_interval, "2s");
        assert_eq!(config.check_timeout, "2s");
        assert!(config.bind_address.is_unspecified());
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let config: ServiceConfig =
            serde_json::from_str(r#"{"advertise_host":"10.0.0.5","check_interval":"5s"}"#)
                .unwrap();
        assert_eq!(config.advertise_host.as_deref(), Some("10.0.0.5"));
        assert_eq!(config.check_interval, "5s");
        assert_eq!(config.check_timeout, "2s");
        assert_eq!(config.registration_delay_ms, 250);
    }
}
