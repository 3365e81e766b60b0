//! Internal API configuration
//!
//! Settings for the HTTP health and metrics side channel.

use serde::{Deserialize, Serialize};
use std::time::Duration;

fn default_port() -> u16 {
    8080
}

fn default_enabled() -> bool {
    true
}

fn default_graceful_shutdown_timeout() -> u64 {
    5
}

/// Internal HTTP API configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct InternalApiConfig {
    /// TCP port the API listens on (all interfaces)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Serve `/health` and `/healthz`
    #[serde(default = "default_enabled")]
    pub healthcheck: bool,

    /// Serve `/metrics`
    #[serde(default = "default_enabled")]
    pub metrics: bool,

    /// Seconds to wait for in-flight requests on shutdown
    #[serde(default = "default_graceful_shutdown_timeout")]
    pub graceful_shutdown_timeout: u64,
}

impl Default for InternalApiConfig {
    fn default() -> Self {
        InternalApiConfig {
            port: default_port(),
            healthcheck: default_enabled(),
            metrics: default_enabled(),
            graceful_shutdown_timeout: default_graceful_shutdown_timeout(),
        }
    }
}

impl InternalApiConfig {
    /// Graceful shutdown timeout as a duration
    pub fn graceful_shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.graceful_shutdown_timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_internal_api_config_default() {
        let config = InternalApiConfig::default();
        assert_eq!(config.port, 8080);
        assert!(config.healthcheck);
        assert!(config.metrics);
        assert_eq!(config.graceful_shutdown_timeout(), Duration::from_secs(5));
    }
}
