//! # udpgate - UDP Reverse Proxy
//!
//! udpgate listens on a single UDP socket, decides which backend each client
//! datagram belongs to, and relays traffic in both directions through one
//! dedicated backend socket per `(client, backend)` flow. Flows that stay
//! quiet for longer than the idle timeout are evicted.
//!
//! ## Features
//!
//! - **Pluggable Classification**: Static, prefix-routed or closure-based backend selection
//! - **Per-Flow Backend Sockets**: Replies are routed back by socket, not by payload
//! - **Idle Eviction**: Background reaper closes sessions without traffic in either direction
//! - **Internal API**: `/health`, `/healthz` and Prometheus `/metrics`
//!
//! ## Usage
//!
//! ```rust,ignore
//! use udpgate::config::load_config;
//! use udpgate::proxy::run_proxy;
//! use tokio::sync::broadcast;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = load_config("config.toml")?;
//!     let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
//!
//!     run_proxy(config, shutdown_rx).await
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! Client -> udpgate listener -> backend session socket -> Backend
//! Client <- udpgate listener <- backend session socket <- Backend
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod config;
pub mod error;
pub mod helper;
pub mod internal_api;
pub mod metrics;
pub mod proxy;

// Re-export commonly used items
pub use config::{load_config, Config};
pub use error::{ClassifyError, ProxyError};
pub use metrics::ProxyMetrics;
pub use proxy::{run_proxy, Proxy, ProxyHandle};

/// Version of the udpgate library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Name of the application
pub const NAME: &str = env!("CARGO_PKG_NAME");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_name() {
        assert_eq!(NAME, "udpgate");
    }
}
