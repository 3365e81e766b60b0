//! Proxy engine configuration
//!
//! Defines the listener, buffer, timing and routing settings for the engine.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::helper::{
    duration_from_secs, ListenerOpts, DEFAULT_BUFFER_SIZE, DEFAULT_IDLE_TIMEOUT_SECS,
    DEFAULT_REAPER_INTERVAL_SECS, MAX_DATAGRAM_SIZE,
};

/// Default buffer size in bytes
fn default_buffer_size() -> usize {
    DEFAULT_BUFFER_SIZE
}

/// Default idle timeout in seconds
fn default_idle_timeout() -> u64 {
    DEFAULT_IDLE_TIMEOUT_SECS
}

/// Default reaper interval in seconds
fn default_reaper_interval() -> u64 {
    DEFAULT_REAPER_INTERVAL_SECS
}

/// Default consecutive read error threshold
fn default_max_consecutive_read_errors() -> u32 {
    128
}

/// Proxy engine configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ProxyConfig {
    /// Client-facing listen address (e.g., "0.0.0.0:8888")
    pub listen_addr: String,

    /// Datagram buffer size in bytes
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    /// Idle session timeout in seconds
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout: u64,

    /// Idle reaper sweep period in seconds
    #[serde(default = "default_reaper_interval")]
    pub reaper_interval: u64,

    /// Consecutive listener read errors tolerated before giving up
    #[serde(default = "default_max_consecutive_read_errors")]
    pub max_consecutive_read_errors: u32,

    /// Fallback backend for datagrams no route claims
    #[serde(default)]
    pub backend: Option<String>,

    /// Prefix routes, checked in order
    #[serde(default)]
    pub routes: Vec<RouteConfig>,

    /// SO_RCVBUF for the listener, 0 = OS default
    #[serde(default)]
    pub recv_buffer_size: usize,

    /// SO_SNDBUF for the listener, 0 = OS default
    #[serde(default)]
    pub send_buffer_size: usize,
}

/// A single prefix route
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct RouteConfig {
    /// Leading bytes of the datagram, matched literally
    pub prefix: String,
    /// Backend address (host:port)
    pub backend: String,
}

impl ProxyConfig {
    /// Create a config with defaults that forwards everything to `backend`
    pub fn new(listen_addr: &str, backend: &str) -> Self {
        ProxyConfig {
            listen_addr: listen_addr.to_string(),
            buffer_size: default_buffer_size(),
            idle_timeout: default_idle_timeout(),
            reaper_interval: default_reaper_interval(),
            max_consecutive_read_errors: default_max_consecutive_read_errors(),
            backend: Some(backend.to_string()),
            routes: Vec::new(),
            recv_buffer_size: 0,
            send_buffer_size: 0,
        }
    }

    /// Idle timeout as a duration
    pub fn idle_timeout(&self) -> Duration {
        duration_from_secs(self.idle_timeout)
    }

    /// Reaper interval as a duration
    pub fn reaper_interval(&self) -> Duration {
        duration_from_secs(self.reaper_interval)
    }

    /// Socket options for the listener
    pub fn listener_opts(&self) -> ListenerOpts {
        ListenerOpts {
            recv_buffer_size: self.recv_buffer_size,
            send_buffer_size: self.send_buffer_size,
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.listen_addr.trim().is_empty() {
            return Err("listen_addr must not be empty".to_string());
        }
        if self.buffer_size == 0 || self.buffer_size > MAX_DATAGRAM_SIZE {
            return Err(format!(
                "buffer_size must be between 1 and {} bytes",
                MAX_DATAGRAM_SIZE
            ));
        }
        if self.idle_timeout == 0 {
            return Err("idle_timeout must be greater than 0".to_string());
        }
        if self.reaper_interval == 0 {
            return Err("reaper_interval must be greater than 0".to_string());
        }
        if self.max_consecutive_read_errors == 0 {
            return Err("max_consecutive_read_errors must be greater than 0".to_string());
        }
        if self.backend.is_none() && self.routes.is_empty() {
            return Err("either backend or at least one route must be configured".to_string());
        }
        if self.routes.iter().any(|r| r.prefix.is_empty()) {
            return Err("route prefix must not be empty".to_string());
        }
        Ok(())
    }
}
