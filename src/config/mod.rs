//! Configuration module for Udpgate
//!
//! This module provides configuration types and parsing for the proxy.

mod internal_api;
mod proxy;

pub use internal_api::InternalApiConfig;
pub use proxy::{ProxyConfig, RouteConfig};

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

/// Prefix for environment variable overrides
pub const ENV_PREFIX: &str = "UDPGATE";

/// Root configuration structure
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    /// Proxy engine configuration
    pub proxy: ProxyConfig,

    /// Internal HTTP API configuration
    #[serde(default)]
    pub internal_api: InternalApiConfig,
}

impl Config {
    /// Validate the whole configuration
    pub fn validate(&self) -> Result<()> {
        self.proxy
            .validate()
            .map_err(|e| anyhow!("Invalid [proxy] section: {}", e))
    }

    /// Apply overrides from a variable lookup.
    ///
    /// Keys are `UDPGATE_<SECTION>_<FIELD>` in upper case, one per scalar
    /// setting. Routes can only be set in the file.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |name: &str| {
            let key = format!("{}_{}", ENV_PREFIX, name);
            lookup(&key).map(|value| (key, value))
        };

        let proxy = &mut self.proxy;
        if let Some((_, addr)) = lookup("PROXY_LISTEN_ADDR") {
            proxy.listen_addr = addr;
        }
        if let Some((_, backend)) = lookup("PROXY_BACKEND") {
            proxy.backend = Some(backend);
        }
        parse_override(lookup("PROXY_BUFFER_SIZE"), &mut proxy.buffer_size)?;
        parse_override(lookup("PROXY_IDLE_TIMEOUT"), &mut proxy.idle_timeout)?;
        parse_override(lookup("PROXY_REAPER_INTERVAL"), &mut proxy.reaper_interval)?;
        parse_override(
            lookup("PROXY_MAX_CONSECUTIVE_READ_ERRORS"),
            &mut proxy.max_consecutive_read_errors,
        )?;
        parse_override(lookup("PROXY_RECV_BUFFER_SIZE"), &mut proxy.recv_buffer_size)?;
        parse_override(lookup("PROXY_SEND_BUFFER_SIZE"), &mut proxy.send_buffer_size)?;

        let api = &mut self.internal_api;
        parse_override(lookup("INTERNAL_API_PORT"), &mut api.port)?;
        parse_override(lookup("INTERNAL_API_HEALTHCHECK"), &mut api.healthcheck)?;
        parse_override(lookup("INTERNAL_API_METRICS"), &mut api.metrics)?;
        parse_override(
            lookup("INTERNAL_API_GRACEFUL_SHUTDOWN_TIMEOUT"),
            &mut api.graceful_shutdown_timeout,
        )?;
        Ok(())
    }
}

/// Parse an override `(key, value)` into `field`, leaving it untouched when unset
fn parse_override<T>(entry: Option<(String, String)>, field: &mut T) -> Result<()>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    if let Some((key, value)) = entry {
        *field = value
            .trim()
            .parse()
            .with_context(|| format!("Invalid {}: {:?}", key, value))?;
    }
    Ok(())
}

/// Load configuration from a TOML file, apply environment overrides and validate
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let content = std::fs::read_to_string(path.as_ref())
        .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

    let mut config = parse_config(&content)?;
    config.apply_overrides(|key| std::env::var(key).ok())?;
    config.validate()?;
    Ok(config)
}

/// Parse configuration from a TOML string
pub fn parse_config(content: &str) -> Result<Config> {
    toml::from_str(content).with_context(|| "Failed to parse configuration")
}
