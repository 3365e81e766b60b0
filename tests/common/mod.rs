//! Test utilities for udpgate
//!
//! This module provides common test utilities used across integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use udpgate::config::{ProxyConfig, RouteConfig};
use udpgate::proxy::{classifier_from_config, Proxy, ProxyHandle};
use udpgate::ProxyMetrics;

/// Default wait for a datagram before a test gives up
pub const RECV_TIMEOUT: Duration = Duration::from_secs(2);

/// A loopback UDP backend that echoes every datagram, prefixed with a tag
pub struct EchoBackend {
    /// Address the backend listens on
    pub addr: SocketAddr,
    task: JoinHandle<()>,
}

impl EchoBackend {
    /// Start an echo backend that replies with `tag` followed by the payload
    pub async fn start(tag: &str) -> Self {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        Self::serve(socket, tag)
    }

    /// Start an echo backend on an already bound socket
    pub fn serve(socket: UdpSocket, tag: &str) -> Self {
        let addr = socket.local_addr().unwrap();
        let tag = tag.as_bytes().to_vec();
        let task = tokio::spawn(async move {
            let mut buf = vec![0u8; 65536];
            loop {
                let Ok((n, peer)) = socket.recv_from(&mut buf).await else {
                    continue;
                };
                let mut reply = tag.clone();
                reply.extend_from_slice(&buf[..n]);
                let _ = socket.send_to(&reply, peer).await;
            }
        });
        EchoBackend { addr, task }
    }

    /// Stop the backend and release its port
    pub async fn stop(self) {
        self.task.abort();
        let _ = self.task.await;
    }
}

/// Create a client socket on an available loopback port
pub async fn create_client() -> UdpSocket {
    UdpSocket::bind("127.0.0.1:0").await.unwrap()
}

/// Receive one datagram, or `None` if nothing arrives within `wait`
pub async fn recv_within(socket: &UdpSocket, wait: Duration) -> Option<(Vec<u8>, SocketAddr)> {
    let mut buf = vec![0u8; 65536];
    match tokio::time::timeout(wait, socket.recv_from(&mut buf)).await {
        Ok(Ok((n, from))) => Some((buf[..n].to_vec(), from)),
        _ => None,
    }
}

/// Send `payload` to `proxy` and wait for the reply
pub async fn round_trip(client: &UdpSocket, proxy: SocketAddr, payload: &[u8]) -> Vec<u8> {
    client.send_to(payload, proxy).await.unwrap();
    let (reply, from) = recv_within(client, RECV_TIMEOUT)
        .await
        .expect("no reply from proxy");
    assert_eq!(from, proxy, "reply must come from the proxy listener");
    reply
}

/// Poll `check` until it holds or `wait` elapses
pub async fn eventually<F: Fn() -> bool>(wait: Duration, check: F) -> bool {
    let deadline = tokio::time::Instant::now() + wait;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}

/// Bind and start a proxy for `config`
pub async fn start_proxy(config: ProxyConfig) -> ProxyHandle {
    let classifier = classifier_from_config(&config);
    Proxy::bind(config, classifier, ProxyMetrics::new())
        .await
        .unwrap()
        .start()
}

/// Test configuration builder
pub struct TestConfigBuilder {
    backend: Option<String>,
    routes: Vec<RouteConfig>,
    buffer_size: usize,
    idle_timeout: u64,
    reaper_interval: u64,
}

impl Default for TestConfigBuilder {
    fn default() -> Self {
        TestConfigBuilder {
            backend: None,
            routes: Vec::new(),
            buffer_size: 1500,
            idle_timeout: 300,
            reaper_interval: 10,
        }
    }
}

impl TestConfigBuilder {
    /// Create a new test config builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the fallback backend
    pub fn backend(mut self, addr: SocketAddr) -> Self {
        self.backend = Some(addr.to_string());
        self
    }

    /// Add a prefix route
    pub fn route(mut self, prefix: &str, addr: SocketAddr) -> Self {
        self.routes.push(RouteConfig {
            prefix: prefix.to_string(),
            backend: addr.to_string(),
        });
        self
    }

    /// Set buffer size
    pub fn buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }

    /// Set idle timeout in seconds
    pub fn idle_timeout(mut self, secs: u64) -> Self {
        self.idle_timeout = secs;
        self
    }

    /// Set reaper interval in seconds
    pub fn reaper_interval(mut self, secs: u64) -> Self {
        self.reaper_interval = secs;
        self
    }

    /// Build the configuration, listening on an ephemeral loopback port
    pub fn build(self) -> ProxyConfig {
        let mut config = ProxyConfig::new("127.0.0.1:0", "");
        config.backend = self.backend;
        config.routes = self.routes;
        config.buffer_size = self.buffer_size;
        config.idle_timeout = self.idle_timeout;
        config.reaper_interval = self.reaper_interval;
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_echo_backend() {
        let backend = EchoBackend::start("b:").await;
        let client = create_client().await;
        client.send_to(b"hi", backend.addr).await.unwrap();

        let (reply, from) = recv_within(&client, RECV_TIMEOUT).await.unwrap();
        assert_eq!(reply, b"b:hi");
        assert_eq!(from, backend.addr);
        backend.stop().await;
    }

    #[test]
    fn test_config_builder() {
        let addr: SocketAddr = "127.0.0.1:7777".parse().unwrap();
        let config = TestConfigBuilder::new()
            .backend(addr)
            .route("a:", addr)
            .buffer_size(64)
            .idle_timeout(1)
            .reaper_interval(1)
            .build();

        assert_eq!(config.backend.as_deref(), Some("127.0.0.1:7777"));
        assert_eq!(config.routes.len(), 1);
        assert_eq!(config.buffer_size, 64);
        assert!(config.validate().is_ok());
    }
}
