//! Flow identity
//!
//! A flow is one client talking to one backend through the proxy.

use std::fmt;
use std::net::SocketAddr;

/// Session table key: `(client address, backend address)`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FlowKey {
    client: SocketAddr,
    backend: String,
}

impl FlowKey {
    /// Create a key for `client` talking to `backend` (host:port)
    pub fn new(client: SocketAddr, backend: impl Into<String>) -> Self {
        FlowKey {
            client,
            backend: backend.into(),
        }
    }

    /// Client address responses are relayed to
    pub fn client(&self) -> SocketAddr {
        self.client
    }

    /// Backend address as produced by the classifier
    pub fn backend(&self) -> &str {
        &self.backend
    }
}

impl fmt::Display for FlowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}", self.client, self.backend)
    }
}
