//! Error types for Udpgate
//!
//! This module defines all custom error types used throughout the proxy.

use std::io;
use thiserror::Error;

/// Main error type for proxy operations
#[derive(Error, Debug)]
pub enum ProxyError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// The datagram could not be mapped to a backend
    #[error("Classification error: {0}")]
    Classification(#[from] ClassifyError),

    /// The datagram did not fit the configured buffer
    #[error("Datagram too large: {size} bytes exceeds buffer of {capacity} bytes")]
    DatagramTooLarge {
        /// Bytes observed (at least `capacity + 1`)
        size: usize,
        /// Configured buffer size
        capacity: usize,
    },

    /// A backend session could not be opened
    #[error("Failed to create session for backend {backend}: {reason}")]
    SessionCreate {
        /// Backend address as produced by the classifier
        backend: String,
        /// Underlying cause
        reason: String,
    },

    /// The session was closed before the operation ran
    #[error("Session closed")]
    SessionClosed,

    /// Backend address resolution error
    #[error("Failed to resolve {0}")]
    Resolve(String),

    /// Unrecoverable client-facing listener fault
    #[error("Listener error: {0}")]
    Listener(String),
}

/// Backend classification failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClassifyError {
    /// Zero-length datagram
    #[error("Empty datagram")]
    Empty,

    /// No route matched and no default backend is configured
    #[error("No backend route matches datagram")]
    NoRoute,

    /// Classifier-specific failure
    #[error("Invalid datagram: {0}")]
    Invalid(String),
}

impl ProxyError {
    /// Whether the error ends the owning session rather than a single datagram
    pub fn is_session_fatal(&self) -> bool {
        matches!(self, ProxyError::Io(_))
    }
}
