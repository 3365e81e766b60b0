//! Backend classification
//!
//! Maps a raw client datagram to the backend it is destined for. The engine
//! only relies on the [`Classifier`] contract; how the backend is derived is
//! up to the implementation.

use std::sync::Arc;

use crate::config::ProxyConfig;
use crate::error::ClassifyError;

/// Decides which backend (host:port) a datagram belongs to.
///
/// Implementations must be pure: the same bytes always yield the same answer
/// and classifying has no side effects.
pub trait Classifier: Send + Sync {
    /// Classify a single datagram
    fn classify(&self, datagram: &[u8]) -> Result<String, ClassifyError>;
}

impl<F> Classifier for F
where
    F: Fn(&[u8]) -> Result<String, ClassifyError> + Send + Sync,
{
    fn classify(&self, datagram: &[u8]) -> Result<String, ClassifyError> {
        self(datagram)
    }
}

/// Sends every datagram to one backend
#[derive(Debug, Clone)]
pub struct StaticClassifier {
    backend: String,
}

impl StaticClassifier {
    /// Create a classifier for `backend`
    pub fn new(backend: impl Into<String>) -> Self {
        StaticClassifier {
            backend: backend.into(),
        }
    }
}

impl Classifier for StaticClassifier {
    fn classify(&self, _datagram: &[u8]) -> Result<String, ClassifyError> {
        Ok(self.backend.clone())
    }
}

/// Routes on a leading byte prefix, first match wins.
///
/// The payload is forwarded untouched; the prefix is not stripped.
#[derive(Debug, Clone, Default)]
pub struct PrefixClassifier {
    routes: Vec<(Vec<u8>, String)>,
    fallback: Option<String>,
}

impl PrefixClassifier {
    /// Create an empty classifier
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a route; routes are checked in insertion order
    pub fn route(mut self, prefix: impl AsRef<[u8]>, backend: impl Into<String>) -> Self {
        self.routes
            .push((prefix.as_ref().to_vec(), backend.into()));
        self
    }

    /// Backend used when no route matches
    pub fn with_fallback(mut self, backend: impl Into<String>) -> Self {
        self.fallback = Some(backend.into());
        self
    }
}

impl Classifier for PrefixClassifier {
    fn classify(&self, datagram: &[u8]) -> Result<String, ClassifyError> {
        if datagram.is_empty() {
            return Err(ClassifyError::Empty);
        }

        self.routes
            .iter()
            .find(|(prefix, _)| datagram.starts_with(prefix))
            .map(|(_, backend)| backend.clone())
            .or_else(|| self.fallback.clone())
            .ok_or(ClassifyError::NoRoute)
    }
}

/// Build the classifier described by the proxy configuration
pub fn classifier_from_config(config: &ProxyConfig) -> Arc<dyn Classifier> {
    if config.routes.is_empty() {
        if let Some(backend) = &config.backend {
            return Arc::new(StaticClassifier::new(backend.clone()));
        }
    }

    let mut classifier = config
        .routes
        .iter()
        .fold(PrefixClassifier::new(), |c, r| {
            c.route(r.prefix.as_bytes(), r.backend.clone())
        });
    if let Some(backend) = &config.backend {
        classifier = classifier.with_fallback(backend.clone());
    }
    Arc::new(classifier)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RouteConfig;

    #[test]
    fn test_static_classifier() {
        let classifier = StaticClassifier::new("127.0.0.1:7777");
        assert_eq!(classifier.classify(b"anything").unwrap(), "127.0.0.1:7777");
        assert_eq!(classifier.classify(b"").unwrap(), "127.0.0.1:7777");
    }

    #[test]
    fn test_prefix_classifier_first_match_wins() {
        let classifier = PrefixClassifier::new()
            .route("room-a", "10.0.0.5:7777")
            .route("room-a:", "10.0.0.9:7777")
            .route("room-b:", "10.0.0.6:7777");

        assert_eq!(classifier.classify(b"room-a:join").unwrap(), "10.0.0.5:7777");
        assert_eq!(classifier.classify(b"room-b:move").unwrap(), "10.0.0.6:7777");
    }

    #[test]
    fn test_prefix_classifier_no_route() {
        let classifier = PrefixClassifier::new().route("room-a:", "10.0.0.5:7777");
        assert_eq!(classifier.classify(b"lobby"), Err(ClassifyError::NoRoute));
        assert_eq!(classifier.classify(b""), Err(ClassifyError::Empty));
    }

    #[test]
    fn test_prefix_classifier_fallback() {
        let classifier = PrefixClassifier::new()
            .route("room-a:", "10.0.0.5:7777")
            .with_fallback("10.0.0.1:7777");
        assert_eq!(classifier.classify(b"lobby").unwrap(), "10.0.0.1:7777");
        assert_eq!(classifier.classify(b""), Err(ClassifyError::Empty));
    }

    #[test]
    fn test_closure_classifier() {
        let classifier = |datagram: &[u8]| match datagram.first() {
            Some(b'1') => Ok("10.0.0.1:7777".to_string()),
            _ => Err(ClassifyError::Invalid("unknown room".to_string())),
        };
        assert_eq!(classifier.classify(b"1hello").unwrap(), "10.0.0.1:7777");
        assert!(classifier.classify(b"2hello").is_err());
    }

    #[test]
    fn test_classifier_from_config() {
        let mut config = ProxyConfig::new("0.0.0.0:8888", "127.0.0.1:7777");
        let classifier = classifier_from_config(&config);
        assert_eq!(classifier.classify(b"x").unwrap(), "127.0.0.1:7777");

        config.routes.push(RouteConfig {
            prefix: "room-a:".to_string(),
            backend: "10.0.0.5:7777".to_string(),
        });
        let classifier = classifier_from_config(&config);
        assert_eq!(classifier.classify(b"room-a:1").unwrap(), "10.0.0.5:7777");
        assert_eq!(classifier.classify(b"x").unwrap(), "127.0.0.1:7777");

        config.backend = None;
        let classifier = classifier_from_config(&config);
        assert_eq!(classifier.classify(b"x"), Err(ClassifyError::NoRoute));
    }
}
