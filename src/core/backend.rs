use std::{fmt, sync::Arc};

use thiserror::Error;

use crate::config::BackendConfig;

/// Errors related to backend registry construction
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum BackendError {
    /// Error when a backend entry is malformed
    #[error("Invalid backend '{name}': {reason}")]
    InvalidBackend {
        /// Name of the offending entry
        name: String,
        /// Human readable reason
        reason: String,
    },
}

/// Result type for backend operations
pub type BackendResult<T> = Result<T, BackendError>;

/// An immutable named proxy target.
///
/// Loaded once at startup and shared read-only across all requests. The
/// gateway never mutates a backend after construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Backend {
    name: String,
    host: String,
    port: u16,
}

impl Backend {
    /// Create a new backend, validating that name and host are non-empty.
    pub fn new(name: &str, host: &str, port: u16) -> BackendResult<Self> {
        if name.is_empty() {
            return Err(BackendError::InvalidBackend {
                name: "<empty>".to_string(),
                reason: "backend name must not be empty".to_string(),
            });
        }
        if host.is_empty() {
            return Err(BackendError::InvalidBackend {
                name: name.to_string(),
                reason: "backend host must not be empty".to_string(),
            });
        }

        Ok(Backend {
            name: name.to_string(),
            host: host.to_string(),
            port,
        })
    }

    /// The registry lookup key.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Host the forwarder dials.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Port the forwarder dials.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// `host:port` as used for the outbound URI and Host header.
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}:{})", self.name, self.host, self.port)
    }
}

/// Ordered, read-only collection of backends, populated once at startup
/// from the configuration loader.
///
/// Lookup is by name; if two entries share a name the first one wins.
#[derive(Debug, Default)]
pub struct BackendRegistry {
    backends: Vec<Arc<Backend>>,
}

impl BackendRegistry {
    /// Build a registry from configuration entries, preserving their order.
    pub fn from_config(entries: &[BackendConfig]) -> BackendResult<Self> {
        let mut backends = Vec::with_capacity(entries.len());
        for entry in entries {
            backends.push(Arc::new(Backend::new(&entry.name, &entry.host, entry.port)?));
        }
        Ok(Self { backends })
    }

    /// Build a registry from already constructed backends (mainly for tests
    /// and embedders).
    pub fn from_backends(backends: Vec<Backend>) -> Self {
        Self {
            backends: backends.into_iter().map(Arc::new).collect(),
        }
    }

    /// Resolve a backend by name. First match wins.
    pub fn resolve(&self, name: &str) -> Option<Arc<Backend>> {
        self.backends
            .iter()
            .find(|backend| backend.name() == name)
            .cloned()
    }

    /// Number of registered backends.
    pub fn len(&self) -> usize {
        self.backends.len()
    }

    /// Whether the registry holds no backends.
    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    /// Iterate over the registered backends in load order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Backend>> {
        self.backends.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_valid() {
        let backend = Backend::new("orders", "10.0.0.5", 8080).expect("valid backend");
        assert_eq!(backend.name(), "orders");
        assert_eq!(backend.host(), "10.0.0.5");
        assert_eq!(backend.port(), 8080);
        assert_eq!(backend.authority(), "10.0.0.5:8080");
    }

    #[test]
    fn test_backend_rejects_empty_fields() {
        assert!(Backend::new("", "localhost", 80).is_err());
        assert!(Backend::new("orders", "", 80).is_err());
    }

    #[test]
    fn test_registry_resolves_by_name() {
        let registry = BackendRegistry::from_backends(vec![
            Backend::new("orders", "orders.internal", 8080).unwrap(),
            Backend::new("billing", "billing.internal", 9090).unwrap(),
        ]);

        let backend = registry.resolve("billing").expect("billing registered");
        assert_eq!(backend.authority(), "billing.internal:9090");
        assert!(registry.resolve("unknown").is_none());
    }

    #[test]
    fn test_registry_first_match_wins_on_duplicate_names() {
        let registry = BackendRegistry::from_backends(vec![
            Backend::new("orders", "first.internal", 8080).unwrap(),
            Backend::new("orders", "second.internal", 9090).unwrap(),
        ]);

        let backend = registry.resolve("orders").unwrap();
        assert_eq!(backend.host(), "first.internal");
    }

    #[test]
    fn test_registry_from_config_preserves_order() {
        let entries = vec![
            BackendConfig {
                name: "a".to_string(),
                host: "a.internal".to_string(),
                port: 1,
            },
            BackendConfig {
                name: "b".to_string(),
                host: "b.internal".to_string(),
                port: 2,
            },
        ];

        let registry = BackendRegistry::from_config(&entries).unwrap();
        let names: Vec<_> = registry.iter().map(|b| b.name().to_string()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }
}
