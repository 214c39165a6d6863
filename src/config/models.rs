//! Configuration data structures for Gantry.
//!
//! These types map directly to TOML (also JSON / YAML) configuration files.
//! They are intentionally serde‑friendly and include defaults so that
//! minimal configs remain concise.
use serde::{Deserialize, Serialize};

/// Top-level gateway configuration.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct GatewayConfig {
    /// Address the gateway listens on
    pub listen_addr: String,
    /// Logging options
    pub log: LogConfig,
    /// Ordered backend registry entries; loaded once at startup
    pub backends: Vec<BackendConfig>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8080".to_string(),
            log: LogConfig::default(),
            backends: Vec::new(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct LogConfig {
    /// Log filter directive (e.g. "info", "gantry=debug,info")
    pub level: String,
    /// Emit JSON log lines instead of the console format
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: true,
        }
    }
}

/// One backend registry entry.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct BackendConfig {
    /// Name the router matches against the path's `<name>` segment
    pub name: String,
    /// Host the forwarder dials
    pub host: String,
    /// Port the forwarder dials
    pub port: u16,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = GatewayConfig::default();
        assert_eq!(config.listen_addr, "127.0.0.1:8080");
        assert_eq!(config.log.level, "info");
        assert!(config.log.json);
        assert!(config.backends.is_empty());
    }

    #[test]
    fn test_deserialize_backends() {
        let config: GatewayConfig = serde_json::from_value(serde_json::json!({
            "listen_addr": "0.0.0.0:9999",
            "log": { "level": "debug", "json": false },
            "backends": [
                { "name": "echo", "host": "127.0.0.1", "port": 9000 },
                { "name": "orders", "host": "orders.internal", "port": 8080 }
            ]
        }))
        .unwrap();

        assert_eq!(config.listen_addr, "0.0.0.0:9999");
        assert_eq!(config.backends.len(), 2);
        assert_eq!(config.backends[0].name, "echo");
        assert_eq!(config.backends[1].port, 8080);
    }
}
