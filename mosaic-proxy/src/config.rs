use mosaic_tls::ListenerTlsConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Network filter used when a listener names none
pub const DEFAULT_NETWORK_FILTER: &str = "proxy";

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read file {0}: {1}")]
    FileRead(PathBuf, std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Duplicate listener name: {0}")]
    DuplicateListenerName(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Proxy configuration file (`mosaic.toml`)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProxyConfig {
    #[serde(default)]
    pub listeners: Vec<ListenerConfig>,
}

/// One `[[listeners]]` entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenerConfig {
    pub name: String,

    /// Bind address, e.g. `0.0.0.0:2045`
    pub address: SocketAddr,

    /// TLS termination; absent means plaintext only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<ListenerTlsConfig>,

    #[serde(default)]
    pub filter: FilterConfig,
}

/// Network filter selection and its opaque settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FilterConfig {
    #[serde(rename = "type", default = "default_filter_type")]
    pub filter_type: String,

    #[serde(default)]
    pub config: serde_json::Value,
}

fn default_filter_type() -> String {
    DEFAULT_NETWORK_FILTER.to_string()
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            filter_type: default_filter_type(),
            config: serde_json::Value::Null,
        }
    }
}

impl ListenerConfig {
    /// TLS settings when at least one binding is active
    pub fn active_tls(&self) -> Option<&ListenerTlsConfig> {
        self.tls.as_ref().filter(|tls| tls.is_enabled())
    }
}

impl ProxyConfig {
    /// Load and validate a configuration file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::FileRead(path.as_ref().to_path_buf(), e))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.listeners.is_empty() {
            return Err(ConfigError::Validation(
                "at least one [[listeners]] entry is required".to_string(),
            ));
        }

        let mut names = HashSet::new();
        for listener in &self.listeners {
            if listener.name.trim().is_empty() {
                return Err(ConfigError::Validation(format!(
                    "listener on {} has no name",
                    listener.address
                )));
            }
            if !names.insert(listener.name.as_str()) {
                return Err(ConfigError::DuplicateListenerName(listener.name.clone()));
            }
            if listener.filter.filter_type.trim().is_empty() {
                return Err(ConfigError::Validation(format!(
                    "listener '{}' has an empty filter type",
                    listener.name
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
[[listeners]]
name = "ingress"
address = "127.0.0.1:2045"

[listeners.tls]
inspector = true
handshake_timeout_ms = 5000

[[listeners.tls.bindings]]
cert_chain = "/etc/mosaic/www.pem"
private_key = "/etc/mosaic/www.key"

[[listeners.tls.bindings]]
status = false
cert_chain = "/etc/mosaic/old.pem"
private_key = "/etc/mosaic/old.key"
verify_client = true
type = "common_name"
extend_verify = { cn = "orders" }

[listeners.filter]
type = "proxy"
config = { upstream = "127.0.0.1:8080" }

[[listeners]]
name = "plain"
address = "127.0.0.1:2046"
"#;

    #[test]
    fn parses_listeners() {
        let config = ProxyConfig::parse(SAMPLE).unwrap();
        assert_eq!(config.listeners.len(), 2);

        let ingress = &config.listeners[0];
        let tls = ingress.active_tls().unwrap();
        assert!(tls.inspector);
        assert_eq!(tls.handshake_timeout_ms, 5000);
        assert_eq!(tls.bindings.len(), 2);
        assert!(tls.bindings[0].status);
        assert!(!tls.bindings[1].status);
        assert_eq!(tls.bindings[1].extension_type, "common_name");
        assert_eq!(tls.bindings[1].extension_params["cn"], "orders");
        assert_eq!(ingress.filter.config["upstream"], "127.0.0.1:8080");

        let plain = &config.listeners[1];
        assert!(plain.active_tls().is_none());
        assert_eq!(plain.filter, FilterConfig::default());
        assert_eq!(plain.filter.filter_type, DEFAULT_NETWORK_FILTER);
    }

    #[test]
    fn example_config_parses() {
        let config = ProxyConfig::parse(include_str!("../mosaic.example.toml")).unwrap();
        assert_eq!(config.listeners.len(), 2);

        let tls = config.listeners[0].active_tls().unwrap();
        assert!(tls.bindings[1].verify_client);
        assert_eq!(tls.bindings[1].extension_params["cn"][1], "billing");

        let egress = &config.listeners[1];
        assert!(egress.active_tls().is_none());
        assert_eq!(
            egress.filter.config["tls"]["server_name"],
            "payments.mesh.local"
        );
    }

    #[test]
    fn tls_without_active_bindings_is_plaintext() {
        let config = ProxyConfig::parse(
            r#"
[[listeners]]
name = "off"
address = "127.0.0.1:2047"

[[listeners.tls.bindings]]
status = false
"#,
        )
        .unwrap();
        assert!(config.listeners[0].tls.is_some());
        assert!(config.listeners[0].active_tls().is_none());
    }

    #[test]
    fn rejects_empty_config() {
        assert!(matches!(
            ProxyConfig::parse(""),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn rejects_duplicate_names() {
        let err = ProxyConfig::parse(
            r#"
[[listeners]]
name = "dup"
address = "127.0.0.1:1"

[[listeners]]
name = "dup"
address = "127.0.0.1:2"
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateListenerName(name) if name == "dup"));
    }

    #[test]
    fn rejects_bad_address() {
        let err = ProxyConfig::parse(
            r#"
[[listeners]]
name = "bad"
address = "not-an-address"
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::TomlParse(_)));
    }

    #[test]
    fn load_from_file_reports_path() {
        let err = ProxyConfig::load_from_file("/nonexistent/mosaic.toml").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/mosaic.toml"));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let config = ProxyConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.listeners[0].name, "ingress");
    }
}
