//! Network filters: what a listener does with a dispatched connection

use crate::config::{DEFAULT_NETWORK_FILTER, FilterConfig};
use async_trait::async_trait;
use mosaic_tls::{Connection, HookRegistry, TlsError};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;

#[derive(Debug, Error)]
pub enum FilterError {
    #[error("Unknown network filter: {0}")]
    UnknownFilter(String),

    #[error("Invalid config for filter '{filter}': {reason}")]
    InvalidConfig { filter: String, reason: String },

    #[error("Upstream {0} did not accept within {1:?}")]
    ConnectTimeout(String, Duration),

    #[error("TLS error: {0}")]
    Tls(#[from] TlsError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Downstream connection as produced by the listener
pub type DownstreamConnection = Connection<TcpStream>;

/// Identity facts about a downstream connection
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub listener: String,
    pub peer: SocketAddr,
    pub tls: bool,
    /// SNI requested by the client
    pub server_name: Option<String>,
    /// Position of the binding that terminated TLS
    pub binding: Option<usize>,
    /// Subject CN of a verified client certificate
    pub peer_common_name: Option<String>,
}

impl ConnectionInfo {
    pub fn new(listener: &str, peer: SocketAddr, conn: &DownstreamConnection) -> Self {
        let secure = conn.secure();
        Self {
            listener: listener.to_string(),
            peer,
            tls: conn.is_tls(),
            server_name: secure.and_then(|c| c.server_name().map(str::to_string)),
            binding: secure.map(|c| c.binding()),
            peer_common_name: secure.and_then(|c| c.peer_common_name()),
        }
    }
}

#[async_trait]
pub trait NetworkFilter: Send + Sync {
    /// Take ownership of a connection until it is done
    async fn on_connection(
        &self,
        conn: DownstreamConnection,
        info: ConnectionInfo,
    ) -> Result<(), FilterError>;
}

/// Builds a filter from its opaque config
pub type FilterFactory =
    fn(&serde_json::Value, &HookRegistry) -> Result<Arc<dyn NetworkFilter>, FilterError>;

/// Network filter factories by type name
#[derive(Clone, Default)]
pub struct FilterRegistry {
    factories: HashMap<String, FilterFactory>,
}

impl FilterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in `proxy` filter
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(DEFAULT_NETWORK_FILTER, crate::proxy::ProxyFilter::factory);
        registry
    }

    /// Register a factory; a later registration replaces an earlier one
    pub fn register(&mut self, name: &str, factory: FilterFactory) -> Option<FilterFactory> {
        let previous = self.factories.insert(name.to_string(), factory);
        if previous.is_some() {
            tracing::warn!(filter = name, "network filter factory replaced");
        }
        previous
    }

    pub fn create(
        &self,
        config: &FilterConfig,
        hooks: &HookRegistry,
    ) -> Result<Arc<dyn NetworkFilter>, FilterError> {
        let factory = self
            .factories
            .get(&config.filter_type)
            .ok_or_else(|| FilterError::UnknownFilter(config.filter_type.clone()))?;
        factory(&config.config, hooks)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }
}
