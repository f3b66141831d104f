//! Listener runtime: accept, terminate TLS, hand off to the network filter

use crate::config::ListenerConfig;
use crate::filter::{ConnectionInfo, FilterError, FilterRegistry, NetworkFilter};
use mosaic_tls::{Connection, HookRegistry, ServerContextManager, TlsError};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

/// Pause before accepting again after running out of descriptors
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("listener '{name}': failed to bind {address}: {source}")]
    Bind {
        name: String,
        address: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("listener '{name}': {source}")]
    Tls {
        name: String,
        #[source]
        source: TlsError,
    },

    #[error("listener '{name}': {source}")]
    Filter {
        name: String,
        #[source]
        source: FilterError,
    },
}

/// A bound listener with its TLS state and filter
pub struct Listener {
    name: String,
    tcp: TcpListener,
    tls: Option<Arc<ServerContextManager>>,
    filter: Arc<dyn NetworkFilter>,
}

impl Listener {
    /// Build TLS state and filter, then bind.
    ///
    /// Everything that can fail on configuration fails here, before any
    /// connection is accepted.
    pub async fn bind(
        config: &ListenerConfig,
        hooks: &HookRegistry,
        filters: &FilterRegistry,
    ) -> Result<Self, ListenerError> {
        let name = config.name.clone();

        let tls = config
            .active_tls()
            .map(|tls| ServerContextManager::new(tls, hooks))
            .transpose()
            .map_err(|source| ListenerError::Tls {
                name: name.clone(),
                source,
            })?
            .map(Arc::new);

        let filter = filters
            .create(&config.filter, hooks)
            .map_err(|source| ListenerError::Filter {
                name: name.clone(),
                source,
            })?;

        let tcp = TcpListener::bind(config.address)
            .await
            .map_err(|source| ListenerError::Bind {
                name: name.clone(),
                address: config.address,
                source,
            })?;

        info!(
            listener = %name,
            address = %config.address,
            tls = tls.is_some(),
            filter = %config.filter.filter_type,
            "listener bound"
        );

        Ok(Self {
            name,
            tcp,
            tls,
            filter,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.tcp.local_addr()
    }

    /// Accept until the listening socket fails. Each connection runs on its
    /// own task.
    pub async fn run(self) -> std::io::Result<()> {
        let name: Arc<str> = Arc::from(self.name.as_str());
        loop {
            let (stream, peer) = match self.tcp.accept().await {
                Ok(accepted) => accepted,
                Err(e) if is_transient(&e) => {
                    warn!(listener = %name, error = %e, "accept failed");
                    continue;
                }
                Err(e) if is_resource_exhausted(&e) => {
                    error!(
                        listener = %name,
                        error = %e,
                        backoff_ms = ACCEPT_BACKOFF.as_millis() as u64,
                        "accept failed, out of resources"
                    );
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                    continue;
                }
                Err(e) => {
                    error!(listener = %name, error = %e, "listener stopped");
                    return Err(e);
                }
            };

            let tls = self.tls.clone();
            let filter = self.filter.clone();
            let name = name.clone();
            tokio::spawn(async move {
                handle(&name, stream, peer, tls.as_deref(), filter.as_ref()).await;
            });
        }
    }
}

fn is_transient(e: &std::io::Error) -> bool {
    use std::io::ErrorKind;
    matches!(
        e.kind(),
        ErrorKind::ConnectionAborted | ErrorKind::ConnectionReset | ErrorKind::Interrupted
    )
}

/// Descriptor or buffer exhaustion; clears once connections close
fn is_resource_exhausted(e: &std::io::Error) -> bool {
    if e.kind() == std::io::ErrorKind::OutOfMemory {
        return true;
    }

    #[cfg(unix)]
    {
        matches!(
            e.raw_os_error(),
            Some(libc::EMFILE | libc::ENFILE | libc::ENOBUFS | libc::ENOMEM)
        )
    }
    #[cfg(not(unix))]
    {
        false
    }
}

async fn handle(
    listener: &str,
    stream: TcpStream,
    peer: SocketAddr,
    tls: Option<&ServerContextManager>,
    filter: &dyn NetworkFilter,
) {
    let conn = match tls {
        Some(manager) => match manager.dispatch(stream).await {
            Ok(conn) => conn,
            Err(e) => {
                warn!(listener, %peer, error = %e, "dropping connection");
                return;
            }
        },
        None => Connection::plaintext(stream),
    };

    let info = ConnectionInfo::new(listener, peer, &conn);
    debug!(
        listener,
        %peer,
        tls = info.tls,
        sni = info.server_name.as_deref().unwrap_or(""),
        binding = ?info.binding,
        peer_cn = info.peer_common_name.as_deref().unwrap_or(""),
        "connection accepted"
    );

    if let Err(e) = filter.on_connection(conn, info).await {
        warn!(listener, %peer, error = %e, "connection failed");
    }
}
