//! The default `proxy` network filter: forward bytes to one upstream

use crate::filter::{ConnectionInfo, DownstreamConnection, FilterError, NetworkFilter};
use async_trait::async_trait;
use mosaic_tls::{ClientContextManager, HookRegistry, TlsConfig};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, copy_bidirectional};
use tokio::net::TcpStream;
use tracing::{debug, info};

const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 3_000;

#[derive(Debug, Clone, Deserialize)]
pub struct ProxySettings {
    /// Upstream `host:port`
    pub upstream: String,

    /// Upstream TLS; plaintext when absent or disabled
    #[serde(default)]
    pub tls: Option<TlsConfig>,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

fn default_connect_timeout_ms() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_MS
}

#[derive(Debug)]
pub struct ProxyFilter {
    upstream: String,
    host: String,
    connect_timeout: Duration,
    client: Option<ClientContextManager>,
}

impl ProxyFilter {
    pub fn new(settings: ProxySettings, hooks: &HookRegistry) -> Result<Self, FilterError> {
        let host = upstream_host(&settings.upstream).ok_or_else(|| FilterError::InvalidConfig {
            filter: "proxy".to_string(),
            reason: format!("upstream '{}' is not host:port", settings.upstream),
        })?;

        let client = match settings.tls.as_ref().filter(|tls| tls.status) {
            Some(tls) => Some(ClientContextManager::new(tls, hooks)?),
            None => None,
        };

        Ok(Self {
            host: host.to_string(),
            upstream: settings.upstream,
            connect_timeout: Duration::from_millis(settings.connect_timeout_ms),
            client,
        })
    }

    /// Factory registered as the `proxy` filter
    pub fn factory(
        config: &serde_json::Value,
        hooks: &HookRegistry,
    ) -> Result<Arc<dyn NetworkFilter>, FilterError> {
        let settings = ProxySettings::deserialize(config).map_err(|e| FilterError::InvalidConfig {
            filter: "proxy".to_string(),
            reason: e.to_string(),
        })?;
        Ok(Arc::new(Self::new(settings, hooks)?))
    }

    async fn dial(&self) -> Result<TcpStream, FilterError> {
        tokio::time::timeout(self.connect_timeout, TcpStream::connect(&self.upstream))
            .await
            .map_err(|_| FilterError::ConnectTimeout(self.upstream.clone(), self.connect_timeout))?
            .map_err(FilterError::from)
    }
}

/// Host part of `host:port`, with IPv6 brackets removed
fn upstream_host(upstream: &str) -> Option<&str> {
    let (host, port) = upstream.rsplit_once(':')?;
    port.parse::<u16>().ok()?;
    let host = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);
    (!host.is_empty()).then_some(host)
}

async fn pipe<A, B>(mut downstream: A, mut upstream: B) -> std::io::Result<(u64, u64)>
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    copy_bidirectional(&mut downstream, &mut upstream).await
}

#[async_trait]
impl NetworkFilter for ProxyFilter {
    async fn on_connection(
        &self,
        conn: DownstreamConnection,
        info: ConnectionInfo,
    ) -> Result<(), FilterError> {
        let tcp = self.dial().await?;
        debug!(listener = %info.listener, upstream = %self.upstream, "upstream connected");

        let (sent, received) = match &self.client {
            Some(client) => {
                let tls = client.connect(&self.host, tcp).await?;
                pipe(conn, tls).await?
            }
            None => pipe(conn, tcp).await?,
        };

        info!(
            listener = %info.listener,
            peer = %info.peer,
            upstream = %self.upstream,
            sent,
            received,
            "connection closed"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mosaic_tls::Connection;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn parses_upstream_host() {
        assert_eq!(upstream_host("127.0.0.1:8080"), Some("127.0.0.1"));
        assert_eq!(upstream_host("backend.mesh.local:443"), Some("backend.mesh.local"));
        assert_eq!(upstream_host("[::1]:443"), Some("::1"));
        assert_eq!(upstream_host("backend"), None);
        assert_eq!(upstream_host(":443"), None);
        assert_eq!(upstream_host("backend:http"), None);
    }

    #[test]
    fn factory_reads_settings() {
        let config = serde_json::json!({
            "upstream": "127.0.0.1:9000",
            "connect_timeout_ms": 250,
            "tls": { "status": false, "type": "unregistered" }
        });
        assert!(ProxyFilter::factory(&config, &HookRegistry::new()).is_ok());
    }

    #[test]
    fn factory_builds_upstream_tls() {
        let config = serde_json::json!({
            "upstream": "backend.mesh.local:443",
            "tls": { "type": "unregistered" }
        });
        let err = ProxyFilter::factory(&config, &HookRegistry::new()).err().unwrap();
        assert!(matches!(err, FilterError::Tls(_)));
    }

    #[test]
    fn factory_rejects_bad_upstream() {
        let config = serde_json::json!({ "upstream": "nowhere" });
        let err = ProxyFilter::factory(&config, &HookRegistry::new()).err().unwrap();
        assert!(matches!(err, FilterError::InvalidConfig { .. }));
    }

    #[tokio::test]
    async fn forwards_plaintext_both_ways() {
        let upstream = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let upstream_addr = upstream.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = upstream.accept().await.unwrap();
            let mut buf = [0u8; 5];
            stream.read_exact(&mut buf).await.unwrap();
            assert_eq!(&buf, b"hello");
            stream.write_all(b"world").await.unwrap();
        });

        let filter = ProxyFilter::new(
            ProxySettings {
                upstream: upstream_addr.to_string(),
                tls: None,
                connect_timeout_ms: 1_000,
            },
            &HookRegistry::new(),
        )
        .unwrap();

        let front = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let front_addr = front.local_addr().unwrap();
        let mut client = TcpStream::connect(front_addr).await.unwrap();
        let (stream, peer) = front.accept().await.unwrap();

        let conn = Connection::plaintext(stream);
        let info = ConnectionInfo::new("test", peer, &conn);
        let task = tokio::spawn(async move { filter.on_connection(conn, info).await });

        client.write_all(b"hello").await.unwrap();
        let mut reply = [0u8; 5];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(&reply, b"world");

        drop(client);
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn unreachable_upstream_is_an_error() {
        // Bind then drop to get a port with nothing listening
        let addr = TcpListener::bind("127.0.0.1:0")
            .await
            .unwrap()
            .local_addr()
            .unwrap();

        let filter = ProxyFilter::new(
            ProxySettings {
                upstream: addr.to_string(),
                tls: None,
                connect_timeout_ms: 1_000,
            },
            &HookRegistry::new(),
        )
        .unwrap();
        assert!(filter.dial().await.is_err());
    }
}
