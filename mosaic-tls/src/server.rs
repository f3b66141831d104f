//! Inbound TLS termination for a listener
//!
//! A [`ServerContextManager`] owns one rustls `ServerConfig` per identity
//! binding. The ClientHello is read before any configuration is chosen, so
//! each binding can carry its own client-certificate policy and verifier.

use crate::certs::{CertificateMaterial, IdentityNames, crypto_provider, identity_names};
use crate::config::{ListenerTlsConfig, TlsConfig, TrustPolicy};
use crate::error::TlsError;
use crate::hooks::Hook;
use crate::index::CertificateIndex;
use crate::inspector::{Prefixed, Protocol, inspect};
use crate::registry::HookRegistry;
use crate::verifier::HookClientVerifier;
use bytes::Bytes;
use rustls::ServerConfig;
use rustls::crypto::CryptoProvider;
use rustls::pki_types::CertificateDer;
use rustls::server::danger::ClientCertVerifier;
use rustls::server::{Acceptor, ClientHello, ResolvesServerCert, WebPkiClientVerifier};
use rustls::sign::CertifiedKey;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio_rustls::LazyConfigAcceptor;
use tokio_rustls::server::TlsStream;
use tracing::{debug, info, warn};

/// One certificate with the trust policy and hook bound to it
#[derive(Debug)]
pub struct IdentityBinding {
    position: usize,
    material: CertificateMaterial,
    policy: TrustPolicy,
    hook: Hook,
    config: Arc<ServerConfig>,
}

impl IdentityBinding {
    /// Position of the binding in the listener configuration
    pub fn position(&self) -> usize {
        self.position
    }

    pub fn names(&self) -> &IdentityNames {
        self.material.names()
    }

    pub fn material(&self) -> &CertificateMaterial {
        &self.material
    }

    pub fn policy(&self) -> &TrustPolicy {
        &self.policy
    }

    pub fn hook(&self) -> &Hook {
        &self.hook
    }

    pub fn config(&self) -> Arc<ServerConfig> {
        self.config.clone()
    }
}

/// Always hands out the binding's certificate; selection already happened
struct BoundIdentity(Arc<CertifiedKey>);

impl std::fmt::Debug for BoundIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("BoundIdentity")
    }
}

impl ResolvesServerCert for BoundIdentity {
    fn resolve(&self, _client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        Some(self.0.clone())
    }
}

fn server_config(
    config: &TlsConfig,
    material: &CertificateMaterial,
    hook: &Hook,
    provider: &Arc<CryptoProvider>,
) -> Result<ServerConfig, TlsError> {
    let versions = config.protocol_versions()?;
    let builder = ServerConfig::builder_with_provider(provider.clone())
        .with_protocol_versions(&versions)
        .map_err(TlsError::Config)?;

    let builder = if config.verify_client {
        let roots = hook.resolve_pool(material.ca_cert())?;
        let verifier: Arc<dyn ClientCertVerifier> = match hook.peer_verifier() {
            Some(verify) => Arc::new(HookClientVerifier::new(
                verify.clone(),
                roots,
                provider.clone(),
            )),
            None => WebPkiClientVerifier::builder_with_provider(roots, provider.clone())
                .build()
                .map_err(|e| TlsError::Verifier(e.to_string()))?,
        };
        builder.with_client_cert_verifier(verifier)
    } else {
        builder.with_no_client_auth()
    };

    let mut server =
        builder.with_cert_resolver(Arc::new(BoundIdentity(material.certified_key())));
    server.alpn_protocols = config.alpn_protocols();
    Ok(server)
}

/// Server-side TLS state of one listener
#[derive(Debug)]
pub struct ServerContextManager {
    bindings: Vec<IdentityBinding>,
    index: CertificateIndex,
    inspector: bool,
    handshake_timeout: Duration,
}

impl ServerContextManager {
    /// Build the listener's TLS state from its bindings.
    ///
    /// Inactive bindings are skipped. The first active binding is the
    /// fallback identity.
    pub fn new(config: &ListenerTlsConfig, registry: &HookRegistry) -> Result<Self, TlsError> {
        let provider = crypto_provider();
        let mut bindings = Vec::new();
        let mut index = CertificateIndex::new();

        for (position, binding) in config.bindings.iter().enumerate() {
            if !binding.status {
                debug!(binding = position, "skipping inactive TLS binding");
                continue;
            }
            if binding.insecure_skip {
                return Err(TlsError::ServerInsecureSkip { binding: position });
            }

            let material = CertificateMaterial::load(binding, &provider)?;
            let hook = registry.resolve(&binding.extension_type, &binding.extension_params)?;
            let server = server_config(binding, &material, &hook, &provider)?;

            let slot = bindings.len();
            for name in material.names().iter() {
                index.insert(name, slot);
            }

            debug!(
                binding = position,
                names = ?material.names(),
                verify_client = binding.verify_client,
                extension = %binding.extension_type,
                "TLS binding loaded"
            );

            bindings.push(IdentityBinding {
                position,
                material,
                policy: binding.trust_policy(),
                hook,
                config: Arc::new(server),
            });
        }

        if bindings.is_empty() {
            return Err(TlsError::NoBindings);
        }

        info!(
            bindings = bindings.len(),
            exact_names = index.exact_len(),
            wildcard_names = index.wildcard_len(),
            inspector = config.inspector,
            "TLS listener context ready"
        );

        Ok(Self {
            bindings,
            index,
            inspector: config.inspector,
            handshake_timeout: config.handshake_timeout(),
        })
    }

    /// Binding serving a requested name.
    ///
    /// Exact name, then single-label wildcard, then the first binding.
    pub fn select(&self, requested: Option<&str>) -> &IdentityBinding {
        let slot = requested
            .and_then(|name| self.index.lookup(name))
            .unwrap_or(0);
        &self.bindings[slot]
    }

    pub fn bindings(&self) -> &[IdentityBinding] {
        &self.bindings
    }

    pub fn inspector_enabled(&self) -> bool {
        self.inspector
    }

    pub fn handshake_timeout(&self) -> Duration {
        self.handshake_timeout
    }

    /// Run the server handshake on a raw connection.
    ///
    /// No deadline is applied; [`dispatch`](Self::dispatch) bounds it.
    pub async fn wrap<S>(&self, stream: S) -> Result<SecureConnection<S>, TlsError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let start = LazyConfigAcceptor::new(Acceptor::default(), stream)
            .await
            .map_err(TlsError::Handshake)?;

        let server_name = start.client_hello().server_name().map(str::to_string);
        let binding = self.select(server_name.as_deref());
        debug!(
            sni = server_name.as_deref().unwrap_or(""),
            binding = binding.position,
            "selected TLS binding"
        );

        let stream = start
            .into_stream(binding.config.clone())
            .await
            .map_err(|e| {
                warn!(
                    sni = server_name.as_deref().unwrap_or(""),
                    binding = binding.position,
                    error = %e,
                    "TLS handshake failed"
                );
                TlsError::Handshake(e)
            })?;

        Ok(SecureConnection {
            stream,
            binding: binding.position,
            binding_names: binding.names().clone(),
            server_name,
        })
    }

    /// Classify (when inspection is on) and terminate a fresh connection,
    /// bounded by the listener's handshake timeout.
    pub async fn dispatch<S>(&self, stream: S) -> Result<Connection<S>, TlsError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        tokio::time::timeout(self.handshake_timeout, self.negotiate(stream))
            .await
            .map_err(|_| TlsError::HandshakeTimeout(self.handshake_timeout))?
    }

    async fn negotiate<S>(&self, stream: S) -> Result<Connection<S>, TlsError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        if !self.inspector {
            let stream = Prefixed::new(Bytes::new(), stream);
            return Ok(Connection::Tls(Box::new(self.wrap(stream).await?)));
        }

        let (protocol, stream) = inspect(stream).await?;
        match protocol {
            Protocol::Tls => Ok(Connection::Tls(Box::new(self.wrap(stream).await?))),
            Protocol::Plaintext => {
                debug!("plaintext connection on inspecting listener");
                Ok(Connection::Plain(stream))
            }
        }
    }
}

/// Server-side TLS connection with the identity it was terminated under
#[derive(Debug)]
pub struct SecureConnection<S> {
    stream: TlsStream<S>,
    binding: usize,
    binding_names: IdentityNames,
    server_name: Option<String>,
}

impl<S> SecureConnection<S> {
    /// Position of the serving binding in the listener configuration
    pub fn binding(&self) -> usize {
        self.binding
    }

    pub fn binding_names(&self) -> &IdentityNames {
        &self.binding_names
    }

    /// SNI requested by the client
    pub fn server_name(&self) -> Option<&str> {
        self.server_name.as_deref()
    }

    pub fn peer_certificates(&self) -> Option<&[CertificateDer<'static>]> {
        self.stream.get_ref().1.peer_certificates()
    }

    /// Subject CN of the verified client certificate
    pub fn peer_common_name(&self) -> Option<String> {
        let leaf = self.peer_certificates()?.first()?;
        identity_names(leaf).ok()?.common_name
    }

    pub fn alpn_protocol(&self) -> Option<&[u8]> {
        self.stream.get_ref().1.alpn_protocol()
    }

    pub fn get_ref(&self) -> &S {
        self.stream.get_ref().0
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> AsyncRead for SecureConnection<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_read(cx, buf)
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> AsyncWrite for SecureConnection<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().stream).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_shutdown(cx)
    }
}

/// A dispatched downstream connection
#[derive(Debug)]
pub enum Connection<S> {
    Tls(Box<SecureConnection<Prefixed<S>>>),
    Plain(Prefixed<S>),
}

impl<S> Connection<S> {
    /// Plaintext connection on a listener without TLS
    pub fn plaintext(stream: S) -> Self {
        Connection::Plain(Prefixed::new(Bytes::new(), stream))
    }

    pub fn is_tls(&self) -> bool {
        matches!(self, Connection::Tls(_))
    }

    pub fn secure(&self) -> Option<&SecureConnection<Prefixed<S>>> {
        match self {
            Connection::Tls(conn) => Some(&**conn),
            Connection::Plain(_) => None,
        }
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> AsyncRead for Connection<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Connection::Tls(conn) => Pin::new(&mut **conn).poll_read(cx, buf),
            Connection::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> AsyncWrite for Connection<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Connection::Tls(conn) => Pin::new(&mut **conn).poll_write(cx, buf),
            Connection::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Connection::Tls(conn) => Pin::new(&mut **conn).poll_flush(cx),
            Connection::Plain(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Connection::Tls(conn) => Pin::new(&mut **conn).poll_shutdown(cx),
            Connection::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}
