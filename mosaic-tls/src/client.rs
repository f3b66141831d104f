//! Outbound TLS for upstream connections

use crate::certs::{CertificateMaterial, crypto_provider};
use crate::config::TlsConfig;
use crate::error::TlsError;
use crate::hooks::Hook;
use crate::registry::HookRegistry;
use crate::verifier::{HookServerVerifier, InsecureServerVerifier};
use rustls::ClientConfig;
use rustls::pki_types::ServerName;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;
use tracing::{debug, warn};

/// Client-side TLS state for one upstream cluster
#[derive(Debug, Clone)]
pub struct ClientContextManager {
    config: Arc<ClientConfig>,
    server_name: Option<String>,
    hook: Hook,
}

impl ClientContextManager {
    /// Build the outbound configuration.
    ///
    /// `insecure_skip` disables peer verification and takes precedence over
    /// a hook verifier. Without either, the server chain and name are
    /// checked against the hook's trust pool.
    pub fn new(config: &TlsConfig, registry: &HookRegistry) -> Result<Self, TlsError> {
        let provider = crypto_provider();
        let hook = registry.resolve(&config.extension_type, &config.extension_params)?;

        let versions = config.protocol_versions()?;
        let builder = ClientConfig::builder_with_provider(provider.clone())
            .with_protocol_versions(&versions)
            .map_err(TlsError::Config)?;

        let builder = if config.insecure_skip {
            if hook.overrides_verification() {
                warn!(
                    extension = %config.extension_type,
                    "insecure_skip set; hook verifier will not run"
                );
            }
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(InsecureServerVerifier::new(
                    provider.clone(),
                )))
        } else {
            let roots = hook.resolve_pool(&config.ca_cert)?;
            match hook.peer_verifier() {
                Some(verify) => builder.dangerous().with_custom_certificate_verifier(Arc::new(
                    HookServerVerifier::new(verify.clone(), roots, provider.clone()),
                )),
                None => builder.with_root_certificates(roots),
            }
        };

        let mut client = if config.has_identity()? {
            let material = CertificateMaterial::load(config, &provider)?;
            builder
                .with_client_auth_cert(material.chain().to_vec(), material.private_key())
                .map_err(TlsError::Config)?
        } else {
            builder.with_no_client_auth()
        };
        client.alpn_protocols = config.alpn_protocols();

        debug!(
            extension = %config.extension_type,
            insecure_skip = config.insecure_skip,
            client_cert = config.has_identity()?,
            "TLS client context ready"
        );

        Ok(Self {
            config: Arc::new(client),
            server_name: config.server_name.clone(),
            hook,
        })
    }

    /// Ready outbound configuration, shareable across connections
    pub fn config(&self) -> Arc<ClientConfig> {
        self.config.clone()
    }

    pub fn connector(&self) -> TlsConnector {
        TlsConnector::from(self.config.clone())
    }

    pub fn hook(&self) -> &Hook {
        &self.hook
    }

    /// Name sent as SNI and checked against the server certificate
    pub fn server_name_for<'a>(&'a self, host: &'a str) -> &'a str {
        self.server_name.as_deref().unwrap_or(host)
    }

    /// Run the client handshake over an established transport
    pub async fn connect<S>(&self, host: &str, stream: S) -> Result<TlsStream<S>, TlsError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let name = self.server_name_for(host);
        let server_name = ServerName::try_from(name.to_string())
            .map_err(|e| TlsError::ServerName(format!("{name}: {e}")))?;

        self.connector()
            .connect(server_name, stream)
            .await
            .map_err(TlsError::Handshake)
    }
}
