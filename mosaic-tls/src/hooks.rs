//! Pluggable trust verification
//!
//! A [`Hook`] is a pair of capabilities:
//! - peer chain verification, which fully replaces the library's built-in
//!   chain and hostname check when supplied
//! - trust pool resolution, which turns the configured CA reference into a
//!   root store
//!
//! Either capability may be overridden on its own; whatever is not overridden
//! falls back to the default behaviour.

use crate::certs::{root_store_from_pem, system_roots};
use crate::config::load_pem;
use crate::error::TlsError;
use rustls::RootCertStore;
use rustls::crypto::WebPkiSupportedAlgorithms;
use rustls::pki_types::{CertificateDer, UnixTime};
use rustls::server::ParsedCertificate;
use rustls::server::danger::ClientCertVerifier;
use std::sync::Arc;

/// Replacement peer verification
pub type VerifyPeerFn = Arc<dyn Fn(&PeerChain<'_>) -> Result<(), rustls::Error> + Send + Sync>;

/// Replacement trust pool resolution, keyed by the configured CA reference
pub type ResolvePoolFn = Arc<dyn Fn(&str) -> Result<RootCertStore, TlsError> + Send + Sync>;

/// Certificates presented by the peer, as seen by a verification hook
pub struct PeerChain<'a> {
    pub end_entity: &'a CertificateDer<'a>,
    pub intermediates: &'a [CertificateDer<'a>],
    /// Roots resolved for the binding or client context
    pub roots: &'a RootCertStore,
    /// Name the client asked for; only set when verifying a server
    pub server_name: Option<&'a str>,
    pub now: UnixTime,
    pub(crate) check: ChainCheck<'a>,
}

/// Default chain validation for the side being verified
#[derive(Clone, Copy)]
pub(crate) enum ChainCheck<'a> {
    ServerAuth(&'a WebPkiSupportedAlgorithms),
    /// `None` when the trust pool has no usable anchors
    ClientAuth(Option<&'a dyn ClientCertVerifier>),
}

impl PeerChain<'_> {
    /// Build and check the chain from the end entity to the resolved roots.
    ///
    /// Signatures, validity, key usage and path are checked; names are not.
    pub fn verify_to_roots(&self) -> Result<(), rustls::Error> {
        match self.check {
            ChainCheck::ServerAuth(algorithms) => {
                let cert = ParsedCertificate::try_from(self.end_entity)?;
                rustls::client::verify_server_cert_signed_by_trust_anchor(
                    &cert,
                    self.roots,
                    self.intermediates,
                    self.now,
                    algorithms.all,
                )
            }
            ChainCheck::ClientAuth(Some(verifier)) => verifier
                .verify_client_cert(self.end_entity, self.intermediates, self.now)
                .map(|_| ()),
            ChainCheck::ClientAuth(None) => Err(rustls::Error::General(
                "no trust anchors for client certificate verification".to_string(),
            )),
        }
    }

    /// Subject common name of the end entity certificate
    pub fn common_name(&self) -> Result<Option<String>, rustls::Error> {
        crate::certs::identity_names(self.end_entity)
            .map(|names| names.common_name)
            .map_err(|e| rustls::Error::General(e.to_string()))
    }
}

/// Trust verification logic bound to a binding or client context
#[derive(Clone, Default)]
pub struct Hook {
    verify_peer: Option<VerifyPeerFn>,
    resolve_pool: Option<ResolvePoolFn>,
}

impl Hook {
    /// Hook with default chain validation and pool resolution
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace peer verification
    pub fn with_peer_verifier<F>(mut self, verify: F) -> Self
    where
        F: Fn(&PeerChain<'_>) -> Result<(), rustls::Error> + Send + Sync + 'static,
    {
        self.verify_peer = Some(Arc::new(verify));
        self
    }

    /// Replace trust pool resolution
    pub fn with_pool_resolver<F>(mut self, resolve: F) -> Self
    where
        F: Fn(&str) -> Result<RootCertStore, TlsError> + Send + Sync + 'static,
    {
        self.resolve_pool = Some(Arc::new(resolve));
        self
    }

    /// Whether this hook replaces the library's peer verification
    pub fn overrides_verification(&self) -> bool {
        self.verify_peer.is_some()
    }

    pub fn is_default(&self) -> bool {
        self.verify_peer.is_none() && self.resolve_pool.is_none()
    }

    pub(crate) fn peer_verifier(&self) -> Option<&VerifyPeerFn> {
        self.verify_peer.as_ref()
    }

    /// Resolve the trust pool for a CA reference
    pub fn resolve_pool(&self, ca_cert: &str) -> Result<Arc<RootCertStore>, TlsError> {
        let roots = match &self.resolve_pool {
            Some(resolve) => resolve(ca_cert)?,
            None => default_pool(ca_cert)?,
        };
        Ok(Arc::new(roots))
    }
}

impl std::fmt::Debug for Hook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hook")
            .field("verify_peer", &self.verify_peer.is_some())
            .field("resolve_pool", &self.resolve_pool.is_some())
            .finish()
    }
}

/// Configured CA bundle, or the bundled system roots when none is given
pub fn default_pool(ca_cert: &str) -> Result<RootCertStore, TlsError> {
    if ca_cert.trim().is_empty() {
        return Ok(system_roots());
    }
    root_store_from_pem(&load_pem(ca_cert)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_hook_has_no_overrides() {
        let hook = Hook::new();
        assert!(hook.is_default());
        assert!(!hook.overrides_verification());
        assert!(hook.peer_verifier().is_none());
    }

    #[test]
    fn peer_verifier_override_keeps_default_pool() {
        let hook = Hook::new().with_peer_verifier(|_| Ok(()));
        assert!(hook.overrides_verification());
        assert!(!hook.is_default());

        let roots = hook.resolve_pool("").unwrap();
        assert_eq!(roots.len(), system_roots().len());
    }

    #[test]
    fn pool_override_keeps_default_verification() {
        let hook = Hook::new().with_pool_resolver(|_| Ok(RootCertStore::empty()));
        assert!(!hook.overrides_verification());
        assert!(hook.resolve_pool("ignored").unwrap().is_empty());
    }

    #[test]
    fn pool_resolver_sees_ca_reference() {
        let hook = Hook::new().with_pool_resolver(|ca| {
            if ca == "mesh-roots" {
                Ok(RootCertStore::empty())
            } else {
                Err(TlsError::Certificate(format!("unknown pool {ca}")))
            }
        });
        assert!(hook.resolve_pool("mesh-roots").is_ok());
        assert!(hook.resolve_pool("other").is_err());
    }

    #[test]
    fn default_pool_rejects_missing_file() {
        assert!(matches!(
            default_pool("/nonexistent/ca.pem"),
            Err(TlsError::PemFile { .. })
        ));
    }

    #[test]
    fn debug_shows_overrides() {
        let hook = Hook::new().with_peer_verifier(|_| Ok(()));
        assert_eq!(
            format!("{hook:?}"),
            "Hook { verify_peer: true, resolve_pool: false }"
        );
    }
}
