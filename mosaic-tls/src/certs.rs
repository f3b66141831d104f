//! Certificate material parsing
//!
//! Turns configured PEM into rustls types and extracts the identity names
//! (subject CN and SAN DNS names) that SNI selection indexes.

use crate::config::{TlsConfig, load_pem};
use crate::error::TlsError;
use rustls::RootCertStore;
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::sign::CertifiedKey;
use std::sync::Arc;
use x509_parser::extensions::GeneralName;
use x509_parser::prelude::*;

/// Crypto provider used for every context built by this crate.
///
/// Prefers the process default; falls back to aws-lc-rs without installing it.
pub fn crypto_provider() -> Arc<CryptoProvider> {
    CryptoProvider::get_default()
        .cloned()
        .unwrap_or_else(|| Arc::new(rustls::crypto::aws_lc_rs::default_provider()))
}

/// Parse every certificate in a PEM buffer
pub fn parse_certificates(pem: &[u8]) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let certs = rustls_pemfile::certs(&mut &pem[..])
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| TlsError::Certificate(e.to_string()))?;

    if certs.is_empty() {
        return Err(TlsError::Certificate(
            "no certificates found in PEM".to_string(),
        ));
    }
    Ok(certs)
}

/// Parse the first private key in a PEM buffer
pub fn parse_private_key(pem: &[u8]) -> Result<PrivateKeyDer<'static>, TlsError> {
    rustls_pemfile::private_key(&mut &pem[..])
        .map_err(|e| TlsError::PrivateKey(e.to_string()))?
        .ok_or_else(|| TlsError::PrivateKey("no private key found in PEM".to_string()))
}

/// Build a trust store from PEM-encoded CA certificates
pub fn root_store_from_pem(pem: &[u8]) -> Result<RootCertStore, TlsError> {
    let mut roots = RootCertStore::empty();
    for cert in parse_certificates(pem)? {
        roots
            .add(cert)
            .map_err(|e| TlsError::Certificate(format!("invalid CA certificate: {e}")))?;
    }
    Ok(roots)
}

/// Trust store holding the bundled Mozilla roots
pub fn system_roots() -> RootCertStore {
    RootCertStore {
        roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
    }
}

/// Names a certificate asserts as its identity
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentityNames {
    pub common_name: Option<String>,
    pub dns_names: Vec<String>,
}

impl IdentityNames {
    /// Common name first, then SAN DNS names, without duplicates
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        let cn = self.common_name.as_deref();
        cn.into_iter().chain(
            self.dns_names
                .iter()
                .map(String::as_str)
                .filter(move |name| Some(*name) != cn),
        )
    }
}

/// Extract the subject CN and SAN DNS names from a DER certificate
pub fn identity_names(der: &[u8]) -> Result<IdentityNames, TlsError> {
    let (_, cert) =
        X509Certificate::from_der(der).map_err(|e| TlsError::Certificate(e.to_string()))?;

    let common_name = cert
        .subject()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .map(str::to_string);

    let mut dns_names = Vec::new();
    let san = cert
        .subject_alternative_name()
        .map_err(|e| TlsError::Certificate(e.to_string()))?;
    if let Some(san) = san {
        for name in &san.value.general_names {
            if let GeneralName::DNSName(dns) = name {
                dns_names.push(dns.to_string());
            }
        }
    }

    Ok(IdentityNames {
        common_name,
        dns_names,
    })
}

/// Parsed identity: CA bundle, certificate chain, key and derived names
pub struct CertificateMaterial {
    ca_cert: String,
    chain: Vec<CertificateDer<'static>>,
    private_key: PrivateKeyDer<'static>,
    certified_key: Arc<CertifiedKey>,
    names: IdentityNames,
}

impl CertificateMaterial {
    /// Parse the identity configured on a binding.
    ///
    /// Fails on malformed PEM or when the key does not belong to the leaf.
    pub fn load(config: &TlsConfig, provider: &CryptoProvider) -> Result<Self, TlsError> {
        if !config.has_identity()? {
            return Err(TlsError::IncompleteIdentity);
        }

        let chain = parse_certificates(&load_pem(&config.cert_chain)?)?;
        let private_key = parse_private_key(&load_pem(&config.private_key)?)?;
        let names = identity_names(&chain[0])?;

        let certified_key = CertifiedKey::from_der(chain.clone(), private_key.clone_key(), provider)
            .map_err(TlsError::KeyMismatch)?;

        Ok(Self {
            ca_cert: config.ca_cert.clone(),
            chain,
            private_key,
            certified_key: Arc::new(certified_key),
            names,
        })
    }

    /// Configured CA bundle reference (inline PEM, path, or empty)
    pub fn ca_cert(&self) -> &str {
        &self.ca_cert
    }

    pub fn chain(&self) -> &[CertificateDer<'static>] {
        &self.chain
    }

    pub fn private_key(&self) -> PrivateKeyDer<'static> {
        self.private_key.clone_key()
    }

    pub fn certified_key(&self) -> Arc<CertifiedKey> {
        self.certified_key.clone()
    }

    pub fn names(&self) -> &IdentityNames {
        &self.names
    }
}

impl std::fmt::Debug for CertificateMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateMaterial")
            .field("names", &self.names)
            .field("chain_len", &self.chain.len())
            .finish()
    }
}
