//! Configuration surface consumed by the TLS layer
//!
//! These types are deserialized from the proxy's listener and cluster
//! configuration. PEM-valued fields accept either inline PEM text or a path
//! to a file containing it.

use crate::error::TlsError;
use rustls::SupportedProtocolVersion;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::path::Path;
use std::time::Duration;

/// Opaque parameters handed verbatim to a verification hook factory
pub type ExtensionParams = serde_json::Map<String, serde_json::Value>;

/// Default bound on inspection plus handshake for a single connection
pub const DEFAULT_HANDSHAKE_TIMEOUT_MS: u64 = 10_000;

const PEM_MARKER: &str = "-----BEGIN";

/// TLS protocol version accepted in configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TlsVersion {
    #[serde(rename = "TLSv1_2", alias = "TLSv1.2")]
    Tls12,
    #[serde(rename = "TLSv1_3", alias = "TLSv1.3")]
    Tls13,
}

impl TlsVersion {
    fn protocol(self) -> &'static SupportedProtocolVersion {
        match self {
            TlsVersion::Tls12 => &rustls::version::TLS12,
            TlsVersion::Tls13 => &rustls::version::TLS13,
        }
    }
}

/// TLS settings for one identity binding (server side) or one upstream
/// (client side)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    /// Binding is active only when set
    pub status: bool,
    /// Verification hook tag; empty selects the default hook
    #[serde(rename = "type", alias = "extension_type")]
    pub extension_type: String,
    /// Passed verbatim to the hook factory
    #[serde(rename = "extend_verify", alias = "extension_params")]
    pub extension_params: ExtensionParams,
    /// Trust roots (PEM text or file path)
    pub ca_cert: String,
    /// Identity certificate chain, leaf first (PEM text or file path)
    pub cert_chain: String,
    /// Identity private key (PEM text or file path)
    pub private_key: String,
    /// Server side: require and verify a client certificate
    #[serde(alias = "require_client_cert")]
    pub verify_client: bool,
    /// Client side: disable all peer verification
    pub insecure_skip: bool,
    /// Client side: name sent as SNI and used for verification
    pub server_name: Option<String>,
    /// ALPN protocols, most preferred first
    pub alpn: Vec<String>,
    pub min_version: Option<TlsVersion>,
    pub max_version: Option<TlsVersion>,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            status: true,
            extension_type: String::new(),
            extension_params: ExtensionParams::new(),
            ca_cert: String::new(),
            cert_chain: String::new(),
            private_key: String::new(),
            verify_client: false,
            insecure_skip: false,
            server_name: None,
            alpn: Vec::new(),
            min_version: None,
            max_version: None,
        }
    }
}

impl TlsConfig {
    /// Whether both halves of an identity are configured.
    ///
    /// Exactly one half configured is an error.
    pub fn has_identity(&self) -> Result<bool, TlsError> {
        match (
            self.cert_chain.trim().is_empty(),
            self.private_key.trim().is_empty(),
        ) {
            (true, true) => Ok(false),
            (false, false) => Ok(true),
            _ => Err(TlsError::IncompleteIdentity),
        }
    }

    /// Trust policy half of an identity binding
    pub fn trust_policy(&self) -> TrustPolicy {
        TrustPolicy {
            require_client_cert: self.verify_client,
            insecure_skip: self.insecure_skip,
            extension_type: self.extension_type.clone(),
            extension_params: self.extension_params.clone(),
        }
    }

    /// Resolve the configured version bounds into rustls protocol versions
    pub fn protocol_versions(&self) -> Result<Vec<&'static SupportedProtocolVersion>, TlsError> {
        let min = self.min_version.unwrap_or(TlsVersion::Tls12);
        let max = self.max_version.unwrap_or(TlsVersion::Tls13);
        if min > max {
            return Err(TlsError::VersionBounds(format!(
                "min_version {min:?} is above max_version {max:?}"
            )));
        }

        Ok([TlsVersion::Tls13, TlsVersion::Tls12]
            .into_iter()
            .filter(|v| (min..=max).contains(v))
            .map(TlsVersion::protocol)
            .collect())
    }

    pub(crate) fn alpn_protocols(&self) -> Vec<Vec<u8>> {
        self.alpn.iter().map(|p| p.as_bytes().to_vec()).collect()
    }
}

/// Verification requirements bound to one certificate
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrustPolicy {
    pub require_client_cert: bool,
    pub insecure_skip: bool,
    pub extension_type: String,
    pub extension_params: ExtensionParams,
}

/// TLS settings of one listener: the ordered identity bindings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenerTlsConfig {
    /// Multiplex TLS and plaintext on the listener by content
    pub inspector: bool,
    /// Identity bindings; the first active one is the fallback identity
    pub bindings: Vec<TlsConfig>,
    /// Bound on inspection plus handshake, in milliseconds
    pub handshake_timeout_ms: u64,
}

impl Default for ListenerTlsConfig {
    fn default() -> Self {
        Self {
            inspector: false,
            bindings: Vec::new(),
            handshake_timeout_ms: DEFAULT_HANDSHAKE_TIMEOUT_MS,
        }
    }
}

impl ListenerTlsConfig {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    /// Whether any binding would terminate TLS on this listener
    pub fn is_enabled(&self) -> bool {
        self.bindings.iter().any(|b| b.status)
    }
}

/// Read a PEM-valued field: inline PEM is used as is, anything else is a path
pub fn load_pem(value: &str) -> Result<Cow<'_, [u8]>, TlsError> {
    if value.trim_start().starts_with(PEM_MARKER) {
        return Ok(Cow::Borrowed(value.as_bytes()));
    }

    let path = Path::new(value.trim());
    std::fs::read(path)
        .map(Cow::Owned)
        .map_err(|source| TlsError::PemFile {
            path: path.to_path_buf(),
            source,
        })
}
