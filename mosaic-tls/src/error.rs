//! Errors raised while building TLS contexts or terminating connections

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur in the TLS identity and trust layer
#[derive(Debug, Error)]
pub enum TlsError {
    #[error("listener has no active TLS bindings")]
    NoBindings,

    #[error("binding {binding}: insecure_skip is not supported on server-side bindings")]
    ServerInsecureSkip { binding: usize },

    #[error("unknown TLS extension type: {0}")]
    UnknownExtension(String),

    #[error("extension type must not be empty")]
    EmptyExtensionType,

    #[error("invalid parameters for extension {extension_type}: {reason}")]
    HookParams {
        extension_type: String,
        reason: String,
    },

    #[error("failed to read {path}: {source}")]
    PemFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse certificate: {0}")]
    Certificate(String),

    #[error("failed to parse private key: {0}")]
    PrivateKey(String),

    #[error("certificate and private key do not match: {0}")]
    KeyMismatch(#[source] rustls::Error),

    #[error("certificate chain and private key must be configured together")]
    IncompleteIdentity,

    #[error("invalid protocol version bounds: {0}")]
    VersionBounds(String),

    #[error("failed to build verifier: {0}")]
    Verifier(String),

    #[error("failed to build TLS config: {0}")]
    Config(#[source] rustls::Error),

    #[error("invalid server name: {0}")]
    ServerName(String),

    #[error("TLS handshake failed: {0}")]
    Handshake(#[source] std::io::Error),

    #[error("TLS handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TlsError {
    /// Whether the error happened while negotiating a single connection.
    ///
    /// Connection-level failures are recoverable: the listener keeps accepting.
    pub fn is_handshake_failure(&self) -> bool {
        matches!(
            self,
            TlsError::Handshake(_) | TlsError::HandshakeTimeout(_) | TlsError::Io(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_errors_are_recoverable() {
        let err = TlsError::Handshake(std::io::Error::other("bad certificate"));
        assert!(err.is_handshake_failure());
        assert!(TlsError::HandshakeTimeout(Duration::from_secs(1)).is_handshake_failure());
    }

    #[test]
    fn construction_errors_are_not_handshake_failures() {
        assert!(!TlsError::NoBindings.is_handshake_failure());
        assert!(!TlsError::UnknownExtension("spiffe".into()).is_handshake_failure());
    }

    #[test]
    fn error_messages_name_the_offender() {
        let err = TlsError::ServerInsecureSkip { binding: 2 };
        assert_eq!(
            err.to_string(),
            "binding 2: insecure_skip is not supported on server-side bindings"
        );
        assert_eq!(
            TlsError::UnknownExtension("spiffe".into()).to_string(),
            "unknown TLS extension type: spiffe"
        );
    }
}
