//! Mosaic TLS - identity and trust layer
//!
//! Terminates inbound TLS with SNI-based certificate selection and
//! per-certificate client-auth policy, builds outbound TLS configurations,
//! and multiplexes TLS and plaintext on one listener by inspecting the first
//! bytes of each connection.
//!
//! Verification logic is pluggable: bindings name a hook factory registered
//! in a [`HookRegistry`], and the resulting [`Hook`] may replace peer chain
//! verification, trust pool resolution, or both.

mod certs;
mod client;
mod config;
mod error;
mod hooks;
mod index;
mod inspector;
mod registry;
mod server;
mod verifier;

pub use certs::{
    CertificateMaterial, IdentityNames, crypto_provider, identity_names, parse_certificates,
    parse_private_key, root_store_from_pem, system_roots,
};
pub use client::ClientContextManager;
pub use config::{
    DEFAULT_HANDSHAKE_TIMEOUT_MS, ExtensionParams, ListenerTlsConfig, TlsConfig, TlsVersion,
    TrustPolicy, load_pem,
};
pub use error::TlsError;
pub use hooks::{Hook, PeerChain, ResolvePoolFn, VerifyPeerFn, default_pool};
pub use index::CertificateIndex;
pub use inspector::{Prefixed, Protocol, classify, inspect};
pub use registry::{HookFactory, HookRegistry};
pub use server::{Connection, IdentityBinding, SecureConnection, ServerContextManager};
pub use verifier::{HookClientVerifier, HookServerVerifier, InsecureServerVerifier};
pub use rustls;
