#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use mosaic_tls::{
    ClientContextManager, Connection, HookRegistry, ServerContextManager, TlsConfig, TlsError,
    identity_names,
};
use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose, IsCa,
    Issuer, KeyPair, KeyUsagePurpose, SanType,
};
use time::{Duration, OffsetDateTime};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

/// Throwaway certificate authority
pub struct TestCa {
    issuer: Issuer<'static, KeyPair>,
    pub cert_pem: String,
}

/// Leaf certificate and key, PEM encoded
#[derive(Clone)]
pub struct Identity {
    pub cert_pem: String,
    pub key_pem: String,
}

impl TestCa {
    pub fn new(name: &str) -> Self {
        let mut params = CertificateParams::default();
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, name);
        dn.push(DnType::OrganizationName, "Mosaic Test");
        params.distinguished_name = dn;
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];
        let now = OffsetDateTime::now_utc();
        params.not_before = now - Duration::days(1);
        params.not_after = now + Duration::days(30);

        let key = KeyPair::generate().unwrap();
        let cert = params.self_signed(&key).unwrap();

        Self {
            issuer: Issuer::new(params, key),
            cert_pem: cert.pem(),
        }
    }

    /// Leaf usable for both server and client authentication
    pub fn issue(&self, common_name: &str, dns_names: &[&str]) -> Identity {
        let mut params = CertificateParams::default();
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, common_name);
        dn.push(DnType::OrganizationName, "Mosaic Test");
        params.distinguished_name = dn;
        params.is_ca = IsCa::NoCa;
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
        params.extended_key_usages = vec![
            ExtendedKeyUsagePurpose::ServerAuth,
            ExtendedKeyUsagePurpose::ClientAuth,
        ];
        params.subject_alt_names = dns_names
            .iter()
            .map(|name| SanType::DnsName((*name).try_into().unwrap()))
            .collect();
        let now = OffsetDateTime::now_utc();
        params.not_before = now - Duration::days(1);
        params.not_after = now + Duration::days(7);

        let key = KeyPair::generate().unwrap();
        let cert = params.signed_by(&key, &self.issuer).unwrap();

        Identity {
            cert_pem: cert.pem(),
            key_pem: key.serialize_pem(),
        }
    }
}

/// Server binding for an identity with inline PEM
pub fn binding(identity: &Identity) -> TlsConfig {
    TlsConfig {
        cert_chain: identity.cert_pem.clone(),
        private_key: identity.key_pem.clone(),
        ..Default::default()
    }
}

/// Client config trusting `ca`, optionally presenting `identity`
pub fn client_config(ca: &TestCa, identity: Option<&Identity>) -> TlsConfig {
    TlsConfig {
        ca_cert: ca.cert_pem.clone(),
        cert_chain: identity.map(|i| i.cert_pem.clone()).unwrap_or_default(),
        private_key: identity.map(|i| i.key_pem.clone()).unwrap_or_default(),
        ..Default::default()
    }
}

pub fn client(config: &TlsConfig) -> ClientContextManager {
    ClientContextManager::new(config, &HookRegistry::new()).unwrap()
}

/// Accept loop answering `ping` with the serving binding and peer CN.
///
/// TLS connections reply `tls <binding> <peer cn or ->`, plaintext ones
/// reply `plain`.
pub async fn spawn_listener(manager: ServerContextManager) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let manager = Arc::new(manager);

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let manager = manager.clone();
            tokio::spawn(async move {
                let Ok(conn) = manager.dispatch(stream).await else {
                    return;
                };
                let reply = match &conn {
                    Connection::Tls(tls) => format!(
                        "tls {} {}\n",
                        tls.binding(),
                        tls.peer_common_name().unwrap_or_else(|| "-".to_string())
                    ),
                    Connection::Plain(_) => "plain\n".to_string(),
                };
                let _ = answer(conn, &reply).await;
            });
        }
    });

    addr
}

async fn answer<S>(stream: S, reply: &str) -> std::io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut stream = BufReader::new(stream);
    let mut line = String::new();
    stream.read_line(&mut line).await?;
    stream.get_mut().write_all(reply.as_bytes()).await?;
    stream.get_mut().shutdown().await
}

/// Reply from the test listener plus the server certificate's CN
#[derive(Debug)]
pub struct Exchange {
    pub reply: String,
    pub server_cn: Option<String>,
}

/// Connect over TLS, send `ping`, and read the reply line.
///
/// A rejected client certificate may only surface on the first read under
/// TLS 1.3, so an empty reply is reported as an error too.
pub async fn tls_exchange(
    addr: SocketAddr,
    client: &ClientContextManager,
    host: &str,
) -> Result<Exchange, TlsError> {
    let tcp = TcpStream::connect(addr).await?;
    let tls = client.connect(host, tcp).await?;
    let server_cn = tls
        .get_ref()
        .1
        .peer_certificates()
        .and_then(|chain| chain.first())
        .and_then(|leaf| identity_names(leaf).ok())
        .and_then(|names| names.common_name);

    let reply = request(tls).await?;
    if reply.is_empty() {
        return Err(TlsError::Io(std::io::Error::from(
            std::io::ErrorKind::UnexpectedEof,
        )));
    }
    Ok(Exchange { reply, server_cn })
}

/// Plaintext `ping` exchange
pub async fn plain_exchange(addr: SocketAddr) -> std::io::Result<String> {
    let tcp = TcpStream::connect(addr).await?;
    request(tcp).await
}

async fn request<S>(stream: S) -> std::io::Result<String>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut stream = BufReader::new(stream);
    stream.get_mut().write_all(b"ping\n").await?;
    stream.get_mut().flush().await?;
    let mut line = String::new();
    stream.read_line(&mut line).await?;
    Ok(line.trim_end().to_string())
}
