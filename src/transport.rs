//! Encrypted transport between agent and relay
//!
//! Both ends speak TLS over TCP using rustls with the `ring` provider.
//! - The agent ([`TlsDialer`]) accepts any relay certificate: relays usually
//!   run with a self-signed one. Handshake signatures are still checked
//!   against the presented certificate.
//! - The relay ([`RelayTls`]) serves the operator's certificate, or the
//!   certificate embedded in the binary when that cannot be loaded.

use anyhow::{Context, Result, anyhow, bail};
use rustls::{
    ClientConfig, DigitallySignedStruct, ServerConfig, SignatureScheme,
    client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
    crypto::{CryptoProvider, verify_tls12_signature, verify_tls13_signature},
    pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime},
};
use std::{
    fs::File,
    io::BufReader,
    net::SocketAddr,
    path::Path,
    sync::Arc,
};
use tokio::net::TcpStream;
use tokio_rustls::{TlsAcceptor, TlsConnector, client, server};
use tracing::{debug, info, warn};

/// Self-signed certificate used when no usable one is configured
const DEFAULT_CERT_PEM: &[u8] = include_bytes!("../certs/default.crt");
const DEFAULT_KEY_PEM: &[u8] = include_bytes!("../certs/default.key");

fn provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

// =========
// RELAY
// =========

/// RelayTls upgrades accepted TCP connections to TLS
#[derive(Clone)]
pub struct RelayTls {
    acceptor: TlsAcceptor,
}

impl RelayTls {
    /// load builds the server side from the configured PEM files, falling
    /// back to the embedded certificate when they are absent or unusable.
    /// Only a broken embedded certificate is an error.
    pub fn load(cert_path: Option<&Path>, key_path: Option<&Path>) -> Result<Self> {
        let config = match configured_server_config(cert_path, key_path) {
            Ok(config) => config,
            Err(e) => {
                warn!("using embedded default certificate: {e:#}");
                embedded_server_config().context("embedded default certificate is unusable")?
            }
        };

        Ok(Self {
            acceptor: TlsAcceptor::from(Arc::new(config)),
        })
    }

    /// accept performs the server side of the TLS handshake
    pub async fn accept(&self, stream: TcpStream) -> Result<server::TlsStream<TcpStream>> {
        self.acceptor
            .accept(stream)
            .await
            .context("TLS accept failed")
    }
}

fn configured_server_config(
    cert_path: Option<&Path>,
    key_path: Option<&Path>,
) -> Result<ServerConfig> {
    let (Some(cert_path), Some(key_path)) = (cert_path, key_path) else {
        bail!("no certificate/key pair configured");
    };

    let certs = load_certificates(cert_path)?;
    let key = load_private_key(key_path)?;
    let config = build_server_config(certs, key)?;

    info!("loaded TLS certificate from {}", cert_path.display());
    Ok(config)
}

fn embedded_server_config() -> Result<ServerConfig> {
    let certs = rustls_pemfile::certs(&mut &DEFAULT_CERT_PEM[..])
        .collect::<Result<Vec<_>, _>>()?;
    let key = rustls_pemfile::private_key(&mut &DEFAULT_KEY_PEM[..])?
        .ok_or_else(|| anyhow!("no private key in embedded PEM"))?;

    build_server_config(certs, key)
}

fn build_server_config(
    certs: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
) -> Result<ServerConfig> {
    if certs.is_empty() {
        bail!("no certificates found");
    }

    let config = ServerConfig::builder_with_provider(provider())
        .with_safe_default_protocol_versions()?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .context("certificate and key do not form a usable pair")?;

    Ok(config)
}

/// load_certificates reads every certificate of a PEM file
fn load_certificates(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let file = File::open(path)
        .with_context(|| format!("failed to open cert file {}", path.display()))?;

    rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("failed to parse certificates in {}", path.display()))
}

/// load_private_key reads the first RSA, PKCS8 or EC key of a PEM file
fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let file = File::open(path)
        .with_context(|| format!("failed to open key file {}", path.display()))?;

    rustls_pemfile::private_key(&mut BufReader::new(file))
        .with_context(|| format!("failed to parse private key in {}", path.display()))?
        .ok_or_else(|| anyhow!("no private key found in {}", path.display()))
}

// =========
// AGENT
// =========

/// TlsDialer opens TLS connections to a relay without verifying its
/// certificate chain
#[derive(Clone)]
pub struct TlsDialer {
    connector: TlsConnector,
}

impl TlsDialer {
    pub fn new() -> Result<Self> {
        let provider = provider();
        let config = ClientConfig::builder_with_provider(provider.clone())
            .with_safe_default_protocol_versions()?
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate(provider)))
            .with_no_client_auth();

        Ok(Self {
            connector: TlsConnector::from(Arc::new(config)),
        })
    }

    /// dial connects to `addr` ("host:port") and completes the handshake
    pub async fn dial(&self, addr: &str) -> Result<(client::TlsStream<TcpStream>, SocketAddr)> {
        let server_name = server_name(addr)?;

        let tcp = TcpStream::connect(addr)
            .await
            .with_context(|| format!("failed to connect to {addr}"))?;
        let remote_addr = tcp.peer_addr()?;
        tcp.set_nodelay(true)?;

        let tls = self
            .connector
            .connect(server_name, tcp)
            .await
            .with_context(|| format!("TLS handshake with {addr} failed"))?;

        debug!(remote_addr = %remote_addr, "TLS handshake complete");
        Ok((tls, remote_addr))
    }
}

/// server_name extracts the SNI name (or IP) from "host:port"
fn server_name(addr: &str) -> Result<ServerName<'static>> {
    let (host, _port) = addr
        .rsplit_once(':')
        .ok_or_else(|| anyhow!("relay address must be host:port, got {addr}"))?;
    let host = host.trim_start_matches('[').trim_end_matches(']');

    ServerName::try_from(host.to_string()).map_err(|_| anyhow!("invalid relay host: {host}"))
}

/// AcceptAnyCertificate skips chain and name validation but still checks
/// that the handshake was signed by the presented certificate
#[derive(Debug)]
struct AcceptAnyCertificate(Arc<CryptoProvider>);

impl ServerCertVerifier for AcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn embedded_certificate_is_usable() {
        assert!(embedded_server_config().is_ok());
    }

    #[test]
    fn missing_files_fall_back_to_embedded() {
        let missing = Path::new("/nonexistent/relay.crt");
        assert!(RelayTls::load(Some(missing), Some(missing)).is_ok());
        assert!(RelayTls::load(None, None).is_ok());
    }

    #[test]
    fn server_name_parsing() {
        assert!(matches!(
            server_name("relay.example.com:443").unwrap(),
            ServerName::DnsName(_)
        ));
        assert!(matches!(
            server_name("127.0.0.1:8443").unwrap(),
            ServerName::IpAddress(_)
        ));
        assert!(matches!(
            server_name("[::1]:8443").unwrap(),
            ServerName::IpAddress(_)
        ));
        assert!(server_name("no-port").is_err());
    }

    #[tokio::test]
    async fn dialer_accepts_self_signed_relay() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let tls = RelayTls::load(None, None).unwrap();

        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut stream = tls.accept(tcp).await.unwrap();
            let mut buf = [0u8; 5];
            stream.read_exact(&mut buf).await.unwrap();
            stream.write_all(&buf).await.unwrap();
            stream.flush().await.unwrap();
        });

        let dialer = TlsDialer::new().unwrap();
        let (mut stream, remote) = dialer.dial(&addr.to_string()).await.unwrap();
        assert_eq!(remote, addr);

        stream.write_all(b"hello").await.unwrap();
        let mut buf = [0u8; 5];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");

        server.await.unwrap();
    }
}
