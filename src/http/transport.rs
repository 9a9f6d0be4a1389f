//! Connections to the target
//!
//! Resolves the host, opens the TCP socket and, for https, runs the TLS
//! handshake. Failures are classified here, while the underlying error is
//! still typed: resolver errors are `dns`, socket errors `network` or
//! `timeout`, handshake errors `ssl`.

use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpSocket, TcpStream};
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

use super::client::EngineConfig;
use super::request::{Endpoint, Protocol};
use crate::error::{FuzzError, NetworkFailure, Result};

/// A plain or TLS connection to the target
pub enum Stream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl AsyncRead for Stream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Stream::Plain(s) => Pin::new(s).poll_read(cx, buf),
            Stream::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Stream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Stream::Plain(s) => Pin::new(s).poll_write(cx, buf),
            Stream::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Stream::Plain(s) => Pin::new(s).poll_flush(cx),
            Stream::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Stream::Plain(s) => Pin::new(s).poll_shutdown(cx),
            Stream::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

/// Opens fresh connections to one endpoint
pub struct Connector {
    endpoint: Endpoint,
    tls: Option<(TlsConnector, ServerName<'static>)>,
    keepalive: bool,
    timeout_ms: u64,
}

impl Connector {
    /// Prepare TLS settings for https endpoints
    pub fn new(endpoint: Endpoint, config: &EngineConfig) -> Result<Self> {
        let tls = match endpoint.protocol {
            Protocol::Http => None,
            Protocol::Https => {
                let tls_config = client_config(config.insecure)?;
                let server_name = ServerName::try_from(endpoint.bare_host().to_string())
                    .map_err(|e| {
                        FuzzError::validation(format!(
                            "Invalid TLS server name {}: {}",
                            endpoint.hostname, e
                        ))
                    })?;
                Some((TlsConnector::from(Arc::new(tls_config)), server_name))
            }
        };

        Ok(Self {
            endpoint,
            tls,
            keepalive: config.tcp_keepalive,
            timeout_ms: config.timeout.map(|t| t.as_millis() as u64).unwrap_or(0),
        })
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Resolve, connect and handshake
    pub async fn connect(&self) -> Result<Stream> {
        let port = self.endpoint.effective_port();
        let target = format!("{}:{}", self.endpoint.hostname, port);

        let addrs = self.resolve(port).await?;
        let tcp = self.connect_any(&addrs, &target).await?;

        match &self.tls {
            None => Ok(Stream::Plain(tcp)),
            Some((connector, server_name)) => {
                let tls = connector
                    .connect(server_name.clone(), tcp)
                    .await
                    .map_err(|e| handshake_error(e, &target))?;
                Ok(Stream::Tls(Box::new(tls)))
            }
        }
    }

    async fn resolve(&self, port: u16) -> Result<Vec<SocketAddr>> {
        let host = self.endpoint.bare_host();
        let dns_error = || FuzzError::Dns {
            host: host.to_string(),
        };

        let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, port))
            .await
            .map_err(|e| {
                tracing::trace!(host, error = %e, "Resolution failed");
                dns_error()
            })?
            .collect();
        if addrs.is_empty() {
            return Err(dns_error());
        }
        Ok(addrs)
    }

    /// Try each resolved address in turn, reporting the last failure
    async fn connect_any(&self, addrs: &[SocketAddr], target: &str) -> Result<TcpStream> {
        let mut last = None;
        for addr in addrs {
            match self.connect_addr(*addr).await {
                Ok(stream) => return Ok(stream),
                Err(e) => last = Some(e),
            }
        }
        let err = last.unwrap_or_else(|| io::Error::from(io::ErrorKind::NotFound));
        Err(connect_error(err, target, self.timeout_ms))
    }

    async fn connect_addr(&self, addr: SocketAddr) -> io::Result<TcpStream> {
        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket.set_keepalive(self.keepalive)?;
        socket.set_nodelay(true)?;
        socket.connect(addr).await
    }
}

/// Socket level connect failure
fn connect_error(err: io::Error, target: &str, timeout_ms: u64) -> FuzzError {
    let kind = match err.kind() {
        io::ErrorKind::ConnectionRefused => NetworkFailure::ConnectionRefused,
        io::ErrorKind::HostUnreachable => NetworkFailure::HostUnreachable,
        io::ErrorKind::NetworkUnreachable => NetworkFailure::NetworkUnreachable,
        io::ErrorKind::TimedOut => return FuzzError::Timeout(timeout_ms),
        _ => NetworkFailure::ConnectionFailed,
    };
    FuzzError::Network {
        kind,
        target: target.to_string(),
    }
}

/// Every handshake failure is an ssl error; the rustls cause is kept as the
/// message when there is one
fn handshake_error(err: io::Error, target: &str) -> FuzzError {
    let detail = err
        .get_ref()
        .and_then(|inner| inner.downcast_ref::<rustls::Error>())
        .map(|tls| tls.to_string())
        .unwrap_or_else(|| err.to_string());
    FuzzError::Ssl(format!("{} ({})", detail, target))
}

fn client_config(insecure: bool) -> Result<ClientConfig> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let builder = ClientConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()
        .map_err(|e| FuzzError::unknown("Failed to configure TLS", e))?;

    let mut config = if insecure {
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyCert(provider)))
            .with_no_client_auth()
    } else {
        let mut root_store = RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        builder
            .with_root_certificates(root_store)
            .with_no_client_auth()
    };
    config.alpn_protocols = vec![b"http/1.1".to_vec()];
    Ok(config)
}

/// `--insecure`: any certificate is accepted, handshake signatures are still
/// checked
#[derive(Debug)]
struct AcceptAnyCert(Arc<CryptoProvider>);

impl ServerCertVerifier for AcceptAnyCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}
