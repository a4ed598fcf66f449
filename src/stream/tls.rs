//! TLS transport, layered over a plain TCP connection. Generalizes the
//! shadow-upstream TLS helper: certificate/key loading is the same, but the
//! connector is driven by `TlsSettings` instead of a fixed shadow config,
//! and the result implements the crate's `Stream` trait instead of being
//! handed back as a raw `tokio_rustls::client::TlsStream`.

use std::fs;
use std::io::BufReader;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream as TokioTcpStream;
use tokio::time::timeout;
use tokio_rustls::{client::TlsStream as RustlsClientStream, TlsConnector};

use crate::buffer::{Buffer, BufferPool};
use crate::config::TlsSettings;
use crate::error::{self, ConnectionId, Error, IoDirection, Result};
use crate::identity::ServerAddress;
use crate::stream::{OperationContext, Stream};

/// Accepts any server certificate and skips hostname verification.
/// Development-only; `build_client_config` logs a warning whenever this is
/// installed.
#[derive(Debug)]
struct NoCertificateVerification;

impl ServerCertVerifier for NoCertificateVerification {
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
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::ED25519,
        ]
    }
}

fn load_error(address: &ServerAddress, message: impl Into<String>) -> Error {
    Error::SocketOpen {
        address: address.clone(),
        message: message.into(),
    }
}

pub fn build_client_config(settings: &TlsSettings, address: &ServerAddress) -> Result<ClientConfig> {
    let mut root_store = RootCertStore::empty();
    if let Some(ca_file) = &settings.ca_file {
        let ca_data = fs::read(ca_file).map_err(|e| load_error(address, format!("failed to read CA file {ca_file}: {e}")))?;
        let mut reader = BufReader::new(&ca_data[..]);
        for cert in rustls_pemfile::certs(&mut reader) {
            let cert = cert.map_err(|e| load_error(address, format!("failed to parse CA certificate: {e}")))?;
            root_store
                .add(cert)
                .map_err(|e| load_error(address, format!("failed to add CA certificate: {e}")))?;
        }
    } else {
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    }

    let builder = ClientConfig::builder().with_root_certificates(root_store);

    let mut config = match (&settings.client_cert_file, &settings.client_key_file) {
        (Some(cert_file), Some(key_file)) => {
            let cert_data = fs::read(cert_file).map_err(|e| load_error(address, format!("failed to read client cert file {cert_file}: {e}")))?;
            let key_data = fs::read(key_file).map_err(|e| load_error(address, format!("failed to read client key file {key_file}: {e}")))?;

            let mut cert_reader = BufReader::new(&cert_data[..]);
            let cert_chain: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut cert_reader)
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| load_error(address, format!("failed to parse client certificate: {e}")))?;

            let mut key_reader = BufReader::new(&key_data[..]);
            let mut keys = rustls_pemfile::pkcs8_private_keys(&mut key_reader)
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| load_error(address, format!("failed to parse client key: {e}")))?;
            let key: PrivateKeyDer<'static> = keys
                .pop()
                .map(PrivateKeyDer::Pkcs8)
                .ok_or_else(|| load_error(address, "no private key found in client key file"))?;

            builder
                .with_client_auth_cert(cert_chain, key)
                .map_err(|e| load_error(address, format!("failed to set client certificate: {e}")))?
        }
        _ => builder.with_no_client_auth(),
    };

    if settings.allow_invalid_certs {
        tracing::warn!(address = %address, "TLS certificate validation disabled: allow_invalid_certs is set");
        config
            .dangerous()
            .set_certificate_verifier(Arc::new(NoCertificateVerification));
    }

    Ok(config)
}

pub struct TlsTransport {
    address: ServerAddress,
    connection_id: ConnectionId,
    inner: Option<RustlsClientStream<TokioTcpStream>>,
    read_timeout: Duration,
    pool: Arc<BufferPool>,
}

impl TlsTransport {
    pub async fn connect(address: &ServerAddress, ctx: &OperationContext, settings: &TlsSettings) -> Result<Self> {
        let (host, port) = match address {
            ServerAddress::Tcp { host, port } => (host.clone(), *port),
            ServerAddress::Unix { .. } => {
                return Err(load_error(address, "TLS transport cannot connect to a Unix socket address"));
            }
        };

        let tcp = timeout(ctx.connect_timeout, TokioTcpStream::connect((host.as_str(), port)))
            .await
            .map_err(|_| load_error(address, "connect timed out"))?
            .map_err(|e| error::from_io(IoDirection::Open, address, None, &e))?;
        tcp.set_nodelay(true).map_err(|e| error::from_io(IoDirection::Open, address, None, &e))?;

        let client_config = build_client_config(settings, address)?;
        let connector = TlsConnector::from(Arc::new(client_config));

        // SNI rejects IP literals outright; skip it silently rather than
        // fail the handshake when the configured host is one.
        let sni_host = settings.server_name_override.as_deref().unwrap_or(&host);
        if address.is_ip_literal() && settings.server_name_override.is_none() {
            tracing::debug!(address = %address, "skipping SNI for IP literal host");
        }
        let server_name = ServerName::try_from(sni_host.to_string()).map_err(|_| load_error(address, format!("invalid server name {sni_host}")))?;

        let tls_stream = connector
            .connect(server_name, tcp)
            .await
            .map_err(|e| load_error(address, format!("TLS handshake failed: {e}")))?;

        Ok(Self {
            address: address.clone(),
            connection_id: None,
            inner: Some(tls_stream),
            read_timeout: ctx.read_timeout,
            pool: ctx.pool.clone(),
        })
    }
}

#[async_trait]
impl Stream for TlsTransport {
    async fn write(&mut self, buffers: &[Buffer]) -> Result<()> {
        let address = self.address.clone();
        let connection_id = self.connection_id;
        let stream = self.inner.as_mut().ok_or_else(|| Error::socket_closed(&address, connection_id))?;
        for buffer in buffers {
            stream
                .write_all(&buffer.to_vec())
                .await
                .map_err(|e| error::from_io(IoDirection::Write, &address, connection_id, &e))?;
        }
        stream
            .flush()
            .await
            .map_err(|e| error::from_io(IoDirection::Write, &address, connection_id, &e))
    }

    async fn read(&mut self, n: usize) -> Result<Buffer> {
        self.read_with_extra_timeout(n, Duration::ZERO).await
    }

    async fn read_with_extra_timeout(&mut self, n: usize, extra: Duration) -> Result<Buffer> {
        let address = self.address.clone();
        let connection_id = self.connection_id;
        let stream = self.inner.as_mut().ok_or_else(|| Error::socket_closed(&address, connection_id))?;

        let mut raw = vec![0u8; n];
        let total_timeout = self.read_timeout + extra;
        match timeout(total_timeout, stream.read_exact(&mut raw)).await {
            Err(_) => Err(Error::SocketRead {
                address,
                connection_id,
                message: "timed out".to_string(),
            }),
            Ok(Err(e)) => Err(error::from_io(IoDirection::Read, &address, connection_id, &e)),
            Ok(Ok(_)) => {
                let mut buffer = self.pool.acquire(n);
                buffer.with_mut_slice(|slice| slice.copy_from_slice(&raw));
                Ok(buffer)
            }
        }
    }

    async fn close(&mut self) {
        self.inner = None;
    }

    fn is_closed(&self) -> bool {
        self.inner.is_none()
    }

    fn address(&self) -> &ServerAddress {
        &self.address
    }

    fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    fn set_connection_id(&mut self, id: u32) {
        self.connection_id = Some(id);
    }

    fn acquire_buffer(&self, n: usize) -> Buffer {
        self.pool.acquire(n)
    }
}
