//! Plain TCP transport.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use socket2::{SockRef, TcpKeepalive};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream as TokioTcpStream;
use tokio::time::timeout;

use crate::buffer::{Buffer, BufferPool};
use crate::error::{self, ConnectionId, Error, IoDirection, Result};
use crate::identity::ServerAddress;
use crate::stream::{OperationContext, Stream};

const KEEPALIVE_IDLE: Duration = Duration::from_secs(120);
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(10);
const KEEPALIVE_RETRIES: u32 = 9;

/// Best-effort: not every platform/socket type honors every keepalive
/// field, so failures here are swallowed rather than surfaced.
fn apply_keepalive(tcp: &TokioTcpStream) {
    let keepalive = TcpKeepalive::new()
        .with_time(KEEPALIVE_IDLE)
        .with_interval(KEEPALIVE_INTERVAL)
        .with_retries(KEEPALIVE_RETRIES);
    let _ = SockRef::from(tcp).set_tcp_keepalive(&keepalive);
}

pub struct TcpTransport {
    address: ServerAddress,
    connection_id: ConnectionId,
    inner: Option<TokioTcpStream>,
    read_timeout: Duration,
    pool: Arc<BufferPool>,
}

impl TcpTransport {
    pub async fn connect(address: &ServerAddress, ctx: &OperationContext) -> Result<Self> {
        let (host, port) = match address {
            ServerAddress::Tcp { host, port } => (host.clone(), *port),
            ServerAddress::Unix { .. } => {
                return Err(Error::SocketOpen {
                    address: address.clone(),
                    message: "plain TCP transport cannot open a Unix domain socket address".into(),
                })
            }
        };
        let tcp = timeout(ctx.connect_timeout, TokioTcpStream::connect((host.as_str(), port)))
            .await
            .map_err(|_| Error::SocketOpen {
                address: address.clone(),
                message: "connect timed out".into(),
            })?
            .map_err(|e| error::from_io(IoDirection::Open, address, None, &e))?;
        tcp.set_nodelay(true).map_err(|e| error::from_io(IoDirection::Open, address, None, &e))?;
        apply_keepalive(&tcp);
        Ok(Self::from_parts(address.clone(), tcp, ctx.read_timeout, ctx.pool.clone()))
    }

    /// Wraps an already-connected socket. Used by `tls::TlsTransport`, which
    /// opens the raw TCP connection itself before layering the handshake.
    pub(crate) fn from_parts(
        address: ServerAddress,
        inner: TokioTcpStream,
        read_timeout: Duration,
        pool: Arc<BufferPool>,
    ) -> Self {
        Self {
            address,
            connection_id: None,
            inner: Some(inner),
            read_timeout,
            pool,
        }
    }
}

#[async_trait]
impl Stream for TcpTransport {
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
