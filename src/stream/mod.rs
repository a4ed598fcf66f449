//! Full-duplex byte transport. Variants: plain TCP (`tcp`), TLS over TCP
//! (`tls`). Both implement the same [`Stream`] trait so the connection layer
//! never branches on transport kind.

pub mod tcp;
pub mod tls;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::buffer::{Buffer, BufferPool};
use crate::error::{ConnectionId, Result};
use crate::identity::ServerAddress;

/// Connect/read timeouts and the ambient buffer pool a stream draws read
/// buffers from. `read_timeout` bounds a single `read`; `read_with_extra`
/// adds to it for operations that explicitly extend the base (e.g. an
/// `awaitData` exhaust cursor wait).
#[derive(Debug, Clone)]
pub struct OperationContext {
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub pool: Arc<BufferPool>,
}

impl OperationContext {
    pub fn new(connect_timeout: Duration, read_timeout: Duration, pool: Arc<BufferPool>) -> Self {
        Self {
            connect_timeout,
            read_timeout,
            pool,
        }
    }
}

/// The capability set every transport variant exposes. Blocking transports
/// are not shipped by this crate (see the stream-abstraction design note),
/// but the trait is object-safe so an embedder can hand in its own.
#[async_trait]
pub trait Stream: Send {
    /// Writes every buffer, in order, in full. Serialized with respect to
    /// other writes on the same stream; does not take ownership of the
    /// buffers (they are borrowed, not released).
    async fn write(&mut self, buffers: &[Buffer]) -> Result<()>;

    /// Reads exactly `n` bytes or fails; premature EOF is a failure, not a
    /// short read.
    async fn read(&mut self, n: usize) -> Result<Buffer>;

    /// Like `read`, but the effective timeout is `read_timeout + extra`.
    async fn read_with_extra_timeout(&mut self, n: usize, extra: Duration) -> Result<Buffer>;

    /// Idempotent. Outstanding reads/writes on a closed stream fail with
    /// `Error::SocketClosed`.
    async fn close(&mut self);

    fn is_closed(&self) -> bool;

    fn address(&self) -> &ServerAddress;

    fn connection_id(&self) -> ConnectionId;

    fn set_connection_id(&mut self, id: u32);

    /// Draws a buffer from the ambient pool sized for the caller's use
    /// (typically to build an outbound message before `write`).
    fn acquire_buffer(&self, n: usize) -> Buffer;
}

/// Produces streams for a given server address. The async half of the
/// stream-abstraction contract; a blocking variant would implement the same
/// shape synchronously but is not part of this crate (see DESIGN.md).
#[async_trait]
pub trait StreamFactory: Send + Sync {
    async fn open(&self, address: &ServerAddress, ctx: &OperationContext) -> Result<Box<dyn Stream>>;
}
