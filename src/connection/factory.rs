//! Assembles an `InternalConnection` from a server id, transport settings,
//! and the ambient collaborators (compressor list, credential, listener).
//! Owns the `open()` transition; the connection itself starts where this
//! factory's `open()` leaves off and is then `initialize()`d by the caller.

use std::sync::Arc;

use crate::auth::CredentialWithCache;
use crate::compression::CompressorList;
use crate::config::TlsSettings;
use crate::error::Result;
use crate::events::{CommandListener, TracingCommandListener};
use crate::identity::{ServerAddress, ServerId};
use crate::stream::{tcp::TcpTransport, tls::TlsTransport, OperationContext, Stream};

use super::handshake::ClientMetadata;
use super::InternalConnection;

/// Everything an `InternalConnectionFactory` needs beyond the per-call
/// server id and `OperationContext`: TLS configuration, the compressor
/// preference list, an optional credential, and an optional listener
/// (defaulting to [`TracingCommandListener`]).
pub struct InternalConnectionFactory {
    tls: TlsSettings,
    compressor_list: Arc<CompressorList>,
    credential: Option<CredentialWithCache>,
    listener: Arc<dyn CommandListener>,
    metadata: ClientMetadata,
}

impl InternalConnectionFactory {
    pub fn new(tls: TlsSettings, compressor_list: Arc<CompressorList>, credential: Option<CredentialWithCache>) -> Self {
        Self {
            tls,
            compressor_list,
            credential,
            listener: Arc::new(TracingCommandListener),
            metadata: ClientMetadata::default(),
        }
    }

    pub fn with_listener(mut self, listener: Arc<dyn CommandListener>) -> Self {
        self.listener = listener;
        self
    }

    pub fn with_metadata(mut self, metadata: ClientMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Opens a transport (TLS or plain TCP, per settings) and wraps it in a
    /// freshly constructed, not-yet-`initialize()`d `InternalConnection`.
    pub async fn open(&self, server_id: ServerId, ctx: &OperationContext) -> Result<InternalConnection> {
        let stream = self.open_stream(&server_id.address, ctx).await?;
        Ok(InternalConnection::new(
            server_id,
            stream,
            self.compressor_list.clone(),
            self.credential.clone(),
            self.listener.clone(),
            self.metadata.clone(),
        ))
    }

    async fn open_stream(&self, address: &ServerAddress, ctx: &OperationContext) -> Result<Box<dyn Stream>> {
        if self.tls.enabled {
            let transport = TlsTransport::connect(address, ctx, &self.tls).await?;
            Ok(Box::new(transport))
        } else {
            let transport = TcpTransport::connect(address, ctx).await?;
            Ok(Box::new(transport))
        }
    }
}
