//! Per-connection lifecycle: `PENDING --open()--> OPEN --initialize()-->
//! READY --close()--> CLOSED`, with any fatal error short-circuiting to
//! `CLOSED` from any state. One in-flight request at a time; the connection
//! is not a multiplexer (concurrent callers are the enclosing pool's job).

pub mod description;
pub mod factory;
pub mod handshake;

use std::sync::Arc;
use std::time::Instant;

use bson::Document;

use crate::auth::{Authenticator, CommandChannel, CredentialWithCache};
use crate::compression::{Compressor, CompressorList};
use crate::error::{ConnectionId, Error, Result};
use crate::events::{self, CommandListener};
use crate::id::next_request_id;
use crate::identity::{ServerAddress, ServerId};
use crate::stream::Stream;
use crate::wire::{self, OpMsgSection, Request};

use description::ConnectionDescription;
use handshake::ClientMetadata;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Pending,
    Open,
    Ready,
    Closed,
}

pub struct InternalConnection {
    server_id: ServerId,
    stream: Box<dyn Stream>,
    state: ConnectionState,
    description: ConnectionDescription,
    compressor_list: Arc<CompressorList>,
    negotiated_compressor: Option<Box<dyn Compressor>>,
    credential: Option<CredentialWithCache>,
    authenticator: Option<Authenticator>,
    listener: Arc<dyn CommandListener>,
    metadata: ClientMetadata,
}

impl InternalConnection {
    /// Wraps an already-connected transport (the `open()` transition is the
    /// stream factory's job; see `connection::factory`). The connection
    /// starts `Open` and must be `initialize()`d before use.
    pub fn new(
        server_id: ServerId,
        stream: Box<dyn Stream>,
        compressor_list: Arc<CompressorList>,
        credential: Option<CredentialWithCache>,
        listener: Arc<dyn CommandListener>,
        metadata: ClientMetadata,
    ) -> Self {
        Self {
            server_id,
            stream,
            state: ConnectionState::Open,
            description: ConnectionDescription::default(),
            compressor_list,
            negotiated_compressor: None,
            credential,
            authenticator: None,
            listener,
            metadata,
        }
    }

    pub fn address(&self) -> &ServerAddress {
        &self.server_id.address
    }

    pub fn opened(&self) -> bool {
        !matches!(self.state, ConnectionState::Pending | ConnectionState::Closed)
    }

    pub fn description(&self) -> &ConnectionDescription {
        &self.description
    }

    /// Runs the `hello` handshake, negotiates compression, and authenticates
    /// unless speculative auth already succeeded. Transitions to `Ready` on
    /// success; any failure closes the connection.
    pub async fn initialize(&mut self) -> Result<()> {
        match self.initialize_inner().await {
            Ok(()) => {
                self.state = ConnectionState::Ready;
                Ok(())
            }
            Err(err) => {
                self.close().await;
                Err(err)
            }
        }
    }

    async fn initialize_inner(&mut self) -> Result<()> {
        // Speculative auth needs a concrete mechanism's nonce present in the
        // `hello` command itself, before the server has told us what it
        // supports. That only works for a credential with an explicit
        // mechanism; `Mechanism::Default` defers mechanism choice to the
        // handshake reply's `saslSupportedMechs` and skips speculation.
        let mut speculative_authenticator = self
            .credential
            .as_ref()
            .filter(|c| c.credential.mechanism != crate::auth::Mechanism::Default)
            .map(|c| Authenticator::for_credential(c, &[]));

        let speculative_auth = speculative_authenticator.as_mut().and_then(|a| a.speculative_auth_document());
        let requested_sasl_mechs = if speculative_auth.is_none() {
            self.credential.as_ref().and_then(|c| {
                let username = c.credential.username.as_deref()?;
                Some((c.credential.source.as_str(), username))
            })
        } else {
            None
        };

        let compressor_names: Vec<String> = self.compressor_list.names().iter().map(|s| s.to_string()).collect();
        let command = handshake::hello_command(&self.metadata, &compressor_names, speculative_auth, requested_sasl_mechs);
        let reply = self.run_command_uncompressed("admin", command).await?;
        self.description = ConnectionDescription::from_hello_reply(&reply);

        let negotiated_id = self.compressor_list.negotiate(&self.description.server_compressors).map(|c| c.id());
        self.negotiated_compressor = negotiated_id.and_then(|id| self.compressor_list.by_id(id));

        if let Some(credential) = self.credential.clone() {
            let description_snapshot = self.description.clone();
            let mut authenticator = speculative_authenticator
                .take()
                .unwrap_or_else(|| Authenticator::for_credential(&credential, &description_snapshot.sasl_supported_mechs));
            let already_done = authenticator
                .accept_speculative_result(description_snapshot.speculative_authenticate.as_ref())
                .await?;
            if !already_done {
                authenticator.authenticate(self, &description_snapshot).await?;
            }
            self.authenticator = Some(authenticator);
        }
        Ok(())
    }

    /// Runs a command without compression, used for the handshake and for
    /// every authentication step (never compressed per spec).
    async fn run_command_uncompressed(&mut self, db: &str, mut command: Document) -> Result<Document> {
        command.insert("$db", db);
        let request_id = next_request_id();
        let command_name = first_key(&command);
        self.exchange(db, &command_name, &command, request_id, None).await
    }

    /// The main command path: compresses under the negotiated compressor
    /// (never for sensitive/auth traffic, which always calls
    /// `run_command_uncompressed` via the `CommandChannel` impl instead).
    pub async fn send_and_receive(&mut self, db: &str, mut command: Document) -> Result<Document> {
        if self.state != ConnectionState::Ready {
            return Err(Error::protocol(self.address(), self.stream.connection_id(), "command attempted on a connection that is not Ready"));
        }
        command.insert("$db", db);
        let request_id = next_request_id();
        let command_name = first_key(&command);
        let compressor = self.negotiated_compressor.take();
        let result = self.exchange(db, &command_name, &command, request_id, compressor.as_deref()).await;
        self.negotiated_compressor = compressor;
        result
    }

    /// Fire-and-forget `killCursors`; no reply is read.
    pub async fn send_kill_cursors(&mut self, cursor_ids: &[i64]) -> Result<()> {
        crate::legacy_ops::kill_cursors(self.stream.as_mut(), cursor_ids, self.listener.as_ref()).await
    }

    async fn exchange(&mut self, db: &str, command_name: &str, command: &Document, request_id: i32, compressor: Option<&dyn Compressor>) -> Result<Document> {
        let address = self.address().clone();
        let connection_id = self.stream.connection_id();
        self.listener
            .on_started(&events::started(request_id, command_name, db, command, &address, connection_id));
        let started_at = Instant::now();

        let result = self.exchange_inner(command, request_id, compressor).await;
        match &result {
            Ok(reply) => {
                self.listener
                    .on_succeeded(&events::succeeded(request_id, command_name, reply, started_at.elapsed(), &address, connection_id));
            }
            Err(err) => {
                self.listener
                    .on_failed(&events::failed(request_id, command_name, err, started_at.elapsed(), &address, connection_id));
                if err.is_fatal_to_connection() {
                    self.state = ConnectionState::Closed;
                    self.stream.close().await;
                }
            }
        }
        result
    }

    async fn exchange_inner(&mut self, command: &Document, request_id: i32, compressor: Option<&dyn Compressor>) -> Result<Document> {
        let address = self.address().clone();
        let connection_id = self.stream.connection_id();
        let sections = [OpMsgSection::Body(command.clone())];
        let request = Request::Command { sections: &sections, flags: 0 };
        let bytes = wire::encode_request(&request, compressor, request_id).map_err(|e| e.with_real_address(&address))?;

        let mut buffer = self.stream.acquire_buffer(bytes.len());
        buffer.with_mut_slice(|slice| slice.copy_from_slice(&bytes));
        self.stream.write(std::slice::from_ref(&buffer)).await?;

        let header_buffer = self.stream.read(wire::HEADER_LEN).await?;
        let header = header_buffer.with_slice(|slice| crate::wire::header::MessageHeader::parse(slice, &address, connection_id))?;
        if header.response_to != request_id {
            return Err(Error::protocol(&address, connection_id, format!("responseTo {} does not match request id {}", header.response_to, request_id)));
        }
        let body_len = header.message_length as usize - wire::HEADER_LEN;
        let body_buffer = self.stream.read(body_len).await?;

        let compressor_list = self.compressor_list.clone();
        let reply = body_buffer
            .with_slice(|slice| wire::decode_reply(&header, slice, &address, connection_id, move |id| compressor_list.by_id(id)))
            .map_err(|e| e.with_real_address(&address))?;
        let document = reply.document().cloned().ok_or_else(|| Error::protocol(&address, connection_id, "reply carried no document"))?;

        let ok = document.get_f64("ok").unwrap_or_else(|_| document.get_i32("ok").unwrap_or(0) as f64);
        if ok != 1.0 {
            let code = document.get_i32("code").ok();
            let code_name = document.get_str("codeName").ok().map(str::to_string);
            let message = document.get_str("errmsg").unwrap_or("command failed").to_string();
            if document.contains_key("writeConcernError") {
                return Err(Error::WriteConcernWithResponse {
                    address,
                    connection_id,
                    message,
                    response: document,
                });
            }
            return Err(Error::Command {
                address,
                connection_id,
                code,
                code_name,
                message,
            });
        }
        Ok(document)
    }

    /// Idempotent: outstanding reads/writes on a closed connection fail with
    /// `Error::SocketClosed`, enforced by the underlying stream.
    pub async fn close(&mut self) {
        if self.state == ConnectionState::Closed {
            return;
        }
        self.state = ConnectionState::Closed;
        self.stream.close().await;
    }
}

#[async_trait::async_trait]
impl CommandChannel for InternalConnection {
    async fn run_command(&mut self, db: &str, command: Document) -> Result<Document> {
        self.run_command_uncompressed(db, command).await
    }

    fn address(&self) -> &ServerAddress {
        InternalConnection::address(self)
    }

    fn connection_id(&self) -> ConnectionId {
        self.stream.connection_id()
    }
}

fn first_key(document: &Document) -> String {
    document.keys().next().cloned().unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_key_picks_command_name() {
        let doc = bson::doc! { "ping": 1, "$db": "admin" };
        assert_eq!(first_key(&doc), "ping");
    }
}
