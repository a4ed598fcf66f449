//! Command-started/succeeded/failed events. Every command exchange on an
//! `InternalConnection` brackets itself with these three, matching
//! spec.md's observability contract. Sensitive command bodies are redacted
//! before an event is ever built, never after.

use std::time::Duration;

use bson::Document;

use crate::auth::is_sensitive_command;
use crate::error::{ConnectionId, Error};
use crate::identity::ServerAddress;

#[derive(Debug, Clone)]
pub struct CommandStartedEvent {
    pub request_id: i32,
    pub command_name: String,
    pub database_name: String,
    pub command: Document,
    pub address: ServerAddress,
    pub connection_id: ConnectionId,
}

#[derive(Debug, Clone)]
pub struct CommandSucceededEvent {
    pub request_id: i32,
    pub command_name: String,
    pub reply: Document,
    pub duration: Duration,
    pub address: ServerAddress,
    pub connection_id: ConnectionId,
}

#[derive(Debug, Clone)]
pub struct CommandFailedEvent {
    pub request_id: i32,
    pub command_name: String,
    pub duration: Duration,
    pub failure: String,
    pub address: ServerAddress,
    pub connection_id: ConnectionId,
}

/// Document substituted for a sensitive command's body or reply in an
/// emitted event.
fn redacted() -> Document {
    bson::doc! {}
}

/// `onStarted`/`onSucceeded`/`onFailed` sink, matching spec.md §6's command
/// listener collaborator interface. `tracing` spans serve the same role for
/// local diagnostics; this trait is for application-supplied observers
/// (APM integrations, command loggers).
pub trait CommandListener: Send + Sync {
    fn on_started(&self, event: &CommandStartedEvent) {
        let _ = event;
    }
    fn on_succeeded(&self, event: &CommandSucceededEvent) {
        let _ = event;
    }
    fn on_failed(&self, event: &CommandFailedEvent) {
        let _ = event;
    }
}

/// A listener that only logs via `tracing`, matching the teacher's
/// ambient observability style. The default listener when none is
/// supplied to a connection factory.
pub struct TracingCommandListener;

impl CommandListener for TracingCommandListener {
    fn on_started(&self, event: &CommandStartedEvent) {
        tracing::debug!(request_id = event.request_id, command = %event.command_name, db = %event.database_name, "command started");
    }

    fn on_succeeded(&self, event: &CommandSucceededEvent) {
        tracing::debug!(request_id = event.request_id, command = %event.command_name, duration_ms = event.duration.as_millis(), "command succeeded");
    }

    fn on_failed(&self, event: &CommandFailedEvent) {
        tracing::warn!(request_id = event.request_id, command = %event.command_name, duration_ms = event.duration.as_millis(), error = %event.failure, "command failed");
    }
}

pub fn started(
    request_id: i32,
    command_name: &str,
    database_name: &str,
    command: &Document,
    address: &ServerAddress,
    connection_id: ConnectionId,
) -> CommandStartedEvent {
    let command = if is_sensitive_command(command_name, command) { redacted() } else { command.clone() };
    CommandStartedEvent {
        request_id,
        command_name: command_name.to_string(),
        database_name: database_name.to_string(),
        command,
        address: address.clone(),
        connection_id,
    }
}

pub fn succeeded(
    request_id: i32,
    command_name: &str,
    reply: &Document,
    duration: Duration,
    address: &ServerAddress,
    connection_id: ConnectionId,
) -> CommandSucceededEvent {
    let reply = if is_sensitive_command(command_name, reply) { redacted() } else { reply.clone() };
    CommandSucceededEvent {
        request_id,
        command_name: command_name.to_string(),
        reply,
        duration,
        address: address.clone(),
        connection_id,
    }
}

pub fn failed(
    request_id: i32,
    command_name: &str,
    error: &Error,
    duration: Duration,
    address: &ServerAddress,
    connection_id: ConnectionId,
) -> CommandFailedEvent {
    CommandFailedEvent {
        request_id,
        command_name: command_name.to_string(),
        duration,
        failure: error.to_string(),
        address: address.clone(),
        connection_id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn started_event_redacts_sensitive_command() {
        let address = ServerAddress::Tcp { host: "h".to_string(), port: 1 };
        let event = started(1, "saslStart", "admin", &doc! { "saslStart": 1, "payload": "secret" }, &address, Some(7));
        assert!(event.command.is_empty());
    }

    #[test]
    fn started_event_preserves_non_sensitive_command() {
        let address = ServerAddress::Tcp { host: "h".to_string(), port: 1 };
        let event = started(1, "ping", "admin", &doc! { "ping": 1 }, &address, Some(7));
        assert_eq!(event.command, doc! { "ping": 1 });
    }
}
