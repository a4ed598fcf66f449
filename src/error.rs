//! Error taxonomy for the wire-protocol client core.
//!
//! Kinds follow the source specification's error taxonomy: I/O and protocol
//! errors are fatal to the connection that raised them, command errors are
//! not. See [`Error::is_fatal_to_connection`].

use std::fmt;

use crate::identity::ServerAddress;

pub type Result<T> = std::result::Result<T, Error>;

/// A connection id, assigned by the connection factory/pool. Not known until
/// a connection has been constructed, hence `Option<u32>` on most variants.
pub type ConnectionId = Option<u32>;

#[derive(thiserror::Error, Debug, Clone)]
pub enum Error {
    #[error("failed to open connection to {address}: {message}")]
    SocketOpen {
        address: ServerAddress,
        message: String,
    },

    #[error("read failed on {address} (connection {connection_id:?}): {message}")]
    SocketRead {
        address: ServerAddress,
        connection_id: ConnectionId,
        message: String,
    },

    #[error("write failed on {address} (connection {connection_id:?}): {message}")]
    SocketWrite {
        address: ServerAddress,
        connection_id: ConnectionId,
        message: String,
    },

    #[error("operation attempted on closed stream to {address} (connection {connection_id:?})")]
    SocketClosed {
        address: ServerAddress,
        connection_id: ConnectionId,
    },

    #[error("protocol error on {address} (connection {connection_id:?}): {message}")]
    ProtocolInternal {
        address: ServerAddress,
        connection_id: ConnectionId,
        message: String,
    },

    #[error("compression error on {address}: {message}")]
    Compression {
        address: ServerAddress,
        message: String,
    },

    #[error("command error on {address} (connection {connection_id:?}): {code:?} {message}")]
    Command {
        address: ServerAddress,
        connection_id: ConnectionId,
        code: Option<i32>,
        code_name: Option<String>,
        message: String,
    },

    #[error("authentication failed on {address} (connection {connection_id:?}): {message}")]
    Security {
        address: ServerAddress,
        connection_id: ConnectionId,
        message: String,
    },

    #[error(
        "write concern error on {address} (connection {connection_id:?}): {message} (write \
         accepted, response attached)"
    )]
    WriteConcernWithResponse {
        address: ServerAddress,
        connection_id: ConnectionId,
        message: String,
        response: bson::Document,
    },
}

impl Error {
    /// I/O errors, protocol errors, and security errors poison the
    /// connection. Command errors (the server answered, just with `ok: 0`)
    /// leave the connection usable.
    pub fn is_fatal_to_connection(&self) -> bool {
        !matches!(
            self,
            Error::Command { .. } | Error::WriteConcernWithResponse { .. }
        )
    }

    pub fn address(&self) -> &ServerAddress {
        match self {
            Error::SocketOpen { address, .. }
            | Error::SocketRead { address, .. }
            | Error::SocketWrite { address, .. }
            | Error::SocketClosed { address, .. }
            | Error::ProtocolInternal { address, .. }
            | Error::Compression { address, .. }
            | Error::Command { address, .. }
            | Error::Security { address, .. }
            | Error::WriteConcernWithResponse { address, .. } => address,
        }
    }

    pub fn protocol(address: &ServerAddress, connection_id: ConnectionId, message: impl Into<String>) -> Self {
        Error::ProtocolInternal {
            address: address.clone(),
            connection_id,
            message: message.into(),
        }
    }

    pub fn security(address: &ServerAddress, connection_id: ConnectionId, message: impl Into<String>) -> Self {
        Error::Security {
            address: address.clone(),
            connection_id,
            message: message.into(),
        }
    }

    pub fn compression(address: &ServerAddress, message: impl Into<String>) -> Self {
        Error::Compression {
            address: address.clone(),
            message: message.into(),
        }
    }

    pub fn socket_closed(address: &ServerAddress, connection_id: ConnectionId) -> Self {
        Error::SocketClosed {
            address: address.clone(),
            connection_id,
        }
    }

    /// Rewrites a placeholder address on a `Compression` error to the real
    /// server address once one is known. Compressors are constructed
    /// without a connection in scope, so they report failures against a
    /// throwaway address; callers that do know the real one patch it in
    /// before the error becomes user-visible.
    pub fn with_real_address(self, address: &ServerAddress) -> Self {
        match self {
            Error::Compression { message, .. } => Error::Compression {
                address: address.clone(),
                message,
            },
            other => other,
        }
    }
}

/// Wraps an underlying I/O error with address/connection context, choosing
/// between `SocketRead`/`SocketWrite` based on the direction the caller was
/// attempting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoDirection {
    Read,
    Write,
    Open,
}

impl fmt::Display for IoDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IoDirection::Read => write!(f, "read"),
            IoDirection::Write => write!(f, "write"),
            IoDirection::Open => write!(f, "open"),
        }
    }
}

pub fn from_io(
    direction: IoDirection,
    address: &ServerAddress,
    connection_id: ConnectionId,
    err: &std::io::Error,
) -> Error {
    let message = if err.kind() == std::io::ErrorKind::UnexpectedEof {
        "unexpected EOF".to_string()
    } else if err.kind() == std::io::ErrorKind::TimedOut {
        "timed out".to_string()
    } else {
        err.to_string()
    };
    match direction {
        IoDirection::Read => Error::SocketRead {
            address: address.clone(),
            connection_id,
            message,
        },
        IoDirection::Write => Error::SocketWrite {
            address: address.clone(),
            connection_id,
            message,
        },
        IoDirection::Open => Error::SocketOpen {
            address: address.clone(),
            message,
        },
    }
}
