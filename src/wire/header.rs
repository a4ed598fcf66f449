//! The 16-byte message prologue shared by every wire message, and the
//! recognized op-code set.

use crate::error::{ConnectionId, Error, Result};
use crate::identity::ServerAddress;

pub const HEADER_LEN: usize = 16;

/// Op-codes this crate understands. Anything else decodes to `Other` and
/// always fails further parsing with `Error::ProtocolInternal` — unknown
/// op-codes are a protocol violation per spec, not a silently ignored frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    Reply,
    KillCursors,
    Compressed,
    Msg,
    Other(i32),
}

pub const OP_REPLY: i32 = 1;
pub const OP_KILL_CURSORS: i32 = 2007;
pub const OP_COMPRESSED: i32 = 2012;
pub const OP_MSG: i32 = 2013;

impl OpCode {
    pub fn from_i32(raw: i32) -> Self {
        match raw {
            OP_REPLY => OpCode::Reply,
            OP_KILL_CURSORS => OpCode::KillCursors,
            OP_COMPRESSED => OpCode::Compressed,
            OP_MSG => OpCode::Msg,
            other => OpCode::Other(other),
        }
    }

    pub fn as_i32(self) -> i32 {
        match self {
            OpCode::Reply => OP_REPLY,
            OpCode::KillCursors => OP_KILL_CURSORS,
            OpCode::Compressed => OP_COMPRESSED,
            OpCode::Msg => OP_MSG,
            OpCode::Other(raw) => raw,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    pub message_length: i32,
    pub request_id: i32,
    pub response_to: i32,
    pub op_code: OpCode,
}

impl MessageHeader {
    pub fn parse(buf: &[u8], address: &ServerAddress, connection_id: ConnectionId) -> Result<Self> {
        if buf.len() < HEADER_LEN {
            return Err(Error::protocol(
                address,
                connection_id,
                format!("short message header: {} bytes", buf.len()),
            ));
        }
        let message_length = i32::from_le_bytes(buf[0..4].try_into().unwrap());
        let request_id = i32::from_le_bytes(buf[4..8].try_into().unwrap());
        let response_to = i32::from_le_bytes(buf[8..12].try_into().unwrap());
        let op_code = i32::from_le_bytes(buf[12..16].try_into().unwrap());
        Ok(Self {
            message_length,
            request_id,
            response_to,
            op_code: OpCode::from_i32(op_code),
        })
    }

    /// Writes the header into `out[0..16]`. `out` must be at least 16 bytes.
    pub fn write(out: &mut [u8], message_length: i32, request_id: i32, response_to: i32, op_code: OpCode) {
        out[0..4].copy_from_slice(&message_length.to_le_bytes());
        out[4..8].copy_from_slice(&request_id.to_le_bytes());
        out[8..12].copy_from_slice(&response_to.to_le_bytes());
        out[12..16].copy_from_slice(&op_code.as_i32().to_le_bytes());
    }
}
