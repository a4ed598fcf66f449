//! Message prologue, op-code bodies, and the compression envelope. This
//! module only frames bytes; it never touches a socket (see `crate::stream`)
//! and never chooses a compressor (see `crate::compression`) — callers
//! supply an already-selected `Compressor` when one is negotiated.

pub mod compressed;
pub mod header;
pub mod legacy;
pub mod msg;

use crate::compression::Compressor;
use crate::error::{ConnectionId, Error, Result};
use crate::identity::ServerAddress;

pub use header::{MessageHeader, OpCode, HEADER_LEN};
pub use msg::{OpMsgReply, OpMsgSection};

/// A logical outbound request: either a modern command or the legacy
/// fire-and-forget `killCursors`.
pub enum Request<'a> {
    Command {
        sections: &'a [OpMsgSection],
        flags: u32,
    },
    KillCursors {
        cursor_ids: &'a [i64],
    },
}

/// Encodes `request` as a full wire message (header included), compressing
/// the body under `compressor` when one is given. Compression is skipped for
/// `KillCursors` (it carries no document payload worth compressing) and
/// whenever `compressor` is `None` (noop/no negotiated compressor).
pub fn encode_request(request: &Request<'_>, compressor: Option<&dyn Compressor>, request_id: i32) -> Result<Vec<u8>> {
    let (op_code, uncompressed) = match request {
        Request::Command { sections, flags } => (OpCode::Msg, msg::encode(sections, *flags, request_id)?),
        Request::KillCursors { cursor_ids } => {
            return Ok(legacy::encode_kill_cursors(cursor_ids, request_id));
        }
    };
    match compressor {
        Some(compressor) if compressor.id() != 0 => {
            let body = &uncompressed[HEADER_LEN..];
            let compressed_body = compressor.compress(body)?;
            Ok(compressed::encode(op_code, body.len() as i32, compressor.id(), &compressed_body, request_id))
        }
        _ => Ok(uncompressed),
    }
}

/// A decoded reply, after any compression has been unwrapped.
pub enum Reply {
    Msg(OpMsgReply),
    Legacy(legacy::OpReplyHeader, bson::Document),
}

impl Reply {
    pub fn more_to_come(&self) -> bool {
        match self {
            Reply::Msg(reply) => reply.more_to_come(),
            Reply::Legacy(..) => false,
        }
    }

    pub fn document(&self) -> Option<&bson::Document> {
        match self {
            Reply::Msg(reply) => reply.body(),
            Reply::Legacy(_, doc) => Some(doc),
        }
    }
}

/// Decodes a full wire message (`header` already parsed, `body` the bytes
/// following it) into a `Reply`, unwrapping `OP_COMPRESSED` when present.
/// `decompress` resolves a compressor id to an implementation; it is a
/// closure rather than a fixed registry so the caller can supply whichever
/// compressors it was built with (see `crate::compression::registry`).
pub fn decode_reply(
    header: &MessageHeader,
    body: &[u8],
    address: &ServerAddress,
    connection_id: ConnectionId,
    resolve_compressor: impl Fn(u8) -> Option<Box<dyn Compressor>>,
) -> Result<Reply> {
    match header.op_code {
        OpCode::Msg => Ok(Reply::Msg(msg::decode(body, address, connection_id)?)),
        OpCode::Reply => {
            let (reply_header, doc) = legacy::decode_op_reply(header, body, address, connection_id)?;
            Ok(Reply::Legacy(reply_header, doc))
        }
        OpCode::Compressed => {
            let (envelope, compressed_body) = compressed::decode(body, address, connection_id)?;
            let compressor = resolve_compressor(envelope.compressor_id).ok_or_else(|| {
                Error::compression(address, format!("unknown compressor id {}", envelope.compressor_id))
            })?;
            let decompressed = compressor.decompress(compressed_body, envelope.uncompressed_size as usize)?;
            let inner_header = MessageHeader {
                message_length: (HEADER_LEN + decompressed.len()) as i32,
                request_id: header.request_id,
                response_to: header.response_to,
                op_code: envelope.original_op_code,
            };
            match inner_header.op_code {
                OpCode::Msg => Ok(Reply::Msg(msg::decode(&decompressed, address, connection_id)?)),
                OpCode::Reply => {
                    let (reply_header, doc) = legacy::decode_op_reply(&inner_header, &decompressed, address, connection_id)?;
                    Ok(Reply::Legacy(reply_header, doc))
                }
                other => Err(Error::protocol(address, connection_id, format!("OP_COMPRESSED wraps unsupported op-code {other:?}"))),
            }
        }
        other @ OpCode::KillCursors | other @ OpCode::Other(_) => {
            Err(Error::protocol(address, connection_id, format!("unexpected reply op-code {other:?}")))
        }
    }
}
