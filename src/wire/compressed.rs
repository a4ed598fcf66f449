//! `OP_COMPRESSED` envelope: wraps any other message's body after the shared
//! 16-byte prologue.

use crate::error::{ConnectionId, Error, Result};
use crate::identity::ServerAddress;
use crate::wire::header::{MessageHeader, OpCode, HEADER_LEN};

/// original op-code (i32) + uncompressed size (i32) + compressor id (u8).
pub const ENVELOPE_HEADER_LEN: usize = 9;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressedEnvelopeHeader {
    pub original_op_code: OpCode,
    pub uncompressed_size: i32,
    pub compressor_id: u8,
}

/// Wraps an already-encoded message (header + body) into an `OP_COMPRESSED`
/// envelope around `compressed_body`. `original_op_code`/`uncompressed_size`
/// describe the message being replaced, not the envelope itself.
pub fn encode(
    original_op_code: OpCode,
    uncompressed_size: i32,
    compressor_id: u8,
    compressed_body: &[u8],
    request_id: i32,
) -> Vec<u8> {
    let body_len = ENVELOPE_HEADER_LEN + compressed_body.len();
    let message_length = (HEADER_LEN + body_len) as i32;
    let mut out = vec![0u8; HEADER_LEN];
    out.extend_from_slice(&original_op_code.as_i32().to_le_bytes());
    out.extend_from_slice(&uncompressed_size.to_le_bytes());
    out.push(compressor_id);
    out.extend_from_slice(compressed_body);
    MessageHeader::write(&mut out, message_length, request_id, 0, OpCode::Compressed);
    out
}

/// Parses the 9-byte envelope header out of an `OP_COMPRESSED` body, and
/// returns it alongside the remaining (still-compressed) bytes.
pub fn decode<'a>(
    body: &'a [u8],
    address: &ServerAddress,
    connection_id: ConnectionId,
) -> Result<(CompressedEnvelopeHeader, &'a [u8])> {
    if body.len() < ENVELOPE_HEADER_LEN {
        return Err(Error::protocol(address, connection_id, "OP_COMPRESSED body shorter than envelope header"));
    }
    let original_op_code = i32::from_le_bytes(body[0..4].try_into().unwrap());
    let uncompressed_size = i32::from_le_bytes(body[4..8].try_into().unwrap());
    let compressor_id = body[8];
    let original_op_code = OpCode::from_i32(original_op_code);
    if matches!(original_op_code, OpCode::Compressed) {
        return Err(Error::protocol(address, connection_id, "OP_COMPRESSED cannot wrap itself"));
    }
    Ok((
        CompressedEnvelopeHeader {
            original_op_code,
            uncompressed_size,
            compressor_id,
        },
        &body[ENVELOPE_HEADER_LEN..],
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> ServerAddress {
        ServerAddress::Tcp {
            host: "localhost".into(),
            port: 27017,
        }
    }

    #[test]
    fn round_trips_envelope_header() {
        let compressed = b"not-really-compressed";
        let bytes = encode(OpCode::Msg, 123, 1, compressed, 5);
        let header = MessageHeader::parse(&bytes, &addr(), None).unwrap();
        assert_eq!(header.op_code, OpCode::Compressed);
        let (envelope, rest) = decode(&bytes[HEADER_LEN..], &addr(), None).unwrap();
        assert_eq!(envelope.original_op_code, OpCode::Msg);
        assert_eq!(envelope.uncompressed_size, 123);
        assert_eq!(envelope.compressor_id, 1);
        assert_eq!(rest, compressed);
    }

    #[test]
    fn rejects_nested_compression() {
        let bytes = encode(OpCode::Compressed, 10, 1, b"x", 1);
        let err = decode(&bytes[HEADER_LEN..], &addr(), None).unwrap_err();
        assert!(matches!(err, Error::ProtocolInternal { .. }));
    }
}
