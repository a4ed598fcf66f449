//! Legacy op-codes still encountered on the wire: `OP_REPLY` (the only reply
//! shape predating `OP_MSG`) and `OP_KILL_CURSORS` (still issued, fire and
//! forget, to release server-side cursors).

use bson::Document;

use crate::error::{ConnectionId, Error, Result};
use crate::identity::ServerAddress;
use crate::wire::header::{MessageHeader, OpCode, HEADER_LEN};

/// Legacy reply body prologue: flags, cursor id, starting-from, number
/// returned. 20 bytes, following the 16-byte message header.
pub const REPLY_HEADER_LEN: usize = 20;
/// Minimum total message length for a well-formed `OP_REPLY` (16 header + 20
/// reply prologue).
pub const MIN_REPLY_MESSAGE_LENGTH: i32 = (HEADER_LEN + REPLY_HEADER_LEN) as i32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpReplyHeader {
    pub response_flags: i32,
    pub cursor_id: i64,
    pub starting_from: i32,
    pub number_returned: i32,
}

/// Decodes an `OP_REPLY` body. The command core only ever expects single
/// document command replies of this legacy shape; `number_returned != 1` is
/// a protocol violation here, not a valid zero/many-document cursor reply.
pub fn decode_op_reply(
    header: &MessageHeader,
    body: &[u8],
    address: &ServerAddress,
    connection_id: ConnectionId,
) -> Result<(OpReplyHeader, Document)> {
    if header.message_length < MIN_REPLY_MESSAGE_LENGTH {
        return Err(Error::protocol(
            address,
            connection_id,
            format!("OP_REPLY message length {} below minimum {}", header.message_length, MIN_REPLY_MESSAGE_LENGTH),
        ));
    }
    if body.len() < REPLY_HEADER_LEN {
        return Err(Error::protocol(address, connection_id, "OP_REPLY body shorter than reply prologue"));
    }
    let response_flags = i32::from_le_bytes(body[0..4].try_into().unwrap());
    let cursor_id = i64::from_le_bytes(body[4..12].try_into().unwrap());
    let starting_from = i32::from_le_bytes(body[12..16].try_into().unwrap());
    let number_returned = i32::from_le_bytes(body[16..20].try_into().unwrap());
    if number_returned != 1 {
        return Err(Error::protocol(
            address,
            connection_id,
            format!("OP_REPLY numberReturned {number_returned} != 1"),
        ));
    }
    let doc_bytes = &body[REPLY_HEADER_LEN..];
    let doc = Document::from_reader(&mut std::io::Cursor::new(doc_bytes))
        .map_err(|e| Error::protocol(address, connection_id, format!("invalid BSON document in OP_REPLY: {e}")))?;
    Ok((
        OpReplyHeader {
            response_flags,
            cursor_id,
            starting_from,
            number_returned,
        },
        doc,
    ))
}

/// Encodes an `OP_KILL_CURSORS` message: reserved i32 zero, count, then each
/// cursor id as i64. No reply is expected for this op-code.
pub fn encode_kill_cursors(cursor_ids: &[i64], request_id: i32) -> Vec<u8> {
    let body_len = 4 + 4 + cursor_ids.len() * 8;
    let message_length = (HEADER_LEN + body_len) as i32;
    let mut out = vec![0u8; HEADER_LEN];
    out.extend_from_slice(&0i32.to_le_bytes());
    out.extend_from_slice(&(cursor_ids.len() as i32).to_le_bytes());
    for id in cursor_ids {
        out.extend_from_slice(&id.to_le_bytes());
    }
    MessageHeader::write(&mut out, message_length, request_id, 0, OpCode::KillCursors);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    fn addr() -> ServerAddress {
        ServerAddress::Tcp {
            host: "localhost".into(),
            port: 27017,
        }
    }

    #[test]
    fn decodes_well_formed_reply() {
        let doc = doc! { "ok": 1.0 };
        let doc_bytes = bson::to_vec(&doc).unwrap();
        let mut body = vec![0u8; REPLY_HEADER_LEN];
        body[16..20].copy_from_slice(&1i32.to_le_bytes());
        body.extend_from_slice(&doc_bytes);
        let header = MessageHeader {
            message_length: (HEADER_LEN + body.len()) as i32,
            request_id: 9,
            response_to: 1,
            op_code: OpCode::Reply,
        };
        let (reply_header, decoded) = decode_op_reply(&header, &body, &addr(), None).unwrap();
        assert_eq!(reply_header.number_returned, 1);
        assert_eq!(decoded, doc);
    }

    #[test]
    fn rejects_number_returned_not_one() {
        let mut body = vec![0u8; REPLY_HEADER_LEN];
        body[16..20].copy_from_slice(&0i32.to_le_bytes());
        let header = MessageHeader {
            message_length: MIN_REPLY_MESSAGE_LENGTH,
            request_id: 1,
            response_to: 1,
            op_code: OpCode::Reply,
        };
        let err = decode_op_reply(&header, &body, &addr(), None).unwrap_err();
        assert!(matches!(err, Error::ProtocolInternal { .. }));
    }

    #[test]
    fn rejects_message_length_below_minimum() {
        let header = MessageHeader {
            message_length: 20,
            request_id: 1,
            response_to: 1,
            op_code: OpCode::Reply,
        };
        let err = decode_op_reply(&header, &[0u8; REPLY_HEADER_LEN], &addr(), None).unwrap_err();
        assert!(matches!(err, Error::ProtocolInternal { .. }));
    }

    #[test]
    fn kill_cursors_matches_wire_layout() {
        let bytes = encode_kill_cursors(&[42, 100], 3);
        assert_eq!(&bytes[16..20], &0i32.to_le_bytes());
        assert_eq!(&bytes[20..24], &2i32.to_le_bytes());
        assert_eq!(&bytes[24..32], &42i64.to_le_bytes());
        assert_eq!(&bytes[32..40], &100i64.to_le_bytes());
        assert_eq!(bytes.len(), 40);
    }
}
