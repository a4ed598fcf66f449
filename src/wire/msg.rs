//! `OP_MSG` body: flag bits plus one or more sections, and the splittable
//! document-sequence encoding used for batched writes.

use bson::Document;

use crate::error::{ConnectionId, Error, Result};
use crate::identity::ServerAddress;
use crate::wire::header::{MessageHeader, OpCode, HEADER_LEN};

/// Bit 1 of the `OP_MSG` flag bits: the server will send further messages
/// for this request without a new `responseTo`-matched request (exhaust
/// cursors). Bit 0 (`checksumPresent`) is read but never set by this crate —
/// no message integrity checksum is produced or required.
pub const MORE_TO_COME: u32 = 1 << 1;
const CHECKSUM_PRESENT: u32 = 1 << 0;

const SECTION_KIND_BODY: u8 = 0;
const SECTION_KIND_SEQUENCE: u8 = 1;

#[derive(Debug, Clone, PartialEq)]
pub enum OpMsgSection {
    /// Type 0: exactly one document, the command body.
    Body(Document),
    /// Type 1: a named sequence of documents (e.g. a batched `documents`
    /// field lifted out of the command body).
    Sequence { identifier: String, documents: Vec<Document> },
}

#[derive(Debug, Clone)]
pub struct OpMsgReply {
    pub flags: u32,
    pub sections: Vec<OpMsgSection>,
}

impl OpMsgReply {
    pub fn more_to_come(&self) -> bool {
        self.flags & MORE_TO_COME != 0
    }

    /// The single command-reply document most callers want: the first
    /// type-0 section's document.
    pub fn body(&self) -> Option<&Document> {
        self.sections.iter().find_map(|s| match s {
            OpMsgSection::Body(doc) => Some(doc),
            _ => None,
        })
    }
}

fn encode_section(out: &mut Vec<u8>, section: &OpMsgSection) -> Result<()> {
    match section {
        OpMsgSection::Body(doc) => {
            out.push(SECTION_KIND_BODY);
            let bytes = bson::to_vec(doc).map_err(|e| {
                Error::ProtocolInternal {
                    address: dummy_address(),
                    connection_id: None,
                    message: format!("failed to encode document: {e}"),
                }
            })?;
            out.extend_from_slice(&bytes);
        }
        OpMsgSection::Sequence { identifier, documents } => {
            out.push(SECTION_KIND_SEQUENCE);
            let size_pos = out.len();
            out.extend_from_slice(&[0u8; 4]);
            out.extend_from_slice(identifier.as_bytes());
            out.push(0);
            for doc in documents {
                let bytes = bson::to_vec(doc).map_err(|e| Error::ProtocolInternal {
                    address: dummy_address(),
                    connection_id: None,
                    message: format!("failed to encode document: {e}"),
                })?;
                out.extend_from_slice(&bytes);
            }
            let size = (out.len() - size_pos) as i32;
            out[size_pos..size_pos + 4].copy_from_slice(&size.to_le_bytes());
        }
    }
    Ok(())
}

// Section encoding never actually needs an address for its errors (bson
// encode failures are local, not tied to a connection); a placeholder keeps
// `Error::ProtocolInternal`'s shape uniform without threading one through.
fn dummy_address() -> ServerAddress {
    ServerAddress::Tcp {
        host: String::new(),
        port: 0,
    }
}

/// Encodes a full `OP_MSG` wire message (header included) from its sections.
pub fn encode(sections: &[OpMsgSection], flags: u32, request_id: i32) -> Result<Vec<u8>> {
    let mut out = vec![0u8; HEADER_LEN];
    out.extend_from_slice(&flags.to_le_bytes());
    for section in sections {
        encode_section(&mut out, section)?;
    }
    let message_length = out.len() as i32;
    MessageHeader::write(&mut out, message_length, request_id, 0, OpCode::Msg);
    Ok(out)
}

/// Encodes an `OP_MSG` command with a command body (section 0) plus a
/// document sequence (section 1) for `documents`, stopping before either
/// `max_message_size` or `max_write_batch_count` is exceeded. The split
/// boundary is always a whole document: returns the encoded bytes and the
/// number of documents from `documents` actually included. Callers resubmit
/// the remainder as a subsequent message.
pub fn encode_split_write(
    command: &Document,
    identifier: &str,
    documents: &[Document],
    flags: u32,
    request_id: i32,
    max_message_size: usize,
    max_write_batch_count: usize,
) -> Result<(Vec<u8>, usize)> {
    let mut out = vec![0u8; HEADER_LEN];
    out.extend_from_slice(&flags.to_le_bytes());
    encode_section(&mut out, &OpMsgSection::Body(command.clone()))?;

    out.push(SECTION_KIND_SEQUENCE);
    let size_pos = out.len();
    out.extend_from_slice(&[0u8; 4]);
    out.extend_from_slice(identifier.as_bytes());
    out.push(0);

    let mut included = 0usize;
    for doc in documents {
        if included >= max_write_batch_count {
            break;
        }
        let bytes = bson::to_vec(doc).map_err(|e| Error::ProtocolInternal {
            address: dummy_address(),
            connection_id: None,
            message: format!("failed to encode document: {e}"),
        })?;
        // Would this document push the message past the limit? Checked
        // before appending so the split lands exactly on a document
        // boundary, never mid-document.
        if out.len() + bytes.len() > max_message_size && included > 0 {
            break;
        }
        out.extend_from_slice(&bytes);
        included += 1;
    }

    let seq_size = (out.len() - size_pos) as i32;
    out[size_pos..size_pos + 4].copy_from_slice(&seq_size.to_le_bytes());

    let message_length = out.len() as i32;
    MessageHeader::write(&mut out, message_length, request_id, 0, OpCode::Msg);
    Ok((out, included))
}

/// Decodes an `OP_MSG` body (everything after the 16-byte header) into its
/// flag bits and sections.
pub fn decode(body: &[u8], address: &ServerAddress, connection_id: ConnectionId) -> Result<OpMsgReply> {
    if body.len() < 4 {
        return Err(Error::protocol(address, connection_id, "OP_MSG body shorter than flag bits"));
    }
    let flags = u32::from_le_bytes(body[0..4].try_into().unwrap());
    let has_checksum = flags & CHECKSUM_PRESENT != 0;
    let body_end = if has_checksum {
        body.len().saturating_sub(4)
    } else {
        body.len()
    };
    let mut cursor = 4usize;
    let mut sections = Vec::new();
    while cursor < body_end {
        let kind = body[cursor];
        cursor += 1;
        match kind {
            SECTION_KIND_BODY => {
                let (doc, consumed) = read_document(&body[cursor..body_end], address, connection_id)?;
                cursor += consumed;
                sections.push(OpMsgSection::Body(doc));
            }
            SECTION_KIND_SEQUENCE => {
                if cursor + 4 > body_end {
                    return Err(Error::protocol(address, connection_id, "truncated document sequence"));
                }
                let seq_size = i32::from_le_bytes(body[cursor..cursor + 4].try_into().unwrap()) as usize;
                let seq_end = cursor + seq_size;
                if seq_end > body_end {
                    return Err(Error::protocol(address, connection_id, "document sequence size overruns body"));
                }
                let mut i = cursor + 4;
                let id_start = i;
                while i < seq_end && body[i] != 0 {
                    i += 1;
                }
                if i >= seq_end {
                    return Err(Error::protocol(address, connection_id, "unterminated sequence identifier"));
                }
                let identifier = std::str::from_utf8(&body[id_start..i])
                    .map_err(|_| Error::protocol(address, connection_id, "sequence identifier is not valid UTF-8"))?
                    .to_string();
                i += 1;
                let mut documents = Vec::new();
                while i < seq_end {
                    let (doc, consumed) = read_document(&body[i..seq_end], address, connection_id)?;
                    documents.push(doc);
                    i += consumed;
                }
                sections.push(OpMsgSection::Sequence { identifier, documents });
                cursor = seq_end;
            }
            other => {
                return Err(Error::protocol(address, connection_id, format!("unknown OP_MSG section kind {other}")));
            }
        }
    }
    Ok(OpMsgReply { flags, sections })
}

fn read_document(buf: &[u8], address: &ServerAddress, connection_id: ConnectionId) -> Result<(Document, usize)> {
    if buf.len() < 4 {
        return Err(Error::protocol(address, connection_id, "truncated BSON document length"));
    }
    let len = i32::from_le_bytes(buf[0..4].try_into().unwrap()) as usize;
    if len > buf.len() {
        return Err(Error::protocol(address, connection_id, "BSON document length overruns section"));
    }
    let doc = Document::from_reader(&mut std::io::Cursor::new(&buf[..len]))
        .map_err(|e| Error::protocol(address, connection_id, format!("invalid BSON document: {e}")))?;
    Ok((doc, len))
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
    fn round_trips_single_body_section() {
        let command = doc! { "ping": 1 };
        let bytes = encode(&[OpMsgSection::Body(command.clone())], 0, 1).unwrap();
        let header = MessageHeader::parse(&bytes, &addr(), None).unwrap();
        assert_eq!(header.message_length as usize, bytes.len());
        let reply = decode(&bytes[HEADER_LEN..], &addr(), None).unwrap();
        assert_eq!(reply.body(), Some(&command));
        assert!(!reply.more_to_come());
    }

    #[test]
    fn more_to_come_flag_round_trips() {
        let bytes = encode(&[OpMsgSection::Body(doc! { "ok": 1 })], MORE_TO_COME, 2).unwrap();
        let reply = decode(&bytes[HEADER_LEN..], &addr(), None).unwrap();
        assert!(reply.more_to_come());
    }

    #[test]
    fn round_trips_document_sequence() {
        let command = doc! { "insert": "coll" };
        let docs = vec![doc! { "a": 1 }, doc! { "a": 2 }];
        let sections = vec![
            OpMsgSection::Body(command.clone()),
            OpMsgSection::Sequence {
                identifier: "documents".to_string(),
                documents: docs.clone(),
            },
        ];
        let bytes = encode(&sections, 0, 3).unwrap();
        let reply = decode(&bytes[HEADER_LEN..], &addr(), None).unwrap();
        assert_eq!(reply.sections.len(), 2);
        match &reply.sections[1] {
            OpMsgSection::Sequence { identifier, documents } => {
                assert_eq!(identifier, "documents");
                assert_eq!(documents, &docs);
            }
            _ => panic!("expected sequence section"),
        }
    }

    #[test]
    fn split_write_stops_at_document_count_limit() {
        let command = doc! { "insert": "coll" };
        let docs: Vec<Document> = (0..10).map(|i| doc! { "n": i }).collect();
        let (bytes, included) =
            encode_split_write(&command, "documents", &docs, 0, 4, 1_000_000, 3).unwrap();
        assert_eq!(included, 3);
        let reply = decode(&bytes[HEADER_LEN..], &addr(), None).unwrap();
        match &reply.sections[1] {
            OpMsgSection::Sequence { documents, .. } => assert_eq!(documents.len(), 3),
            _ => panic!("expected sequence section"),
        }
    }

    #[test]
    fn split_write_always_includes_at_least_one_document() {
        let command = doc! { "insert": "coll" };
        let docs = vec![doc! { "payload": "x".repeat(100) }];
        // max_message_size smaller than even one document: still must emit it.
        let (_, included) = encode_split_write(&command, "documents", &docs, 0, 5, 10, 100).unwrap();
        assert_eq!(included, 1);
    }
}
