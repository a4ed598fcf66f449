//! Crate-level wire round trips: `encode_request`/`decode_reply` through
//! every compressor, and the `OP_COMPRESSED` path end to end.

use bson::doc;
use mongo_core::compression::{Compressor, SnappyCompressor, ZlibCompressor, ZstdCompressor};
use mongo_core::identity::ServerAddress;
use mongo_core::wire::{self, header::MessageHeader, OpMsgSection, Reply, Request};

fn address() -> ServerAddress {
    ServerAddress::Tcp {
        host: "localhost".to_string(),
        port: 27017,
    }
}

fn round_trip(compressor: Option<&dyn Compressor>) {
    let command = doc! { "ping": 1i32, "$db": "admin" };
    let sections = [OpMsgSection::Body(command.clone())];
    let request = Request::Command { sections: &sections, flags: 0 };
    let bytes = wire::encode_request(&request, compressor, 42).unwrap();

    let header = MessageHeader::parse(&bytes, &address(), None).unwrap();
    assert_eq!(header.request_id, 42);

    let body = &bytes[wire::HEADER_LEN..];
    let compressor_id = compressor.map(|c| c.id());
    let reply = wire::decode_reply(&header, body, &address(), None, move |id| {
        if Some(id) == compressor_id {
            compressor.map(|c| match c.id() {
                1 => Box::new(SnappyCompressor) as Box<dyn Compressor>,
                2 => Box::new(ZlibCompressor::default()),
                3 => Box::new(ZstdCompressor::default()),
                _ => unreachable!(),
            })
        } else {
            None
        }
    })
    .unwrap();

    match reply {
        Reply::Msg(msg) => assert_eq!(msg.body(), Some(&command)),
        Reply::Legacy(..) => panic!("expected OP_MSG reply"),
    }
}

#[test]
fn round_trips_uncompressed() {
    round_trip(None);
}

#[test]
fn round_trips_through_snappy() {
    round_trip(Some(&SnappyCompressor));
}

#[test]
fn round_trips_through_zlib() {
    round_trip(Some(&ZlibCompressor::default()));
}

#[test]
fn round_trips_through_zstd() {
    round_trip(Some(&ZstdCompressor::default()));
}

#[test]
fn kill_cursors_request_skips_compression() {
    let request = Request::KillCursors { cursor_ids: &[1, 2, 3] };
    let bytes = wire::encode_request(&request, Some(&ZstdCompressor::default()), 7).unwrap();
    let header = MessageHeader::parse(&bytes, &address(), None).unwrap();
    assert_eq!(header.op_code, wire::OpCode::KillCursors);
}
