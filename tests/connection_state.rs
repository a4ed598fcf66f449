//! Drives `InternalConnectionFactory`/`InternalConnection` against a
//! loopback TCP server speaking just enough `OP_MSG` to answer `hello` and
//! one follow-up command, exercising the `Open -> Ready` transition and a
//! real command round trip without a live MongoDB server.

use std::sync::Arc;

use bson::{doc, Document};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use uuid::Uuid;

use mongo_core::buffer::BufferPool;
use mongo_core::compression::CompressorList;
use mongo_core::config::TlsSettings;
use mongo_core::connection::factory::InternalConnectionFactory;
use mongo_core::identity::{ServerAddress, ServerId};
use mongo_core::stream::OperationContext;
use mongo_core::wire::header::{MessageHeader, OpCode, HEADER_LEN};
use mongo_core::wire::msg::{self, OpMsgSection};

async fn read_command(socket: &mut TcpStream) -> (i32, Document) {
    let mut header_buf = [0u8; HEADER_LEN];
    socket.read_exact(&mut header_buf).await.unwrap();
    let address = ServerAddress::Tcp { host: "test".to_string(), port: 0 };
    let header = MessageHeader::parse(&header_buf, &address, None).unwrap();
    let body_len = header.message_length as usize - HEADER_LEN;
    let mut body = vec![0u8; body_len];
    socket.read_exact(&mut body).await.unwrap();
    let reply = msg::decode(&body, &address, None).unwrap();
    (header.request_id, reply.body().unwrap().clone())
}

async fn write_reply(socket: &mut TcpStream, response_to: i32, server_request_id: i32, document: Document) {
    let sections = [OpMsgSection::Body(document)];
    let mut bytes = msg::encode(&sections, 0, server_request_id).unwrap();
    let message_length = bytes.len() as i32;
    MessageHeader::write(&mut bytes, message_length, server_request_id, response_to, OpCode::Msg);
    socket.write_all(&bytes).await.unwrap();
    socket.flush().await.unwrap();
}

#[tokio::test]
async fn handshake_and_ping_round_trip_over_loopback() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let server = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();

        let (hello_id, hello) = read_command(&mut socket).await;
        assert_eq!(hello.get_i32("hello").unwrap(), 1);
        write_reply(
            &mut socket,
            hello_id,
            9001,
            doc! {
                "ok": 1.0,
                "maxWireVersion": 21i32,
                "minWireVersion": 0i32,
                "maxBsonObjectSize": 16_777_216i32,
                "maxMessageSizeBytes": 48_000_000i32,
                "maxWriteBatchCount": 100_000i32,
            },
        )
        .await;

        let (ping_id, ping) = read_command(&mut socket).await;
        assert_eq!(ping.get_i32("ping").unwrap(), 1);
        write_reply(&mut socket, ping_id, 9002, doc! { "ok": 1.0 }).await;
    });

    let address = ServerAddress::Tcp { host: "127.0.0.1".to_string(), port };
    let server_id = ServerId::new(Uuid::new_v4(), address);
    let factory = InternalConnectionFactory::new(TlsSettings::default(), Arc::new(CompressorList::new(Vec::new())), None);
    let pool = BufferPool::new();
    let ctx = OperationContext::new(std::time::Duration::from_secs(5), std::time::Duration::from_secs(5), pool);

    let mut connection = factory.open(server_id, &ctx).await.unwrap();
    connection.initialize().await.unwrap();
    assert_eq!(connection.description().max_wire_version, 21);

    let reply = connection.send_and_receive("admin", doc! { "ping": 1i32 }).await.unwrap();
    assert_eq!(reply.get_f64("ok").unwrap(), 1.0);

    connection.close().await;
    server.await.unwrap();
}
