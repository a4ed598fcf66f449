//! `OP_KILL_CURSORS`: the one legacy wire operation this core still issues
//! itself. Fire-and-forget: the protocol defines no reply, so the command
//! completes as soon as the write succeeds.

use std::time::Instant;

use bson::doc;

use crate::error::{ConnectionId, Result};
use crate::events::{self, CommandListener};
use crate::id::next_request_id;
use crate::identity::ServerAddress;
use crate::stream::Stream;
use crate::wire::legacy::encode_kill_cursors;

/// Writes an `OP_KILL_CURSORS` message for `cursor_ids` and synthesizes the
/// success event spec.md §4.7 calls for; there is no reply to parse.
pub async fn kill_cursors(
    stream: &mut dyn Stream,
    cursor_ids: &[i64],
    listener: &dyn CommandListener,
) -> Result<()> {
    let request_id = next_request_id();
    let address = stream.address().clone();
    let connection_id = stream.connection_id();
    let command = doc! { "killCursors": "*", "cursors": cursor_ids.iter().map(|id| bson::Bson::Int64(*id)).collect::<Vec<_>>() };
    listener.on_started(&events::started(request_id, "killCursors", "admin", &command, &address, connection_id));

    let started_at = Instant::now();
    let body = encode_kill_cursors(cursor_ids, request_id);
    let mut buffer = stream.acquire_buffer(body.len());
    buffer.with_mut_slice(|slice| slice.copy_from_slice(&body));

    match write_all(stream, &buffer, &address, connection_id).await {
        Ok(()) => {
            let reply = doc! { "ok": 1i32, "cursorsUnknown": cursor_ids.iter().map(|id| bson::Bson::Int64(*id)).collect::<Vec<_>>() };
            listener.on_succeeded(&events::succeeded(request_id, "killCursors", &reply, started_at.elapsed(), &address, connection_id));
            Ok(())
        }
        Err(err) => {
            listener.on_failed(&events::failed(request_id, "killCursors", &err, started_at.elapsed(), &address, connection_id));
            Err(err)
        }
    }
}

async fn write_all(
    stream: &mut dyn Stream,
    buffer: &crate::buffer::Buffer,
    _address: &ServerAddress,
    _connection_id: ConnectionId,
) -> Result<()> {
    stream.write(std::slice::from_ref(buffer)).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kill_cursors_reply_document_lists_every_id() {
        let reply = doc! { "ok": 1i32, "cursorsUnknown": [42i64, 100i64] };
        assert_eq!(reply.get_array("cursorsUnknown").unwrap().len(), 2);
    }
}
