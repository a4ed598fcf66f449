//! The server description negotiated during the `hello` handshake: wire
//! version bounds, size/batch limits, session support, and whatever the
//! server disclosed about compression, auth mechanisms, and topology.

use bson::Document;
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
pub struct ConnectionDescription {
    pub max_wire_version: i32,
    pub min_wire_version: i32,
    pub max_message_size_bytes: i32,
    pub max_bson_object_size: i32,
    pub max_write_batch_count: i32,
    pub logical_session_timeout_minutes: Option<i32>,
    /// Compressor names the server advertised, in the server's own order.
    /// Negotiation still walks the client's preference list first (see
    /// `CompressorList::negotiate`).
    pub server_compressors: Vec<String>,
    pub sasl_supported_mechs: Vec<String>,
    pub server_type: Option<String>,
    pub topology_version: Option<Document>,
    pub service_id: Option<Uuid>,
    /// Present only when `speculativeAuthenticate` was requested in the
    /// handshake and the server honored it.
    pub speculative_authenticate: Option<Document>,
}

const DEFAULT_MAX_MESSAGE_SIZE: i32 = 48_000_000;
const DEFAULT_MAX_WRITE_BATCH_COUNT: i32 = 100_000;
const DEFAULT_MAX_BSON_OBJECT_SIZE: i32 = 16 * 1024 * 1024;

impl ConnectionDescription {
    /// Parses a `hello` reply document. Every field has a documented
    /// fallback — the handshake must still succeed against a server that
    /// omits optional fields, reporting the historical wire defaults.
    pub fn from_hello_reply(doc: &Document) -> Self {
        let string_array = |key: &str| -> Vec<String> {
            doc.get_array(key)
                .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
                .unwrap_or_default()
        };
        Self {
            max_wire_version: doc.get_i32("maxWireVersion").unwrap_or(0),
            min_wire_version: doc.get_i32("minWireVersion").unwrap_or(0),
            max_message_size_bytes: doc.get_i32("maxMessageSizeBytes").unwrap_or(DEFAULT_MAX_MESSAGE_SIZE),
            max_bson_object_size: doc.get_i32("maxBsonObjectSize").unwrap_or(DEFAULT_MAX_BSON_OBJECT_SIZE),
            max_write_batch_count: doc.get_i32("maxWriteBatchCount").unwrap_or(DEFAULT_MAX_WRITE_BATCH_COUNT),
            logical_session_timeout_minutes: doc.get_i32("logicalSessionTimeoutMinutes").ok(),
            server_compressors: string_array("compression"),
            sasl_supported_mechs: string_array("saslSupportedMechs"),
            server_type: doc.get_str("msg").ok().map(str::to_string),
            topology_version: doc.get_document("topologyVersion").ok().cloned(),
            service_id: doc
                .get_str("serviceId")
                .ok()
                .and_then(|s| Uuid::parse_str(s).ok()),
            speculative_authenticate: doc.get_document("speculativeAuthenticate").ok().cloned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn parses_minimal_reply() {
        let reply = doc! { "ok": 1.0, "maxWireVersion": 17 };
        let description = ConnectionDescription::from_hello_reply(&reply);
        assert_eq!(description.max_wire_version, 17);
        assert_eq!(description.max_message_size_bytes, DEFAULT_MAX_MESSAGE_SIZE);
        assert!(description.sasl_supported_mechs.is_empty());
    }

    #[test]
    fn parses_full_reply() {
        let reply = doc! {
            "ok": 1.0,
            "maxWireVersion": 21,
            "minWireVersion": 0,
            "maxMessageSizeBytes": 48_000_000,
            "maxBsonObjectSize": 16_777_216,
            "maxWriteBatchCount": 100_000,
            "logicalSessionTimeoutMinutes": 30,
            "compression": ["zstd", "snappy"],
            "saslSupportedMechs": ["SCRAM-SHA-256", "SCRAM-SHA-1"],
        };
        let description = ConnectionDescription::from_hello_reply(&reply);
        assert_eq!(description.logical_session_timeout_minutes, Some(30));
        assert_eq!(description.server_compressors, vec!["zstd", "snappy"]);
        assert_eq!(description.sasl_supported_mechs, vec!["SCRAM-SHA-256", "SCRAM-SHA-1"]);
    }
}
