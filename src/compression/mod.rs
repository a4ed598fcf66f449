//! Pluggable payload compressors, selected by wire id. Compression always
//! operates over a contiguous copy of the message body — the framing format
//! has no notion of a streaming compressor.

mod noop;
mod snappy;
mod zlib;
mod zstd_compressor;

pub use noop::NoopCompressor;
pub use snappy::SnappyCompressor;
pub use zlib::ZlibCompressor;
pub use zstd_compressor::ZstdCompressor;

use crate::error::Result;

pub trait Compressor: Send + Sync {
    fn name(&self) -> &'static str;
    fn id(&self) -> u8;
    fn compress(&self, source: &[u8]) -> Result<Vec<u8>>;
    fn decompress(&self, source: &[u8], uncompressed_size: usize) -> Result<Vec<u8>>;
}

/// The ordered list of compressors a connection is willing to use, as
/// advertised in the handshake's `compression` array. `negotiate` picks the
/// first entry also present in the server's advertised list; an empty
/// intersection disables compression (noop is implicit, never advertised).
pub struct CompressorList {
    compressors: Vec<Box<dyn Compressor>>,
}

impl CompressorList {
    pub fn new(compressors: Vec<Box<dyn Compressor>>) -> Self {
        Self { compressors }
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.compressors.iter().map(|c| c.name()).collect()
    }

    /// Returns the first of our compressors also named in `server_names`, or
    /// `None` if compression is not negotiated.
    pub fn negotiate(&self, server_names: &[String]) -> Option<&dyn Compressor> {
        self.compressors
            .iter()
            .find(|c| server_names.iter().any(|n| n == c.name()))
            .map(|c| c.as_ref())
    }

    pub fn by_id(&self, id: u8) -> Option<Box<dyn Compressor>> {
        if id == 0 {
            return Some(Box::new(NoopCompressor));
        }
        self.compressors.iter().find(|c| c.id() == id).map(|c| dyn_clone(c.as_ref()))
    }
}

/// Compressors are stateless wrappers around a crate function; cheap to
/// reconstruct by id rather than threading `Clone` through the trait object.
fn dyn_clone(compressor: &dyn Compressor) -> Box<dyn Compressor> {
    match compressor.id() {
        1 => Box::new(SnappyCompressor),
        2 => Box::new(ZlibCompressor::default()),
        3 => Box::new(ZstdCompressor::default()),
        _ => Box::new(NoopCompressor),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_compressors() -> Vec<Box<dyn Compressor>> {
        vec![
            Box::new(SnappyCompressor),
            Box::new(ZlibCompressor::default()),
            Box::new(ZstdCompressor::default()),
        ]
    }

    #[test]
    fn negotiate_picks_first_common_entry() {
        let list = CompressorList::new(all_compressors());
        let server_names = vec!["zstd".to_string(), "snappy".to_string()];
        let chosen = list.negotiate(&server_names).unwrap();
        assert_eq!(chosen.name(), "snappy");
    }

    #[test]
    fn negotiate_returns_none_without_overlap() {
        let list = CompressorList::new(all_compressors());
        let chosen = list.negotiate(&["unknown".to_string()]);
        assert!(chosen.is_none());
    }

    #[test]
    fn every_compressor_round_trips_arbitrary_bytes() {
        let payload = b"the quick brown fox jumps over the lazy dog".repeat(37);
        for compressor in all_compressors() {
            let compressed = compressor.compress(&payload).unwrap();
            let restored = compressor.decompress(&compressed, payload.len()).unwrap();
            assert_eq!(restored, payload, "compressor {} failed round trip", compressor.name());
        }
    }

    #[test]
    fn noop_by_id_is_always_available() {
        let list = CompressorList::new(Vec::new());
        let compressor = list.by_id(0).unwrap();
        assert_eq!(compressor.name(), "noop");
        assert_eq!(compressor.compress(b"abc").unwrap(), b"abc");
    }
}
