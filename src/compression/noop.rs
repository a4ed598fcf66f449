use super::Compressor;
use crate::error::Result;

/// Always available; never advertised in the handshake's `compression` list
/// since it is the implicit fallback when nothing is negotiated.
pub struct NoopCompressor;

impl Compressor for NoopCompressor {
    fn name(&self) -> &'static str {
        "noop"
    }

    fn id(&self) -> u8 {
        0
    }

    fn compress(&self, source: &[u8]) -> Result<Vec<u8>> {
        Ok(source.to_vec())
    }

    fn decompress(&self, source: &[u8], _uncompressed_size: usize) -> Result<Vec<u8>> {
        Ok(source.to_vec())
    }
}
