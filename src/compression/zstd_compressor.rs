use super::Compressor;
use crate::error::{Error, Result};
use crate::identity::ServerAddress;

pub struct ZstdCompressor {
    level: i32,
}

impl Default for ZstdCompressor {
    fn default() -> Self {
        Self { level: 0 }
    }
}

fn placeholder_address() -> ServerAddress {
    ServerAddress::Tcp {
        host: String::new(),
        port: 0,
    }
}

impl Compressor for ZstdCompressor {
    fn name(&self) -> &'static str {
        "zstd"
    }

    fn id(&self) -> u8 {
        3
    }

    fn compress(&self, source: &[u8]) -> Result<Vec<u8>> {
        zstd::bulk::compress(source, self.level)
            .map_err(|e| Error::compression(&placeholder_address(), format!("zstd compress failed: {e}")))
    }

    fn decompress(&self, source: &[u8], uncompressed_size: usize) -> Result<Vec<u8>> {
        zstd::bulk::decompress(source, uncompressed_size)
            .map_err(|e| Error::compression(&placeholder_address(), format!("zstd decompress failed: {e}")))
    }
}
