use std::io::Write;

use flate2::write::{ZlibDecoder, ZlibEncoder};
use flate2::Compression;

use super::Compressor;
use crate::error::{Error, Result};
use crate::identity::ServerAddress;

pub struct ZlibCompressor {
    level: Compression,
}

impl Default for ZlibCompressor {
    fn default() -> Self {
        Self {
            level: Compression::default(),
        }
    }
}

fn placeholder_address() -> ServerAddress {
    ServerAddress::Tcp {
        host: String::new(),
        port: 0,
    }
}

impl Compressor for ZlibCompressor {
    fn name(&self) -> &'static str {
        "zlib"
    }

    fn id(&self) -> u8 {
        2
    }

    fn compress(&self, source: &[u8]) -> Result<Vec<u8>> {
        let mut encoder = ZlibEncoder::new(Vec::new(), self.level);
        encoder
            .write_all(source)
            .map_err(|e| Error::compression(&placeholder_address(), format!("zlib compress failed: {e}")))?;
        encoder
            .finish()
            .map_err(|e| Error::compression(&placeholder_address(), format!("zlib compress failed: {e}")))
    }

    fn decompress(&self, source: &[u8], uncompressed_size: usize) -> Result<Vec<u8>> {
        let mut decoder = ZlibDecoder::new(Vec::with_capacity(uncompressed_size));
        decoder
            .write_all(source)
            .map_err(|e| Error::compression(&placeholder_address(), format!("zlib decompress failed: {e}")))?;
        decoder
            .finish()
            .map_err(|e| Error::compression(&placeholder_address(), format!("zlib decompress failed: {e}")))
    }
}
