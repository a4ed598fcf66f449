use super::Compressor;
use crate::error::{Error, Result};
use crate::identity::ServerAddress;

pub struct SnappyCompressor;

fn placeholder_address() -> ServerAddress {
    ServerAddress::Tcp {
        host: String::new(),
        port: 0,
    }
}

impl Compressor for SnappyCompressor {
    fn name(&self) -> &'static str {
        "snappy"
    }

    fn id(&self) -> u8 {
        1
    }

    fn compress(&self, source: &[u8]) -> Result<Vec<u8>> {
        let mut encoder = snap::raw::Encoder::new();
        encoder
            .compress_vec(source)
            .map_err(|e| Error::compression(&placeholder_address(), format!("snappy compress failed: {e}")))
    }

    fn decompress(&self, source: &[u8], uncompressed_size: usize) -> Result<Vec<u8>> {
        let mut decoder = snap::raw::Decoder::new();
        let mut out = decoder
            .decompress_vec(source)
            .map_err(|e| Error::compression(&placeholder_address(), format!("snappy decompress failed: {e}")))?;
        if out.len() != uncompressed_size {
            return Err(Error::compression(
                &placeholder_address(),
                format!("snappy decompressed to {} bytes, expected {uncompressed_size}", out.len()),
            ));
        }
        out.shrink_to_fit();
        Ok(out)
    }
}
