//! Byte-stream compression for cached values.
//!
//! Values are compressed after they are encoded and decompressed before they
//! are decoded. A failed decompression is reported as
//! [`CompressionError::Decompress`] so corrupt entries can be told apart from
//! cache misses and from decode failures.

use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CompressionError {
    #[error("Compression failed: {0}")]
    Compress(#[source] std::io::Error),
    #[error("Decompression failed: {0}")]
    Decompress(#[source] std::io::Error),
}

/// Streaming format used to compress cache entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressionFormat {
    #[default]
    Gzip,
    /// Zstd at the given level (0 picks the library default, currently 3).
    Zstd { level: i32 },
}

impl CompressionFormat {
    pub fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CompressionError> {
        match self {
            CompressionFormat::Gzip => compress_gzip(data),
            CompressionFormat::Zstd { level } => {
                zstd::encode_all(data, *level).map_err(CompressionError::Compress)
            }
        }
    }

    pub fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CompressionError> {
        match self {
            CompressionFormat::Gzip => decompress_gzip(data),
            CompressionFormat::Zstd { .. } => {
                zstd::decode_all(data).map_err(CompressionError::Decompress)
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CompressionFormat::Gzip => "gzip",
            CompressionFormat::Zstd { .. } => "zstd",
        }
    }
}

pub fn compress_gzip(data: &[u8]) -> Result<Vec<u8>, CompressionError> {
    let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder
        .write_all(data)
        .map_err(CompressionError::Compress)?;
    encoder.finish().map_err(CompressionError::Compress)
}

pub fn decompress_gzip(data: &[u8]) -> Result<Vec<u8>, CompressionError> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(CompressionError::Decompress)?;
    Ok(out)
}
