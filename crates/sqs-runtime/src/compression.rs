//! Message body compression strategies.
//!
//! Every codec other than [`CompressionCode::None`] produces base64 text so the
//! result can travel as an SQS message body. The codec used for a message is
//! advertised through the [`COMPRESSION_ATTRIBUTE`] message attribute, carrying
//! the numeric [`CompressionCode`].

use crate::error::CompressionError;
use base64::{engine::general_purpose::STANDARD, Engine};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{Read, Write};
use std::str::FromStr;

#[cfg(test)]
#[path = "compression_tests.rs"]
mod tests;

/// Message attribute carrying the codec code of a compressed body
pub const COMPRESSION_ATTRIBUTE: &str = "compression";

/// Closed set of supported codecs, identified on the wire by a small integer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionCode {
    #[default]
    None,
    Gzip,
    Snappy,
}

impl CompressionCode {
    /// Numeric code written into the compression attribute
    pub fn code(&self) -> u8 {
        match self {
            Self::None => 0,
            Self::Gzip => 1,
            Self::Snappy => 2,
        }
    }

    /// Look up a codec by numeric code
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::None),
            1 => Some(Self::Gzip),
            2 => Some(Self::Snappy),
            _ => None,
        }
    }

    /// Resolve the codec named by a compression attribute value.
    ///
    /// Unknown or unparsable values resolve to [`CompressionCode::None`].
    pub fn from_attribute(value: &str) -> Self {
        value
            .trim()
            .parse::<u8>()
            .ok()
            .and_then(Self::from_code)
            .unwrap_or_default()
    }

    /// Attribute value advertising this codec
    pub fn to_attribute(&self) -> String {
        self.code().to_string()
    }

    /// Strategy implementing this codec
    pub fn compressor(&self) -> &'static dyn Compressor {
        compressor_for(*self)
    }
}

impl fmt::Display for CompressionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::None => "none",
            Self::Gzip => "gzip",
            Self::Snappy => "snappy",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for CompressionCode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "0" => Ok(Self::None),
            "gzip" | "1" => Ok(Self::Gzip),
            "snappy" | "2" => Ok(Self::Snappy),
            other => Err(format!("unknown compression '{}'", other)),
        }
    }
}

/// A compression strategy
pub trait Compressor: Send + Sync {
    /// Codec implemented by this strategy
    fn compression(&self) -> CompressionCode;

    /// Compress a payload
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CompressionError>;

    /// Reverse [`Compressor::compress`]
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CompressionError>;
}

/// Identity codec
#[derive(Debug, Default, Clone, Copy)]
pub struct NoneCompressor;

impl Compressor for NoneCompressor {
    fn compression(&self) -> CompressionCode {
        CompressionCode::None
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CompressionError> {
        Ok(data.to_vec())
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CompressionError> {
        Ok(data.to_vec())
    }
}

/// Gzip followed by base64
#[derive(Debug, Default, Clone, Copy)]
pub struct GzipCompressor;

impl Compressor for GzipCompressor {
    fn compression(&self) -> CompressionCode {
        CompressionCode::Gzip
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CompressionError> {
        if data.is_empty() {
            return Ok(Vec::new());
        }

        let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder
            .write_all(data)
            .map_err(|e| encode_error(CompressionCode::Gzip, e))?;
        let compressed = encoder
            .finish()
            .map_err(|e| encode_error(CompressionCode::Gzip, e))?;

        Ok(STANDARD.encode(compressed).into_bytes())
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CompressionError> {
        if data.is_empty() {
            return Ok(Vec::new());
        }

        let compressed = STANDARD
            .decode(data)
            .map_err(|e| decode_error(CompressionCode::Gzip, e))?;

        let mut decoder = GzDecoder::new(compressed.as_slice());
        let mut decompressed = Vec::new();
        decoder
            .read_to_end(&mut decompressed)
            .map_err(|e| decode_error(CompressionCode::Gzip, e))?;

        Ok(decompressed)
    }
}

/// Snappy block format followed by base64
#[derive(Debug, Default, Clone, Copy)]
pub struct SnappyCompressor;

impl Compressor for SnappyCompressor {
    fn compression(&self) -> CompressionCode {
        CompressionCode::Snappy
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CompressionError> {
        if data.is_empty() {
            return Ok(Vec::new());
        }

        let compressed = snap::raw::Encoder::new()
            .compress_vec(data)
            .map_err(|e| encode_error(CompressionCode::Snappy, e))?;

        Ok(STANDARD.encode(compressed).into_bytes())
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CompressionError> {
        if data.is_empty() {
            return Ok(Vec::new());
        }

        let compressed = STANDARD
            .decode(data)
            .map_err(|e| decode_error(CompressionCode::Snappy, e))?;

        snap::raw::Decoder::new()
            .decompress_vec(&compressed)
            .map_err(|e| decode_error(CompressionCode::Snappy, e))
    }
}

static NONE: NoneCompressor = NoneCompressor;
static GZIP: GzipCompressor = GzipCompressor;
static SNAPPY: SnappyCompressor = SnappyCompressor;

/// Registry lookup from codec to strategy
pub fn compressor_for(code: CompressionCode) -> &'static dyn Compressor {
    match code {
        CompressionCode::None => &NONE,
        CompressionCode::Gzip => &GZIP,
        CompressionCode::Snappy => &SNAPPY,
    }
}

/// Registry lookup by numeric code, defaulting to the identity codec
pub fn compressor_for_code(code: u8) -> &'static dyn Compressor {
    compressor_for(CompressionCode::from_code(code).unwrap_or_default())
}

fn encode_error(codec: CompressionCode, e: impl fmt::Display) -> CompressionError {
    CompressionError::Encode {
        codec,
        message: e.to_string(),
    }
}

fn decode_error(codec: CompressionCode, e: impl fmt::Display) -> CompressionError {
    CompressionError::Decode {
        codec,
        message: e.to_string(),
    }
}
