//! Cluster compression codecs.
//!
//! # Identity rules
//! The low nibble of a cluster's info byte names its compression:
//!
//! | value | codec            |
//! |-------|------------------|
//! | 0, 1  | none (stored)    |
//! | 2     | zlib (obsolete)  |
//! | 3     | bzip2 (obsolete) |
//! | 4     | xz / LZMA2       |
//! | 5     | zstd             |
//!
//! Only none, xz and zstd are decoded.  zlib and bzip2 were dropped from the
//! format long ago; a cluster using them fails with
//! [`CodecError::Unsupported`] instead of being skipped.

use std::io::{self, Cursor};
use thiserror::Error;

// ── Compression enum ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Compression {
    None,
    Xz,
    Zstd,
}

impl Compression {
    /// Value written into the low nibble of the cluster info byte.
    #[inline]
    pub fn code(self) -> u8 {
        match self {
            Compression::None => 1,
            Compression::Xz   => 4,
            Compression::Zstd => 5,
        }
    }

    /// Resolve the low nibble of a cluster info byte.
    pub fn from_code(code: u8) -> Result<Self, CodecError> {
        match code & 0x0F {
            0 | 1 => Ok(Compression::None),
            4     => Ok(Compression::Xz),
            5     => Ok(Compression::Zstd),
            other => Err(CodecError::Unsupported(other)),
        }
    }

    /// Name used in logs and on the command line.
    pub fn name(self) -> &'static str {
        match self {
            Compression::None => "none",
            Compression::Xz   => "xz",
            Compression::Zstd => "zstd",
        }
    }

    /// Parse from a CLI string.
    pub fn from_name(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "none" | "stored" => Some(Compression::None),
            "xz" | "lzma"     => Some(Compression::Xz),
            "zstd"            => Some(Compression::Zstd),
            _                 => None,
        }
    }

    pub fn is_compressed(self) -> bool {
        self != Compression::None
    }
}

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Compression error: {0}")]
    Compression(String),
    #[error("Decompression error: {0}")]
    Decompression(String),
    #[error("Unsupported cluster compression type {0}")]
    Unsupported(u8),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

// ── Codec trait ──────────────────────────────────────────────────────────────

pub trait Codec: Send + Sync {
    fn compression(&self) -> Compression;
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError>;
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError>;
}

pub struct NoneCodec;
impl Codec for NoneCodec {
    fn compression(&self) -> Compression { Compression::None }
    fn compress(&self, data: &[u8])   -> Result<Vec<u8>, CodecError> { Ok(data.to_vec()) }
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> { Ok(data.to_vec()) }
}

/// Default zstd level used when writing clusters.
pub const ZSTD_LEVEL: i32 = 19;

pub struct ZstdCodec;
impl Codec for ZstdCodec {
    fn compression(&self) -> Compression { Compression::Zstd }
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        zstd::encode_all(data, ZSTD_LEVEL).map_err(|e| CodecError::Compression(e.to_string()))
    }
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        zstd::decode_all(data).map_err(|e| CodecError::Decompression(e.to_string()))
    }
}

pub struct XzCodec;
impl Codec for XzCodec {
    fn compression(&self) -> Compression { Compression::Xz }
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        let mut out = Vec::new();
        lzma_rs::xz_compress(&mut Cursor::new(data), &mut out)
            .map_err(|e| CodecError::Compression(e.to_string()))?;
        Ok(out)
    }
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        let mut out = Vec::new();
        lzma_rs::xz_decompress(&mut Cursor::new(data), &mut out)
            .map_err(|e| CodecError::Decompression(e.to_string()))?;
        Ok(out)
    }
}

// ── Factory ──────────────────────────────────────────────────────────────────

pub fn get_codec(compression: Compression) -> Box<dyn Codec> {
    match compression {
        Compression::None => Box::new(NoneCodec),
        Compression::Xz   => Box::new(XzCodec),
        Compression::Zstd => Box::new(ZstdCodec),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn obsolete_codes_are_rejected() {
        assert!(matches!(Compression::from_code(2), Err(CodecError::Unsupported(2))));
        assert!(matches!(Compression::from_code(3), Err(CodecError::Unsupported(3))));
    }

    #[test]
    fn extended_flag_is_ignored_by_code_lookup() {
        assert_eq!(Compression::from_code(0x15).unwrap(), Compression::Zstd);
        assert_eq!(Compression::from_code(0x10).unwrap(), Compression::None);
    }

    #[test]
    fn compressed_codecs_restore_input() {
        let data = b"<html><body>offline wikipedia</body></html>".repeat(32);
        for c in [Compression::Xz, Compression::Zstd] {
            let codec = get_codec(c);
            let packed = codec.compress(&data).unwrap();
            assert!(packed.len() < data.len(), "{} did not shrink input", c.name());
            assert_eq!(codec.decompress(&packed).unwrap(), data);
        }
    }
}
