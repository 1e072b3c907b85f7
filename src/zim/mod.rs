//! Read/write support for the openZIM container.
//!
//! ```text
//! ┌──────────────────────┐
//! │ header (80 B)        │ ← header::Header
//! │ MIME list            │
//! │ path pointer list    │ u64 × entry_count, sorted by (namespace, path)
//! │ title pointer list   │ u32 × entry_count
//! │ directory entries    │ ← dirent::Dirent
//! │ cluster pointer list │ u64 × cluster_count
//! │ clusters             │ ← cluster::Cluster
//! │ MD5 checksum (16 B)  │
//! └──────────────────────┘
//! ```
//!
//! All integers are little-endian.

pub mod cluster;
pub mod codec;
pub mod dirent;
pub mod header;
pub mod reader;
pub mod writer;

use std::io;
use thiserror::Error;

pub use codec::{CodecError, Compression};
pub use header::Header;
pub use reader::{ReaderOptions, ZimReader};
pub use writer::{WriterOptions, ZimWriter};

#[derive(Error, Debug)]
pub enum ZimError {
    #[error("Not a ZIM file (magic {0:#010x})")]
    InvalidMagic(u32),
    #[error("Unsupported ZIM major version: {0}")]
    UnsupportedVersion(u16),
    #[error("Corrupt archive: {0}")]
    Corrupt(String),
    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },
    #[error("Archive has no checksum")]
    NoChecksum,
    #[error("Redirect target not found: {0}")]
    DanglingRedirect(String),
    #[error("Main page entry not found: {0}")]
    MissingMainPage(String),
    #[error("Duplicate entry: {0}")]
    DuplicateEntry(String),
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}
