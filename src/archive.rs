//! The archive-reader seam.
//!
//! Everything above this module (registry, resolver, fetcher, metadata)
//! talks to an open archive only through [`ArchiveReader`].  Entries come
//! back as the closed [`Entry`] variant: content, redirect, or absent.
//!
//! [`ZimReader`] is the production implementation.  Logical paths map onto
//! ZIM namespaces as follows: a bare path addresses the content namespace
//! (`C`, or `A` in pre-6.1 archives); `N/rest` addresses namespace `N` when
//! the content namespace has no entry of that name.  Canonical paths and
//! redirect targets are reported the same way.
//!
//! The content namespace always wins: in an archive holding both a content
//! entry spelled `X/foo` and an entry `foo` in namespace `X`, the path
//! `X/foo` (and a redirect whose target is `X/foo`) addresses the content
//! entry.  The shadowed entry is unreachable by path.  Every path therefore
//! names exactly one entry, and resolving a canonical path returns it
//! unchanged.

use std::io::{Read, Seek};
use uuid::Uuid;

use crate::zim::dirent::{Dirent, DirentKind};
use crate::zim::{ZimError, ZimReader};

/// A content-bearing entry, ready to be read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentEntry {
    /// Position in the archive's path-ordered entry list.
    pub index:     u32,
    /// Canonical content path.
    pub path:      String,
    pub mime_type: String,
    /// `false` for metadata, well-known and other internal entries.
    pub in_content_namespace: bool,
    pub cluster:   u32,
    pub blob:      u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entry {
    Content(ContentEntry),
    /// Canonical path of the redirect's immediate target.
    Redirect(String),
    Absent,
}

/// Per-archive operations the core needs from a reader library.
///
/// Implementations must be safe to share between threads; every method
/// takes `&self`.
pub trait ArchiveReader: Send + Sync {
    /// The archive's own UUID, as stored in the file.
    fn archive_uuid(&self) -> Uuid;

    fn entry_count(&self) -> u32;

    /// Archive size in bytes.
    fn file_size(&self) -> u64;

    /// Entry at `index` of the path-ordered list, with its canonical path.
    fn entry_at(&self, index: u32) -> Result<(String, Entry), ZimError>;

    fn lookup(&self, path: &str) -> Result<Entry, ZimError>;

    /// The declared main entry, if any.  May be a redirect.
    fn main_entry(&self) -> Result<Option<(String, Entry)>, ZimError>;

    /// Decoded payload size of `entry`.
    fn blob_size(&self, entry: &ContentEntry) -> Result<u64, ZimError>;

    /// Bytes `[start, end)` of `entry`'s decoded payload.
    fn read_blob(&self, entry: &ContentEntry, start: u64, end: u64) -> Result<Vec<u8>, ZimError>;

    /// Raw value of an archive-level metadata field.
    fn metadata(&self, name: &str) -> Result<Option<Vec<u8>>, ZimError>;
}

/// Normalise a logical content path: strip leading slashes, drop empty and
/// `.` segments, and apply `..` segments.
pub fn normalize_path(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            s => parts.push(s),
        }
    }
    parts.join("/")
}

// ── ZIM implementation ───────────────────────────────────────────────────────

impl<R: Read + Seek + Send> ZimReader<R> {
    fn canonical_path(&self, dirent: &Dirent) -> String {
        if dirent.namespace == self.content_namespace() {
            dirent.path.clone()
        } else {
            format!("{}/{}", dirent.namespace, dirent.path)
        }
    }

    fn to_entry(&self, index: u32, dirent: &Dirent) -> Result<Entry, ZimError> {
        Ok(match dirent.kind {
            DirentKind::Content { mime, cluster, blob } => Entry::Content(ContentEntry {
                index,
                path: self.canonical_path(dirent),
                mime_type: self.mime_type(mime)?.to_owned(),
                in_content_namespace: dirent.namespace == self.content_namespace(),
                cluster,
                blob,
            }),
            DirentKind::Redirect { target } => {
                let target = self.dirent(target)?;
                Entry::Redirect(self.canonical_path(&target))
            }
            DirentKind::Unused => Entry::Absent,
        })
    }
}

impl<R: Read + Seek + Send> ArchiveReader for ZimReader<R> {
    fn archive_uuid(&self) -> Uuid {
        self.header.uuid
    }

    fn entry_count(&self) -> u32 {
        self.header.entry_count
    }

    fn file_size(&self) -> u64 {
        ZimReader::file_size(self)
    }

    fn entry_at(&self, index: u32) -> Result<(String, Entry), ZimError> {
        let dirent = self.dirent(index)?;
        Ok((self.canonical_path(&dirent), self.to_entry(index, &dirent)?))
    }

    fn lookup(&self, path: &str) -> Result<Entry, ZimError> {
        let path = normalize_path(path);
        if path.is_empty() {
            return Ok(Entry::Absent);
        }
        if let Some((index, dirent)) = self.find(self.content_namespace(), &path)? {
            return self.to_entry(index, &dirent);
        }
        let bytes = path.as_bytes();
        if bytes.len() > 2 && bytes[0].is_ascii() && bytes[1] == b'/' {
            if let Some((index, dirent)) = self.find(bytes[0] as char, &path[2..])? {
                return self.to_entry(index, &dirent);
            }
        }
        Ok(Entry::Absent)
    }

    fn main_entry(&self) -> Result<Option<(String, Entry)>, ZimError> {
        match self.header.main_page() {
            Some(index) => self.entry_at(index).map(Some),
            None        => Ok(None),
        }
    }

    fn blob_size(&self, entry: &ContentEntry) -> Result<u64, ZimError> {
        ZimReader::blob_size(self, entry.cluster, entry.blob)
    }

    fn read_blob(&self, entry: &ContentEntry, start: u64, end: u64) -> Result<Vec<u8>, ZimError> {
        ZimReader::read_blob(self, entry.cluster, entry.blob, start, end)
    }

    fn metadata(&self, name: &str) -> Result<Option<Vec<u8>>, ZimError> {
        ZimReader::metadata(self, name)
    }
}
