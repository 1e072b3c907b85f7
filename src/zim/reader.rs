//! Random-access ZIM reader.
//!
//! [`ZimReader`] parses the header, MIME list and pointer lists once at open
//! and then serves directory-entry lookups and blob byte ranges on demand.
//! The reader is `Sync`: the underlying stream sits behind a mutex so every
//! seek + read pair is atomic, and decoded clusters are shared through a
//! bounded LRU cache.
//!
//! Stored (uncompressed) clusters are never loaded whole; only their offset
//! table and the requested bytes are read.

use byteorder::{LittleEndian, ReadBytesExt};
use lru::LruCache;
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, trace};

use super::cluster::Cluster;
use super::codec::get_codec;
use super::dirent::{read_cstr, Dirent, DirentKind};
use super::header::{Header, HEADER_SIZE};
use super::ZimError;

/// Default number of decoded clusters kept per reader.
pub const DEFAULT_CLUSTER_CACHE_SIZE: usize = 16;

/// Configuration for [`ZimReader::with_options`].
#[derive(Debug, Clone)]
pub struct ReaderOptions {
    pub cluster_cache_size: usize,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self { cluster_cache_size: DEFAULT_CLUSTER_CACHE_SIZE }
    }
}

pub struct ZimReader<R: Read + Seek> {
    source:       Mutex<R>,
    pub header:   Header,
    mime_types:   Vec<String>,
    path_ptrs:    Vec<u64>,
    cluster_ptrs: Vec<u64>,
    clusters_end: u64,
    file_size:    u64,
    cache:        Mutex<LruCache<u32, Arc<Cluster>>>,
}

impl ZimReader<File> {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, ZimError> {
        Self::open_with_options(path, ReaderOptions::default())
    }

    pub fn open_with_options<P: AsRef<Path>>(path: P, opts: ReaderOptions) -> Result<Self, ZimError> {
        Self::with_options(File::open(path)?, opts)
    }
}

impl<R: Read + Seek> ZimReader<R> {
    pub fn new(reader: R) -> Result<Self, ZimError> {
        Self::with_options(reader, ReaderOptions::default())
    }

    /// Parse the fixed sections of an archive.  Fails without partial state
    /// if any of them is missing or points outside the stream.
    pub fn with_options(mut reader: R, opts: ReaderOptions) -> Result<Self, ZimError> {
        reader.seek(SeekFrom::Start(0))?;
        let header = Header::read(&mut reader)?;
        let file_size = reader.seek(SeekFrom::End(0))?;

        let entries  = header.entry_count as u64;
        let clusters = header.cluster_count as u64;
        check_span(header.path_ptr_pos, entries * 8, file_size, "path pointer list")?;
        check_span(header.title_ptr_pos, entries * 4, file_size, "title pointer list")?;
        check_span(header.cluster_ptr_pos, clusters * 8, file_size, "cluster pointer list")?;
        if header.mime_list_pos < HEADER_SIZE || header.mime_list_pos >= file_size {
            return Err(ZimError::Corrupt(format!("MIME list at {} outside file", header.mime_list_pos)));
        }
        if let Some(main) = header.main_page() {
            if main >= header.entry_count {
                return Err(ZimError::Corrupt(format!("main page index {main} out of range")));
            }
        }

        reader.seek(SeekFrom::Start(header.mime_list_pos))?;
        let mut mime_types = Vec::new();
        {
            let mut buffered = BufReader::new(&mut reader);
            loop {
                let mime = read_cstr(&mut buffered)?;
                if mime.is_empty() {
                    break;
                }
                mime_types.push(mime);
            }
        }

        reader.seek(SeekFrom::Start(header.path_ptr_pos))?;
        let path_ptrs = read_u64_list(&mut reader, entries as usize)?;
        reader.seek(SeekFrom::Start(header.cluster_ptr_pos))?;
        let cluster_ptrs = read_u64_list(&mut reader, clusters as usize)?;

        let clusters_end = if header.checksum_pos != 0 && header.checksum_pos <= file_size {
            header.checksum_pos
        } else {
            file_size
        };
        check_cluster_ptrs(&cluster_ptrs, header.mime_list_pos, clusters_end)?;

        debug!(
            entries = header.entry_count,
            clusters = header.cluster_count,
            mime_types = mime_types.len(),
            "parsed ZIM header"
        );

        let cache_size = NonZeroUsize::new(opts.cluster_cache_size).unwrap_or(NonZeroUsize::MIN);
        Ok(Self {
            source: Mutex::new(reader),
            header,
            mime_types,
            path_ptrs,
            cluster_ptrs,
            clusters_end,
            file_size,
            cache: Mutex::new(LruCache::new(cache_size)),
        })
    }

    // ── Directory ────────────────────────────────────────────────────────────

    pub fn entry_count(&self) -> u32 {
        self.header.entry_count
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn mime_types(&self) -> &[String] {
        &self.mime_types
    }

    pub fn mime_type(&self, index: u16) -> Result<&str, ZimError> {
        self.mime_types
            .get(index as usize)
            .map(String::as_str)
            .ok_or_else(|| ZimError::Corrupt(format!("MIME index {index} out of range")))
    }

    /// Namespace holding user content: `C` for 6.1+ archives, `A` before.
    pub fn content_namespace(&self) -> char {
        if self.header.uses_new_namespaces() { 'C' } else { 'A' }
    }

    /// Directory entry at position `index` of the path-ordered list.
    pub fn dirent(&self, index: u32) -> Result<Dirent, ZimError> {
        let ptr = *self.path_ptrs
            .get(index as usize)
            .ok_or_else(|| ZimError::Corrupt(format!("entry index {index} out of range")))?;
        let mut src = self.source.lock();
        src.seek(SeekFrom::Start(ptr))?;
        Dirent::read(BufReader::new(&mut *src))
    }

    /// Binary-search the path-ordered list for `(namespace, path)`.
    pub fn find(&self, namespace: char, path: &str) -> Result<Option<(u32, Dirent)>, ZimError> {
        let (mut lo, mut hi) = (0u32, self.header.entry_count);
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let dirent = self.dirent(mid)?;
            match (dirent.namespace, dirent.path.as_str()).cmp(&(namespace, path)) {
                Ordering::Less    => lo = mid + 1,
                Ordering::Greater => hi = mid,
                Ordering::Equal   => return Ok(Some((mid, dirent))),
            }
        }
        Ok(None)
    }

    // ── Clusters ─────────────────────────────────────────────────────────────

    /// Parsed cluster `n`, from the cache when possible.
    pub fn cluster(&self, n: u32) -> Result<Arc<Cluster>, ZimError> {
        if let Some(hit) = self.cache.lock().get(&n) {
            return Ok(Arc::clone(hit));
        }

        let start = *self.cluster_ptrs
            .get(n as usize)
            .ok_or_else(|| ZimError::Corrupt(format!("cluster {n} out of range")))?;
        let end = match self.cluster_ptrs.get(n as usize + 1) {
            Some(&next) => next.min(self.clusters_end),
            None        => self.last_cluster_end(start),
        };
        if end <= start {
            return Err(ZimError::Corrupt(format!("cluster {n} has no data ({start}..{end})")));
        }

        let cluster = {
            let mut src = self.source.lock();
            src.seek(SeekFrom::Start(start))?;
            let (compression, extended) = Cluster::parse_info(src.read_u8()?)?;
            let data_len = end - start - 1;
            if compression.is_compressed() {
                let mut packed = Vec::new();
                (&mut *src).take(data_len).read_to_end(&mut packed)?;
                drop(src);
                if packed.len() as u64 != data_len {
                    return Err(ZimError::Corrupt(format!(
                        "cluster {n} truncated: {} of {data_len} bytes", packed.len()
                    )));
                }
                trace!(cluster = n, codec = compression.name(), bytes = data_len, "decompressing cluster");
                let data = get_codec(compression).decompress(&packed)?;
                Cluster::decoded(compression, extended, data)?
            } else {
                Cluster::stored(extended, start + 1, data_len, &mut *src)?
            }
        };

        let cluster = Arc::new(cluster);
        self.cache.lock().put(n, Arc::clone(&cluster));
        Ok(cluster)
    }

    /// End of the final cluster: the first section that starts after it,
    /// or the checksum.  Pointer lists may follow the clusters.
    fn last_cluster_end(&self, start: u64) -> u64 {
        let h = &self.header;
        [h.path_ptr_pos, h.title_ptr_pos, h.cluster_ptr_pos, h.mime_list_pos]
            .into_iter()
            .filter(|&pos| pos > start)
            .fold(self.clusters_end, u64::min)
    }

    pub fn blob_size(&self, cluster: u32, blob: u32) -> Result<u64, ZimError> {
        self.cluster(cluster)?.blob_size(blob)
    }

    /// Bytes `[start, end)` of a blob.  The range is clamped to the blob.
    pub fn read_blob(&self, cluster: u32, blob: u32, start: u64, end: u64) -> Result<Vec<u8>, ZimError> {
        let c = self.cluster(cluster)?;
        let size  = c.blob_size(blob)?;
        let end   = end.min(size);
        let start = start.min(end);

        if let Some(slice) = c.decoded_slice(blob, start, end)? {
            return Ok(slice.to_vec());
        }
        let pos = c.stored_position(blob)?
            .ok_or_else(|| ZimError::Corrupt(format!("cluster {cluster} has no stored data")))?;
        let mut buf = vec![0u8; (end - start) as usize];
        let mut src = self.source.lock();
        src.seek(SeekFrom::Start(pos + start))?;
        src.read_exact(&mut buf)?;
        Ok(buf)
    }

    // ── Convenience ──────────────────────────────────────────────────────────

    /// Whole payload of a content entry, following no redirects.
    pub fn read_dirent_data(&self, dirent: &Dirent) -> Result<Option<Vec<u8>>, ZimError> {
        match dirent.kind {
            DirentKind::Content { cluster, blob, .. } => {
                Ok(Some(self.read_blob(cluster, blob, 0, u64::MAX)?))
            }
            _ => Ok(None),
        }
    }

    /// Value of metadata entry `M/<name>`.
    pub fn metadata(&self, name: &str) -> Result<Option<Vec<u8>>, ZimError> {
        match self.find('M', name)? {
            Some((_, dirent)) => self.read_dirent_data(&dirent),
            None              => Ok(None),
        }
    }

    /// Recompute the MD5 of everything before the checksum and compare it to
    /// the stored value.
    pub fn verify_checksum(&self) -> Result<(), ZimError> {
        let pos = self.header.checksum_pos;
        if pos == 0 || pos + 16 > self.file_size {
            return Err(ZimError::NoChecksum);
        }

        let mut src = self.source.lock();
        src.seek(SeekFrom::Start(0))?;
        let mut ctx = md5::Context::new();
        let mut remaining = pos;
        let mut buf = vec![0u8; 64 * 1024];
        while remaining > 0 {
            let want = remaining.min(buf.len() as u64) as usize;
            src.read_exact(&mut buf[..want])?;
            ctx.consume(&buf[..want]);
            remaining -= want as u64;
        }
        let mut stored = [0u8; 16];
        src.read_exact(&mut stored)?;

        let actual = ctx.compute().0;
        if actual != stored {
            return Err(ZimError::ChecksumMismatch {
                expected: hex::encode(stored),
                actual:   hex::encode(actual),
            });
        }
        Ok(())
    }
}

fn check_span(pos: u64, len: u64, file_size: u64, what: &str) -> Result<(), ZimError> {
    match pos.checked_add(len) {
        Some(end) if pos >= HEADER_SIZE && end <= file_size => Ok(()),
        _ => Err(ZimError::Corrupt(format!("{what} at {pos} (+{len}) outside file of {file_size} bytes"))),
    }
}

/// Cluster pointers must lie past the header and MIME list, never decrease,
/// and leave room for an info byte before the end of the cluster area.
fn check_cluster_ptrs(ptrs: &[u64], min: u64, clusters_end: u64) -> Result<(), ZimError> {
    let mut prev = min;
    for (n, &ptr) in ptrs.iter().enumerate() {
        if ptr < prev || ptr >= clusters_end {
            return Err(ZimError::Corrupt(format!(
                "cluster pointer {n} = {ptr} outside {prev}..{clusters_end}"
            )));
        }
        prev = ptr;
    }
    Ok(())
}

fn read_u64_list<R: Read>(reader: &mut R, count: usize) -> Result<Vec<u64>, ZimError> {
    let mut raw = vec![0u8; count * 8];
    reader.read_exact(&mut raw)?;
    Ok(raw
        .chunks_exact(8)
        .map(|c| u64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zim::{Compression, WriterOptions, ZimWriter};
    use std::io::Cursor;

    /// Two zstd clusters, one blob each.
    fn two_clusters() -> Vec<u8> {
        let opts = WriterOptions { compression: Compression::Zstd, cluster_size: 4 };
        let mut w = ZimWriter::with_options(Vec::new(), opts);
        w.add_content("a", "text/plain", b"first").unwrap();
        w.add_content("b", "text/plain", b"second").unwrap();
        w.finish().unwrap()
    }

    fn set_cluster_ptr(bytes: &mut [u8], n: usize, value: u64) {
        let header = Header::read(&bytes[..]).unwrap();
        let at = header.cluster_ptr_pos as usize + 8 * n;
        bytes[at..at + 8].copy_from_slice(&value.to_le_bytes());
    }

    #[test]
    fn reads_both_clusters() {
        let r = ZimReader::new(Cursor::new(two_clusters())).unwrap();
        assert_eq!(r.header.cluster_count, 2);
        assert_eq!(r.read_blob(0, 0, 0, u64::MAX).unwrap(), b"first");
        assert_eq!(r.read_blob(1, 0, 0, u64::MAX).unwrap(), b"second");
    }

    #[test]
    fn cluster_pointer_past_end_is_corrupt() {
        let mut bytes = two_clusters();
        set_cluster_ptr(&mut bytes, 1, 1 << 46);
        assert!(matches!(ZimReader::new(Cursor::new(bytes)), Err(ZimError::Corrupt(_))));
    }

    #[test]
    fn decreasing_cluster_pointers_are_corrupt() {
        let mut bytes = two_clusters();
        set_cluster_ptr(&mut bytes, 1, HEADER_SIZE);
        assert!(matches!(ZimReader::new(Cursor::new(bytes)), Err(ZimError::Corrupt(_))));
    }

    #[test]
    fn truncated_final_cluster_is_corrupt() {
        let mut bytes = two_clusters();
        // Drop the checksum and the tail of the last cluster.
        bytes.truncate(bytes.len() - 18);
        let r = ZimReader::new(Cursor::new(bytes)).unwrap();
        assert!(r.read_blob(0, 0, 0, u64::MAX).is_ok());
        assert!(r.read_blob(1, 0, 0, u64::MAX).is_err());
    }
}
