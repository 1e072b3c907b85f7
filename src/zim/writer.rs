//! Archive writer.
//!
//! [`ZimWriter`] collects entries in memory, then lays the whole archive out
//! on [`finish`](ZimWriter::finish): header, MIME list, pointer lists,
//! directory entries, clusters and the trailing MD5.  Content blobs are
//! packed into clusters of roughly `cluster_size` bytes in path order.
//!
//! Redirect targets must exist when the archive is finished.  Cycles between
//! redirects are *not* rejected; readers are expected to guard against them.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs::File;
use std::io::Write;
use std::path::Path;
use tracing::debug;

use super::cluster::encode_cluster;
use super::codec::Compression;
use super::dirent::{Dirent, DirentKind};
use super::header::{Header, HEADER_SIZE};
use super::ZimError;

/// Default uncompressed cluster size: 1 MiB.
pub const DEFAULT_CLUSTER_SIZE: usize = 1024 * 1024;

/// Configuration for [`ZimWriter::with_options`].
#[derive(Debug, Clone)]
pub struct WriterOptions {
    pub compression:  Compression,
    pub cluster_size: usize,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            compression:  Compression::Zstd,
            cluster_size: DEFAULT_CLUSTER_SIZE,
        }
    }
}

#[derive(Debug)]
enum Item {
    Content { mime: String, data: Vec<u8> },
    Redirect { namespace: char, target: String },
}

#[derive(Debug)]
struct PendingEntry {
    title: String,
    item:  Item,
}

type Key = (char, String);

pub struct ZimWriter<W: Write> {
    writer:       W,
    pub header:   Header,
    entries:      BTreeMap<Key, PendingEntry>,
    main_page:    Option<Key>,
    opts:         WriterOptions,
}

impl ZimWriter<File> {
    pub fn create<P: AsRef<Path>>(path: P, opts: WriterOptions) -> Result<Self, ZimError> {
        Ok(Self::with_options(File::create(path)?, opts))
    }
}

impl<W: Write> ZimWriter<W> {
    pub fn new(writer: W) -> Self {
        Self::with_options(writer, WriterOptions::default())
    }

    pub fn with_options(writer: W, opts: WriterOptions) -> Self {
        Self {
            writer,
            header: Header::new(),
            entries: BTreeMap::new(),
            main_page: None,
            opts,
        }
    }

    // ── Entry ingestion ──────────────────────────────────────────────────────

    /// Add a content entry under the user-content namespace `C`.
    pub fn add_content(&mut self, path: &str, mime: &str, data: &[u8]) -> Result<(), ZimError> {
        self.add_entry('C', path, "", mime, data)
    }

    /// Add a content entry in any namespace, with an explicit title
    /// (empty = same as path).
    pub fn add_entry(
        &mut self,
        namespace: char,
        path:      &str,
        title:     &str,
        mime:      &str,
        data:      &[u8],
    ) -> Result<(), ZimError> {
        self.insert(namespace, path, title, Item::Content {
            mime: mime.to_owned(),
            data: data.to_vec(),
        })
    }

    /// Add a redirect `C/path → C/target`.
    pub fn add_redirect(&mut self, path: &str, target: &str) -> Result<(), ZimError> {
        self.add_redirect_between('C', path, 'C', target)
    }

    /// Add a redirect `namespace/path → target_namespace/target`.
    pub fn add_redirect_between(
        &mut self,
        namespace:        char,
        path:             &str,
        target_namespace: char,
        target:           &str,
    ) -> Result<(), ZimError> {
        self.insert(namespace, path, "", Item::Redirect {
            namespace: target_namespace,
            target:    target.to_owned(),
        })
    }

    /// Add a text metadata entry `M/<name>`.
    pub fn add_metadata(&mut self, name: &str, value: &str) -> Result<(), ZimError> {
        self.add_entry('M', name, "", "text/plain", value.as_bytes())
    }

    /// Add a binary metadata entry such as `Illustration_48x48@1`.
    pub fn add_metadata_bytes(&mut self, name: &str, mime: &str, data: &[u8]) -> Result<(), ZimError> {
        self.add_entry('M', name, "", mime, data)
    }

    /// Declare `C/path` as the archive's main page.
    pub fn set_main_page(&mut self, path: &str) {
        self.main_page = Some(('C', path.to_owned()));
    }

    fn insert(&mut self, namespace: char, path: &str, title: &str, item: Item) -> Result<(), ZimError> {
        let key = (namespace, path.to_owned());
        if self.entries.contains_key(&key) {
            return Err(ZimError::DuplicateEntry(format!("{namespace}/{path}")));
        }
        let title = if title.is_empty() { path.to_owned() } else { title.to_owned() };
        self.entries.insert(key, PendingEntry { title, item });
        Ok(())
    }

    // ── Finalization ─────────────────────────────────────────────────────────

    /// Lay out and write the archive; returns the inner writer.
    pub fn finish(mut self) -> Result<W, ZimError> {
        let index: HashMap<&Key, u32> = self.entries
            .keys()
            .enumerate()
            .map(|(i, k)| (k, i as u32))
            .collect();

        // MIME list, sorted for deterministic output.
        let mimes: BTreeSet<&str> = self.entries.values()
            .filter_map(|e| match &e.item {
                Item::Content { mime, .. } => Some(mime.as_str()),
                Item::Redirect { .. }      => None,
            })
            .collect();
        let mime_index: HashMap<&str, u16> = mimes.iter()
            .enumerate()
            .map(|(i, m)| (*m, i as u16))
            .collect();

        // Pack blobs into clusters in path order.
        let mut clusters: Vec<Vec<Vec<u8>>> = Vec::new();
        let mut current: Vec<Vec<u8>> = Vec::new();
        let mut current_size = 0usize;
        let mut dirents = Vec::with_capacity(self.entries.len());
        for ((namespace, path), entry) in &self.entries {
            let kind = match &entry.item {
                Item::Content { mime, data } => {
                    if !current.is_empty() && current_size + data.len() > self.opts.cluster_size {
                        clusters.push(std::mem::take(&mut current));
                        current_size = 0;
                    }
                    current.push(data.clone());
                    current_size += data.len();
                    DirentKind::Content {
                        mime:    mime_index[mime.as_str()],
                        cluster: clusters.len() as u32,
                        blob:    (current.len() - 1) as u32,
                    }
                }
                Item::Redirect { namespace: tns, target } => {
                    let key = (*tns, target.clone());
                    let target = *index
                        .get(&key)
                        .ok_or_else(|| ZimError::DanglingRedirect(format!("{tns}/{target}")))?;
                    DirentKind::Redirect { target }
                }
            };
            dirents.push(Dirent {
                namespace: *namespace,
                path:      path.clone(),
                title:     entry.title.clone(),
                kind,
            });
        }
        if !current.is_empty() {
            clusters.push(current);
        }

        let main_page = match &self.main_page {
            Some(key) => Some(*index
                .get(key)
                .ok_or_else(|| ZimError::MissingMainPage(format!("{}/{}", key.0, key.1)))?),
            None => None,
        };

        // ── Layout ───────────────────────────────────────────────────────────
        let mut mime_bytes = Vec::new();
        for m in &mimes {
            mime_bytes.extend_from_slice(m.as_bytes());
            mime_bytes.push(0);
        }
        mime_bytes.push(0);

        let n = dirents.len() as u64;
        let path_ptr_pos  = HEADER_SIZE + mime_bytes.len() as u64;
        let title_ptr_pos = path_ptr_pos + 8 * n;
        let dirents_pos   = title_ptr_pos + 4 * n;

        let mut dirent_bytes = Vec::new();
        let mut path_ptrs = Vec::with_capacity(dirents.len());
        for d in &dirents {
            path_ptrs.push(dirents_pos + dirent_bytes.len() as u64);
            d.write(&mut dirent_bytes)?;
        }

        let mut title_order: Vec<u32> = (0..dirents.len() as u32).collect();
        title_order.sort_by(|&a, &b| {
            let (da, db) = (&dirents[a as usize], &dirents[b as usize]);
            (da.namespace, da.title()).cmp(&(db.namespace, db.title()))
        });

        let cluster_ptr_pos = dirents_pos + dirent_bytes.len() as u64;
        let mut cluster_bytes = Vec::new();
        let mut cluster_ptrs = Vec::with_capacity(clusters.len());
        let clusters_pos = cluster_ptr_pos + 8 * clusters.len() as u64;
        for blobs in &clusters {
            cluster_ptrs.push(clusters_pos + cluster_bytes.len() as u64);
            cluster_bytes.extend_from_slice(&encode_cluster(blobs, self.opts.compression)?);
        }

        self.header.entry_count     = dirents.len() as u32;
        self.header.cluster_count   = clusters.len() as u32;
        self.header.mime_list_pos   = HEADER_SIZE;
        self.header.path_ptr_pos    = path_ptr_pos;
        self.header.title_ptr_pos   = title_ptr_pos;
        self.header.cluster_ptr_pos = cluster_ptr_pos;
        self.header.checksum_pos    = clusters_pos + cluster_bytes.len() as u64;
        if let Some(main) = main_page {
            self.header.main_page = main;
        }

        let mut out = Vec::with_capacity(self.header.checksum_pos as usize + 16);
        self.header.write(&mut out)?;
        out.extend_from_slice(&mime_bytes);
        for p in &path_ptrs {
            out.extend_from_slice(&p.to_le_bytes());
        }
        for t in &title_order {
            out.extend_from_slice(&t.to_le_bytes());
        }
        out.extend_from_slice(&dirent_bytes);
        for p in &cluster_ptrs {
            out.extend_from_slice(&p.to_le_bytes());
        }
        out.extend_from_slice(&cluster_bytes);
        let digest = md5::compute(&out);
        out.extend_from_slice(&digest.0);

        debug!(
            entries = dirents.len(),
            clusters = clusters.len(),
            bytes = out.len(),
            codec = self.opts.compression.name(),
            "wrote ZIM archive"
        );

        self.writer.write_all(&out)?;
        self.writer.flush()?;
        Ok(self.writer)
    }
}
