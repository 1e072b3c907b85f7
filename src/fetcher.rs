//! Payload retrieval by canonical path.
//!
//! The fetcher does not follow redirects: a redirect entry is reported as
//! `NotFound`, so callers resolve with [`ContentResolver`] first.
//!
//! [`ContentResolver`]: crate::resolver::ContentResolver

use tracing::trace;

use crate::archive::{normalize_path, ArchiveReader, ContentEntry, Entry};
use crate::error::{Result, ServiceError};
use crate::range::ByteRange;
use crate::registry::{ArchiveId, ArchiveRegistry};
use crate::zim::ZimError;

/// A slice of one entry's decoded payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Content {
    pub data:       Vec<u8>,
    /// Offset of `data` within the payload.
    pub start:      u64,
    /// Exclusive end of `data` within the payload.
    pub end:        u64,
    pub total_size: u64,
    pub mime_type:  String,
}

impl Content {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Whether this is less than the whole payload.
    pub fn is_partial(&self) -> bool {
        self.start != 0 || self.end != self.total_size
    }

    /// Value for an HTTP `Content-Range` header.
    pub fn content_range(&self) -> String {
        if self.start == self.end {
            format!("bytes */{}", self.total_size)
        } else {
            format!("bytes {}-{}/{}", self.start, self.end - 1, self.total_size)
        }
    }
}

pub struct ContentFetcher<'a> {
    registry: &'a ArchiveRegistry,
}

impl<'a> ContentFetcher<'a> {
    pub fn new(registry: &'a ArchiveRegistry) -> Self {
        Self { registry }
    }

    /// Bytes `[start, end)` of the payload at `path`.
    ///
    /// `end` past the payload is clamped to its size.  `start` past the
    /// payload, or `end` before `start`, is a `Range` error.  `start == end`
    /// returns no bytes along with the size and MIME type.
    pub fn fetch(&self, id: ArchiveId, path: &str, start: u64, end: u64) -> Result<Content> {
        let reader = self.registry.reader(id)?;
        let entry = content_entry(reader.as_ref(), path)?;
        let total_size = reader.blob_size(&entry)?;

        let clamped = end.min(total_size);
        if start > total_size || clamped < start {
            return Err(ServiceError::Range { start, end, total: total_size });
        }

        let data = if start == clamped {
            Vec::new()
        } else {
            reader.read_blob(&entry, start, clamped)?
        };
        if data.len() as u64 != clamped - start {
            return Err(ZimError::Corrupt(format!(
                "short read of {}: {} of {} bytes",
                entry.path,
                data.len(),
                clamped - start
            ))
            .into());
        }

        trace!(%id, path = %entry.path, start, end = clamped, total = total_size, "fetched content");
        Ok(Content {
            data,
            start,
            end: clamped,
            total_size,
            mime_type: entry.mime_type,
        })
    }

    /// Fetch the slice an HTTP `Range` value asks for.
    pub fn fetch_range(&self, id: ArchiveId, path: &str, range: ByteRange) -> Result<Content> {
        let total = self.probe(id, path)?.total_size;
        let (start, end) = range.offsets(total);
        self.fetch(id, path, start, end)
    }

    /// Size and MIME type of `path`, without payload bytes.
    pub fn probe(&self, id: ArchiveId, path: &str) -> Result<Content> {
        self.fetch(id, path, 0, 0)
    }
}

fn content_entry(reader: &dyn ArchiveReader, path: &str) -> Result<ContentEntry> {
    match reader.lookup(path)? {
        Entry::Content(entry) => Ok(entry),
        Entry::Redirect(_) | Entry::Absent => Err(ServiceError::NotFound(normalize_path(path))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zim::{WriterOptions, ZimWriter};
    use tempfile::NamedTempFile;

    fn content(start: u64, end: u64, total: u64) -> Content {
        Content {
            data: vec![0; (end - start) as usize],
            start,
            end,
            total_size: total,
            mime_type: "text/plain".into(),
        }
    }

    #[test]
    fn content_range_header() {
        assert_eq!(content(0, 10, 10).content_range(), "bytes 0-9/10");
        assert_eq!(content(5, 7, 10).content_range(), "bytes 5-6/10");
        assert_eq!(content(3, 3, 10).content_range(), "bytes */10");
        assert!(!content(0, 10, 10).is_partial());
        assert!(content(0, 9, 10).is_partial());
    }

    fn open_sample() -> (ArchiveRegistry, NamedTempFile, ArchiveId) {
        let file = NamedTempFile::new().unwrap();
        let mut w = ZimWriter::create(file.path(), WriterOptions::default()).unwrap();
        w.add_content("home", "text/html", b"0123456789").unwrap();
        w.add_redirect("old", "home").unwrap();
        w.finish().unwrap();

        let registry = ArchiveRegistry::new();
        let id = registry.open(file.path()).unwrap();
        (registry, file, id)
    }

    #[test]
    fn slices_and_clamps() {
        let (registry, _file, id) = open_sample();
        let fetcher = ContentFetcher::new(&registry);

        let c = fetcher.fetch(id, "home", 2, 5).unwrap();
        assert_eq!(c.data, b"234");
        assert_eq!((c.total_size, c.mime_type.as_str()), (10, "text/html"));

        let c = fetcher.fetch(id, "home", 7, 1_000).unwrap();
        assert_eq!(c.data, b"789");
        assert_eq!(c.end, 10);
    }

    #[test]
    fn bad_ranges_are_rejected() {
        let (registry, _file, id) = open_sample();
        let fetcher = ContentFetcher::new(&registry);
        assert!(matches!(
            fetcher.fetch(id, "home", 11, 20),
            Err(ServiceError::Range { start: 11, total: 10, .. })
        ));
        assert!(matches!(fetcher.fetch(id, "home", 6, 4), Err(ServiceError::Range { .. })));
        assert!(fetcher.fetch(id, "home", 10, 10).unwrap().is_empty());
    }

    #[test]
    fn redirects_are_not_followed() {
        let (registry, _file, id) = open_sample();
        let fetcher = ContentFetcher::new(&registry);
        assert!(matches!(fetcher.fetch(id, "old", 0, 1), Err(ServiceError::NotFound(p)) if p == "old"));
        assert!(matches!(fetcher.probe(id, "/nope"), Err(ServiceError::NotFound(p)) if p == "nope"));
    }

    #[test]
    fn probe_and_header_ranges() {
        let (registry, _file, id) = open_sample();
        let fetcher = ContentFetcher::new(&registry);

        let probe = fetcher.probe(id, "home").unwrap();
        assert!(probe.is_empty());
        assert_eq!(probe.total_size, 10);

        let tail = fetcher.fetch_range(id, "home", ByteRange::Suffix(4)).unwrap();
        assert_eq!(tail.data, b"6789");
        assert_eq!(tail.content_range(), "bytes 6-9/10");

        let head = fetcher.fetch_range(id, "home", "bytes=0-0".parse().unwrap()).unwrap();
        assert_eq!(head.data, b"0");
    }
}
