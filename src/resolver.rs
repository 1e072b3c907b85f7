//! Path resolution: redirects, main page and random page.
//!
//! The resolver turns what a caller asked for into the canonical path of a
//! content entry.  It never reads payload bytes; that is the fetcher's job.

use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::HashSet;
use tracing::debug;

use crate::archive::{normalize_path, ArchiveReader, ContentEntry, Entry};
use crate::error::{Result, ServiceError};
use crate::registry::{ArchiveId, ArchiveRegistry};

/// Longest redirect chain followed before giving up.
pub const MAX_REDIRECT_HOPS: usize = 50;

/// Random probes tried before `random_page` falls back to a full scan.
const RANDOM_PROBES: usize = 64;

pub struct ContentResolver<'a> {
    registry: &'a ArchiveRegistry,
    max_hops: usize,
}

impl<'a> ContentResolver<'a> {
    pub fn new(registry: &'a ArchiveRegistry) -> Self {
        Self { registry, max_hops: MAX_REDIRECT_HOPS }
    }

    pub fn with_max_hops(mut self, max_hops: usize) -> Self {
        self.max_hops = max_hops;
        self
    }

    /// Follow redirects from `path` to a content entry.
    ///
    /// A path that was already visited fails with `RedirectLoop` right away;
    /// an acyclic chain longer than the hop cap fails the same way.
    pub fn resolve(&self, id: ArchiveId, path: &str) -> Result<String> {
        let reader = self.registry.reader(id)?;
        let entry = reader.lookup(path)?;
        self.follow(reader.as_ref(), &normalize_path(path), entry)
    }

    /// Canonical path of the archive's landing page.  A main entry that is a
    /// redirect resolves to its final target.
    pub fn main_page(&self, id: ArchiveId) -> Result<String> {
        let reader = self.registry.reader(id)?;
        match reader.main_entry()? {
            Some((path, entry)) => self.follow(reader.as_ref(), &path, entry),
            None => Err(ServiceError::NotFound(format!("main page of {id}"))),
        }
    }

    /// A uniformly chosen HTML page from the content namespace.
    pub fn random_page(&self, id: ArchiveId) -> Result<String> {
        let reader = self.registry.reader(id)?;
        let count = reader.entry_count();
        let mut rng = rand::thread_rng();

        if count > 0 {
            for _ in 0..RANDOM_PROBES {
                if let (_, Entry::Content(c)) = reader.entry_at(rng.gen_range(0..count))? {
                    if is_page(&c) {
                        return Ok(c.path);
                    }
                }
            }
        }

        debug!(%id, entries = count, "random probes missed; scanning all entries");
        let mut pages = Vec::new();
        for index in 0..count {
            if let (_, Entry::Content(c)) = reader.entry_at(index)? {
                if is_page(&c) {
                    pages.push(c.path);
                }
            }
        }
        pages
            .choose(&mut rng)
            .cloned()
            .ok_or_else(|| ServiceError::NotFound(format!("random page of {id}")))
    }

    fn follow(&self, reader: &dyn ArchiveReader, start: &str, mut entry: Entry) -> Result<String> {
        let mut seen = HashSet::new();
        let mut current = start.to_owned();
        let mut hops = 0;
        loop {
            match entry {
                Entry::Content(c) => return Ok(c.path),
                Entry::Absent => return Err(ServiceError::NotFound(current)),
                Entry::Redirect(target) => {
                    hops += 1;
                    if hops > self.max_hops || !seen.insert(current.clone()) {
                        return Err(ServiceError::RedirectLoop { path: start.to_owned(), hops });
                    }
                    debug!(from = %current, to = %target, hop = hops, "following redirect");
                    entry = reader.lookup(&target)?;
                    current = target;
                }
            }
        }
    }
}

fn is_page(entry: &ContentEntry) -> bool {
    entry.in_content_namespace
        && entry
            .mime_type
            .split(';')
            .next()
            .map(|essence| essence.trim().eq_ignore_ascii_case("text/html"))
            .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zim::ZimError;
    use std::sync::Arc;
    use tempfile::NamedTempFile;

    /// Directory-only reader; payload reads are never exercised here.
    struct MemReader {
        entries: Vec<(String, Entry)>,
        main:    Option<u32>,
    }

    impl MemReader {
        fn new(items: &[(&str, Option<&str>, &str)]) -> Self {
            let mut items = items.to_vec();
            items.sort_by_key(|(path, _, _)| *path);
            let entries = items
                .iter()
                .enumerate()
                .map(|(i, (path, target, mime))| {
                    let entry = match target {
                        Some(t) => Entry::Redirect(t.to_string()),
                        None => Entry::Content(ContentEntry {
                            index:     i as u32,
                            path:      path.to_string(),
                            mime_type: mime.to_string(),
                            in_content_namespace: !path.starts_with("M/"),
                            cluster:   0,
                            blob:      i as u32,
                        }),
                    };
                    (path.to_string(), entry)
                })
                .collect();
            Self { entries, main: None }
        }

        fn with_main(mut self, path: &str) -> Self {
            self.main = self.entries.iter().position(|(p, _)| p == path).map(|i| i as u32);
            self
        }
    }

    impl ArchiveReader for MemReader {
        fn archive_uuid(&self) -> uuid::Uuid {
            uuid::Uuid::nil()
        }
        fn entry_count(&self) -> u32 {
            self.entries.len() as u32
        }
        fn file_size(&self) -> u64 {
            0
        }
        fn entry_at(&self, index: u32) -> std::result::Result<(String, Entry), ZimError> {
            self.entries
                .get(index as usize)
                .cloned()
                .ok_or_else(|| ZimError::Corrupt(format!("no entry {index}")))
        }
        fn lookup(&self, path: &str) -> std::result::Result<Entry, ZimError> {
            let path = normalize_path(path);
            Ok(self.entries
                .iter()
                .find(|(p, _)| *p == path)
                .map(|(_, e)| e.clone())
                .unwrap_or(Entry::Absent))
        }
        fn main_entry(&self) -> std::result::Result<Option<(String, Entry)>, ZimError> {
            self.main.map(|i| self.entry_at(i)).transpose()
        }
        fn blob_size(&self, _: &ContentEntry) -> std::result::Result<u64, ZimError> {
            Ok(0)
        }
        fn read_blob(&self, _: &ContentEntry, _: u64, _: u64) -> std::result::Result<Vec<u8>, ZimError> {
            Ok(Vec::new())
        }
        fn metadata(&self, _: &str) -> std::result::Result<Option<Vec<u8>>, ZimError> {
            Ok(None)
        }
    }

    fn registered(reader: MemReader) -> (ArchiveRegistry, NamedTempFile, ArchiveId) {
        let reader: Arc<dyn ArchiveReader> = Arc::new(reader);
        let registry = ArchiveRegistry::with_opener(move |_| Ok(Arc::clone(&reader)));
        let file = NamedTempFile::new().unwrap();
        let id = registry.open(file.path()).unwrap();
        (registry, file, id)
    }

    const HTML: &str = "text/html";

    #[test]
    fn follows_redirect_chain() {
        let (registry, _file, id) = registered(MemReader::new(&[
            ("a", Some("b"), ""),
            ("b", Some("c"), ""),
            ("c", None, HTML),
        ]));
        let resolver = ContentResolver::new(&registry);
        assert_eq!(resolver.resolve(id, "a").unwrap(), "c");
        assert_eq!(resolver.resolve(id, "/c").unwrap(), "c");
    }

    #[test]
    fn cycle_is_redirect_loop() {
        let (registry, _file, id) = registered(MemReader::new(&[
            ("a", Some("b"), ""),
            ("b", Some("a"), ""),
            ("self", Some("self"), ""),
        ]));
        let resolver = ContentResolver::new(&registry);
        assert!(matches!(
            resolver.resolve(id, "a"),
            Err(ServiceError::RedirectLoop { ref path, .. }) if path == "a"
        ));
        assert!(matches!(resolver.resolve(id, "self"), Err(ServiceError::RedirectLoop { .. })));
    }

    #[test]
    fn hop_cap_bounds_long_chains() {
        let (registry, _file, id) = registered(MemReader::new(&[
            ("1", Some("2"), ""),
            ("2", Some("3"), ""),
            ("3", Some("4"), ""),
            ("4", Some("5"), ""),
            ("5", None, HTML),
        ]));
        assert_eq!(ContentResolver::new(&registry).resolve(id, "1").unwrap(), "5");
        let strict = ContentResolver::new(&registry).with_max_hops(3);
        assert!(matches!(strict.resolve(id, "1"), Err(ServiceError::RedirectLoop { hops: 4, .. })));
        assert_eq!(strict.resolve(id, "2").unwrap(), "5");
    }

    #[test]
    fn missing_paths_are_not_found() {
        let (registry, _file, id) = registered(MemReader::new(&[
            ("dangling", Some("gone"), ""),
            ("page", None, HTML),
        ]));
        let resolver = ContentResolver::new(&registry);
        assert!(matches!(resolver.resolve(id, "nope"), Err(ServiceError::NotFound(p)) if p == "nope"));
        assert!(matches!(resolver.resolve(id, "dangling"), Err(ServiceError::NotFound(p)) if p == "gone"));
    }

    #[test]
    fn main_page_follows_redirect() {
        let reader = MemReader::new(&[("index", Some("home"), ""), ("home", None, HTML)]).with_main("index");
        let (registry, _file, id) = registered(reader);
        let resolver = ContentResolver::new(&registry);
        assert_eq!(resolver.main_page(id).unwrap(), "home");
        assert_eq!(resolver.resolve(id, "home").unwrap(), "home");
    }

    #[test]
    fn missing_main_page_is_not_found() {
        let (registry, _file, id) = registered(MemReader::new(&[("home", None, HTML)]));
        assert!(matches!(ContentResolver::new(&registry).main_page(id), Err(ServiceError::NotFound(_))));
    }

    #[test]
    fn random_page_only_picks_html_content() {
        let (registry, _file, id) = registered(MemReader::new(&[
            ("M/Title", None, "text/plain"),
            ("alias", Some("one"), ""),
            ("logo.png", None, "image/png"),
            ("one", None, HTML),
            ("two", None, "text/html; charset=utf-8"),
        ]));
        let resolver = ContentResolver::new(&registry);
        let mut seen = HashSet::new();
        for _ in 0..200 {
            seen.insert(resolver.random_page(id).unwrap());
        }
        assert_eq!(seen, HashSet::from(["one".to_string(), "two".to_string()]));
    }

    #[test]
    fn random_page_without_pages_is_not_found() {
        let (registry, _file, id) = registered(MemReader::new(&[
            ("logo.png", None, "image/png"),
            ("alias", Some("logo.png"), ""),
        ]));
        assert!(matches!(ContentResolver::new(&registry).random_page(id), Err(ServiceError::NotFound(_))));

        let (registry, _file, id) = registered(MemReader::new(&[]));
        assert!(matches!(ContentResolver::new(&registry).random_page(id), Err(ServiceError::NotFound(_))));
    }

    #[test]
    fn closed_identity_is_unknown() {
        let (registry, _file, id) = registered(MemReader::new(&[("home", None, HTML)]));
        registry.close(id);
        let resolver = ContentResolver::new(&registry);
        assert!(matches!(resolver.resolve(id, "home"), Err(ServiceError::UnknownIdentity(_))));
        assert!(matches!(resolver.main_page(id), Err(ServiceError::UnknownIdentity(_))));
        assert!(matches!(resolver.random_page(id), Err(ServiceError::UnknownIdentity(_))));
    }
}
