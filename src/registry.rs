//! Process-wide table of open archives.
//!
//! [`ArchiveRegistry`] maps an opaque [`ArchiveId`] to the reader and
//! canonical location of every open archive.  The map sits behind a
//! read-write lock: lookups share it, `open` and `close` take it
//! exclusively.  Readers are handed out as `Arc`s, so `close` only removes
//! the registry's reference; a fetch already holding the reader finishes
//! normally and the file handle is released with the last reference.
//!
//! # Lifecycle
//! Most callers use the process-wide instance:
//!
//! ```no_run
//! use zimserve::registry::ArchiveRegistry;
//! use zimserve::zim::ReaderOptions;
//!
//! // Once, at start-up (optional; `global()` initialises with defaults).
//! let registry = ArchiveRegistry::init_global(ReaderOptions::default());
//! let id = registry.open("wikipedia_en_top.zim")?;
//! // ...
//! // Once, at shutdown.
//! ArchiveRegistry::global().shutdown();
//! # Ok::<(), zimserve::ServiceError>(())
//! ```
//!
//! Closing an identity that is not open is a no-op: [`close`] returns
//! `false` and nothing else happens, so several owners may clean up the
//! same archive without coordinating.
//!
//! [`close`]: ArchiveRegistry::close

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, OnceLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::archive::ArchiveReader;
use crate::error::{Result, ServiceError};
use crate::metadata::{ArchiveMetadata, MetadataExtractor};
use crate::zim::{ReaderOptions, ZimError, ZimReader};

// ── ArchiveId ────────────────────────────────────────────────────────────────

/// Identity of one open archive.  Random, unrelated to the file's path or to
/// the UUID stored inside the archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArchiveId(Uuid);

impl ArchiveId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl From<Uuid> for ArchiveId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl fmt::Display for ArchiveId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.hyphenated().fmt(f)
    }
}

impl FromStr for ArchiveId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

// ── RegistryEntry ────────────────────────────────────────────────────────────

/// One open archive.  Cloning shares the reader.
#[derive(Clone)]
pub struct RegistryEntry {
    pub id:        ArchiveId,
    /// Canonical file location the archive was opened from.
    pub location:  PathBuf,
    pub reader:    Arc<dyn ArchiveReader>,
    pub opened_at: DateTime<Utc>,
}

impl fmt::Debug for RegistryEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryEntry")
            .field("id", &self.id)
            .field("location", &self.location)
            .field("opened_at", &self.opened_at)
            .finish_non_exhaustive()
    }
}

// ── ArchiveRegistry ──────────────────────────────────────────────────────────

/// Opens the archive at a canonical location.
pub type Opener = dyn Fn(&Path) -> std::result::Result<Arc<dyn ArchiveReader>, ZimError> + Send + Sync;

static GLOBAL: OnceLock<ArchiveRegistry> = OnceLock::new();

pub struct ArchiveRegistry {
    entries: RwLock<HashMap<ArchiveId, RegistryEntry>>,
    opener:  Box<Opener>,
}

impl ArchiveRegistry {
    // ── Constructors ─────────────────────────────────────────────────────────

    pub fn new() -> Self {
        Self::with_options(ReaderOptions::default())
    }

    /// Registry opening files with [`ZimReader`] configured by `opts`.
    pub fn with_options(opts: ReaderOptions) -> Self {
        Self::with_opener(move |path: &Path| {
            let reader = ZimReader::open_with_options(path, opts.clone())?;
            Ok(Arc::new(reader) as Arc<dyn ArchiveReader>)
        })
    }

    /// Registry opening files through a custom reader backend.
    pub fn with_opener<F>(opener: F) -> Self
    where
        F: Fn(&Path) -> std::result::Result<Arc<dyn ArchiveReader>, ZimError> + Send + Sync + 'static,
    {
        Self {
            entries: RwLock::new(HashMap::new()),
            opener:  Box::new(opener),
        }
    }

    /// The process-wide registry, created with default options on first use.
    pub fn global() -> &'static ArchiveRegistry {
        GLOBAL.get_or_init(ArchiveRegistry::new)
    }

    /// Create the process-wide registry with `opts`.  Has no effect (other
    /// than a warning) once the global registry exists.
    pub fn init_global(opts: ReaderOptions) -> &'static ArchiveRegistry {
        if GLOBAL.set(ArchiveRegistry::with_options(opts)).is_err() {
            warn!("global archive registry already initialised; options ignored");
        }
        Self::global()
    }

    // ── Open / close ─────────────────────────────────────────────────────────

    /// Open the archive at `location`, or return the identity it is already
    /// registered under.
    ///
    /// Locations are compared after canonicalisation.  On failure the
    /// registry is unchanged and any half-opened reader has been dropped.
    pub fn open<P: AsRef<Path>>(&self, location: P) -> Result<ArchiveId> {
        let requested = location.as_ref();
        let location = fs::canonicalize(requested).map_err(|e| {
            warn!(location = %requested.display(), error = %e, "cannot resolve archive location");
            ServiceError::Open { location: requested.to_owned(), source: e.into() }
        })?;

        if let Some(id) = self.find_by_location(&location) {
            debug!(%id, location = %location.display(), "archive already open");
            return Ok(id);
        }

        // Parse outside the lock; lookups on other archives keep running.
        let reader = (self.opener)(&location).map_err(|source| {
            warn!(location = %location.display(), error = %source, "failed to open archive");
            ServiceError::Open { location: location.clone(), source }
        })?;

        let mut entries = self.entries.write();
        if let Some(existing) = entries.values().find(|e| e.location == location) {
            debug!(id = %existing.id, location = %location.display(), "archive opened concurrently; reusing");
            return Ok(existing.id);
        }
        let mut id = ArchiveId::generate();
        while entries.contains_key(&id) {
            id = ArchiveId::generate();
        }
        entries.insert(id, RegistryEntry {
            id,
            location: location.clone(),
            reader,
            opened_at: Utc::now(),
        });
        info!(%id, location = %location.display(), "opened archive");
        Ok(id)
    }

    /// Remove `id` from the registry.  Returns whether it was open.
    pub fn close(&self, id: ArchiveId) -> bool {
        let removed = self.entries.write().remove(&id);
        match removed {
            Some(entry) => {
                info!(%id, location = %entry.location.display(), "closed archive");
                true
            }
            None => {
                debug!(%id, "close of unknown archive ignored");
                false
            }
        }
    }

    /// Close every open archive.  Returns how many were closed.
    pub fn shutdown(&self) -> usize {
        let drained: Vec<RegistryEntry> = self.entries.write().drain().map(|(_, e)| e).collect();
        info!(count = drained.len(), "archive registry shut down");
        drained.len()
    }

    // ── Lookup ───────────────────────────────────────────────────────────────

    /// Snapshot of the currently open identities.
    pub fn list_identities(&self) -> HashSet<ArchiveId> {
        self.entries.read().keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn contains(&self, id: ArchiveId) -> bool {
        self.entries.read().contains_key(&id)
    }

    /// Snapshot of the entry registered under `id`.
    pub fn entry(&self, id: ArchiveId) -> Result<RegistryEntry> {
        self.entries
            .read()
            .get(&id)
            .cloned()
            .ok_or(ServiceError::UnknownIdentity(id))
    }

    /// Reader for `id`.  The returned handle stays valid even if `id` is
    /// closed while it is in use.
    pub fn reader(&self, id: ArchiveId) -> Result<Arc<dyn ArchiveReader>> {
        self.entries
            .read()
            .get(&id)
            .map(|e| Arc::clone(&e.reader))
            .ok_or(ServiceError::UnknownIdentity(id))
    }

    pub fn location_of(&self, id: ArchiveId) -> Result<PathBuf> {
        self.entries
            .read()
            .get(&id)
            .map(|e| e.location.clone())
            .ok_or(ServiceError::UnknownIdentity(id))
    }

    /// Identity of the archive open at `location`, which must already be
    /// canonical.
    pub fn find_by_location(&self, location: &Path) -> Option<ArchiveId> {
        self.entries
            .read()
            .values()
            .find(|e| e.location == location)
            .map(|e| e.id)
    }

    /// Descriptive metadata of an open archive.
    pub fn metadata(&self, id: ArchiveId) -> Result<ArchiveMetadata> {
        let entry = self.entry(id)?;
        MetadataExtractor::from_reader(entry.reader.as_ref(), &entry.location)
    }
}

impl Default for ArchiveRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zim::ZimWriter;
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::NamedTempFile;

    fn archive_bytes() -> Vec<u8> {
        let mut w = ZimWriter::new(Vec::new());
        w.add_content("home", "text/html", b"home page").unwrap();
        w.finish().unwrap()
    }

    /// Registry whose opener ignores the file and counts calls.
    fn counting_registry(opens: Arc<AtomicUsize>) -> ArchiveRegistry {
        let bytes = archive_bytes();
        ArchiveRegistry::with_opener(move |_| {
            opens.fetch_add(1, Ordering::SeqCst);
            let reader = ZimReader::new(Cursor::new(bytes.clone()))?;
            Ok(Arc::new(reader) as Arc<dyn ArchiveReader>)
        })
    }

    #[test]
    fn id_display_round_trips() {
        let id = ArchiveId::generate();
        assert_eq!(id.to_string().parse::<ArchiveId>().unwrap(), id);
        assert!("not-a-uuid".parse::<ArchiveId>().is_err());
    }

    #[test]
    fn open_is_idempotent_per_location() {
        let opens = Arc::new(AtomicUsize::new(0));
        let registry = counting_registry(Arc::clone(&opens));
        let file = NamedTempFile::new().unwrap();

        let a = registry.open(file.path()).unwrap();
        let b = registry.open(file.path()).unwrap();
        assert_eq!(a, b);
        assert_eq!(registry.len(), 1);
        assert_eq!(opens.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn equivalent_spellings_share_an_identity() {
        let registry = counting_registry(Arc::new(AtomicUsize::new(0)));
        let file = NamedTempFile::new().unwrap();
        let dir = file.path().parent().unwrap();
        let name = file.path().file_name().unwrap();
        let dotted = dir.join(".").join(name);

        assert_eq!(registry.open(file.path()).unwrap(), registry.open(&dotted).unwrap());
    }

    #[test]
    fn missing_file_leaves_registry_untouched() {
        let registry = ArchiveRegistry::new();
        let err = registry.open("/definitely/not/here.zim").unwrap_err();
        assert!(matches!(err, ServiceError::Open { .. }));
        assert!(registry.is_empty());
    }

    #[test]
    fn opener_failure_is_open_error() {
        let registry = ArchiveRegistry::new();
        let file = NamedTempFile::new().unwrap();
        std::fs::write(file.path(), b"this is not a zim file at all, just text").unwrap();
        let err = registry.open(file.path()).unwrap_err();
        assert!(matches!(err, ServiceError::Open { source: ZimError::InvalidMagic(_), .. }));
        assert!(registry.is_empty());
    }

    #[test]
    fn close_unknown_is_noop() {
        let registry = counting_registry(Arc::new(AtomicUsize::new(0)));
        let file = NamedTempFile::new().unwrap();
        let id = registry.open(file.path()).unwrap();

        assert!(registry.close(id));
        assert!(!registry.close(id));
        assert!(!registry.close(ArchiveId::generate()));
        assert!(matches!(registry.reader(id), Err(ServiceError::UnknownIdentity(x)) if x == id));
        assert!(matches!(registry.location_of(id), Err(ServiceError::UnknownIdentity(_))));
        assert!(!registry.list_identities().contains(&id));
    }

    #[test]
    fn reopen_after_close_gets_fresh_identity() {
        let registry = counting_registry(Arc::new(AtomicUsize::new(0)));
        let file = NamedTempFile::new().unwrap();
        let first = registry.open(file.path()).unwrap();
        registry.close(first);
        let second = registry.open(file.path()).unwrap();
        assert_ne!(first, second);
        assert_eq!(registry.list_identities(), HashSet::from([second]));
    }

    #[test]
    fn reader_outlives_close() {
        let registry = counting_registry(Arc::new(AtomicUsize::new(0)));
        let file = NamedTempFile::new().unwrap();
        let id = registry.open(file.path()).unwrap();

        let reader = registry.reader(id).unwrap();
        registry.close(id);
        assert_eq!(reader.entry_count(), 1);
    }

    #[test]
    fn concurrent_opens_converge() {
        let opens = Arc::new(AtomicUsize::new(0));
        let registry = Arc::new(counting_registry(Arc::clone(&opens)));
        let file = NamedTempFile::new().unwrap();
        let path = file.path().to_path_buf();

        let ids: Vec<ArchiveId> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let path = path.clone();
                std::thread::spawn(move || registry.open(&path).unwrap())
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|h| h.join().unwrap())
            .collect();

        assert!(ids.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn shutdown_closes_everything() {
        let registry = counting_registry(Arc::new(AtomicUsize::new(0)));
        let a = NamedTempFile::new().unwrap();
        let b = NamedTempFile::new().unwrap();
        registry.open(a.path()).unwrap();
        registry.open(b.path()).unwrap();
        assert_eq!(registry.shutdown(), 2);
        assert!(registry.is_empty());
    }
}
