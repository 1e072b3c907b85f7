use std::path::PathBuf;
use thiserror::Error;

use crate::registry::ArchiveId;
use crate::zim::ZimError;

/// Failure of a single registry, resolver or fetcher call.
///
/// Every variant is scoped to the request that produced it; none of them
/// leaves the registry in a changed state.
#[derive(Error, Debug)]
pub enum ServiceError {
    /// File missing, unreadable, or not a valid archive.
    #[error("Cannot open archive {}: {source}", location.display())]
    Open {
        location: PathBuf,
        #[source]
        source:   ZimError,
    },
    #[error("No open archive with identity {0}")]
    UnknownIdentity(ArchiveId),
    #[error("Entry not found: {0}")]
    NotFound(String),
    #[error("Redirect loop starting at {path} (gave up after {hops} hops)")]
    RedirectLoop { path: String, hops: usize },
    #[error("Range {start}..{end} not satisfiable for a payload of {total} bytes")]
    Range { start: u64, end: u64, total: u64 },
    /// Decoding failed inside an archive that opened successfully.
    #[error("Archive read failed: {0}")]
    Archive(#[from] ZimError),
}

pub type Result<T> = std::result::Result<T, ServiceError>;
