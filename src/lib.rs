pub mod zim;
pub mod archive;
pub mod error;
pub mod registry;
pub mod resolver;
pub mod range;
pub mod fetcher;
pub mod metadata;

pub use archive::{ArchiveReader, ContentEntry, Entry};
pub use error::{Result, ServiceError};
pub use registry::{ArchiveId, ArchiveRegistry, RegistryEntry};
pub use resolver::{ContentResolver, MAX_REDIRECT_HOPS};
pub use range::ByteRange;
pub use fetcher::{Content, ContentFetcher};
pub use metadata::{ArchiveMetadata, MetadataExtractor};
