//! Archive-level descriptive metadata.
//!
//! Built from the `M/` entries of an archive.  [`MetadataExtractor::extract`]
//! works on a file that is not registered; the registry reuses
//! [`MetadataExtractor::from_reader`] for open archives.  Nothing is cached.
//!
//! Tags of the form `_key:value` are folded into typed fields:
//!
//! | tag               | field                      |
//! |-------------------|----------------------------|
//! | `_category:<c>`   | `category`                 |
//! | `_pictures:no`    | `has_pictures = false`     |
//! | `_videos:no`      | `has_videos = false`       |
//! | `_details:no`     | `has_details = false`      |
//! | `_sw:yes`         | `requires_service_workers` |
//! | `_ftindex:yes`    | `has_fulltext_index`       |
//!
//! All other tags are kept verbatim in `tags`.

use chrono::NaiveDate;
use serde::Serialize;
use std::path::Path;
use tracing::debug;
use uuid::Uuid;

use crate::archive::{ArchiveReader, Entry};
use crate::error::{Result, ServiceError};
use crate::zim::{ZimError, ZimReader};

const FAVICON_ENTRIES: [&str; 2] = ["M/Illustration_48x48@1", "-/favicon"];
const FULLTEXT_INDEX: &str = "X/fulltext/xapian";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Favicon {
    pub data:      Vec<u8>,
    pub mime_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArchiveMetadata {
    pub uuid:             Uuid,
    pub title:            String,
    pub description:      Option<String>,
    pub long_description: Option<String>,
    pub languages:        Vec<String>,
    pub category:         Option<String>,
    pub tags:             Vec<String>,
    pub created:          Option<NaiveDate>,
    pub creator:          Option<String>,
    pub publisher:        Option<String>,
    pub name:             Option<String>,
    pub flavour:          Option<String>,
    pub file_size:        u64,
    pub article_count:    u64,
    pub media_count:      u64,
    pub has_details:      bool,
    pub has_pictures:     bool,
    pub has_videos:       bool,
    pub requires_service_workers: bool,
    pub has_fulltext_index: bool,
    #[serde(skip)]
    pub favicon:          Option<Favicon>,
}

pub struct MetadataExtractor;

impl MetadataExtractor {
    /// Read the metadata of the archive at `location` without registering it.
    /// Any failure, including a bad metadata entry, is an `Open` error.
    pub fn extract<P: AsRef<Path>>(location: P) -> Result<ArchiveMetadata> {
        let location = location.as_ref();
        let open_error = |source: ZimError| ServiceError::Open {
            location: location.to_owned(),
            source,
        };
        let reader = ZimReader::open(location).map_err(open_error)?;
        Self::from_reader(&reader, location).map_err(|e| match e {
            ServiceError::Archive(source) => open_error(source),
            other => other,
        })
    }

    pub fn from_reader(reader: &dyn ArchiveReader, location: &Path) -> Result<ArchiveMetadata> {
        let text = |name: &str| -> Result<Option<String>> {
            Ok(reader.metadata(name)?.and_then(|raw| {
                let value = String::from_utf8_lossy(&raw).trim().to_owned();
                (!value.is_empty()).then_some(value)
            }))
        };

        let title = match text("Title")? {
            Some(title) => title,
            None => location
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default(),
        };

        let mut meta = ArchiveMetadata {
            uuid: reader.archive_uuid(),
            title,
            description: text("Description")?,
            long_description: text("LongDescription")?,
            languages: text("Language")?
                .map(|l| split_list(&l, ','))
                .unwrap_or_default(),
            category: None,
            tags: Vec::new(),
            created: text("Date")?.and_then(|d| NaiveDate::parse_from_str(&d, "%Y-%m-%d").ok()),
            creator: text("Creator")?,
            publisher: text("Publisher")?,
            name: text("Name")?,
            flavour: text("Flavour")?,
            file_size: reader.file_size(),
            article_count: 0,
            media_count: 0,
            has_details: true,
            has_pictures: true,
            has_videos: true,
            requires_service_workers: false,
            has_fulltext_index: matches!(reader.lookup(FULLTEXT_INDEX)?, Entry::Content(_)),
            favicon: favicon(reader)?,
        };

        if let Some(tags) = text("Tags")? {
            apply_tags(&mut meta, &tags);
        }

        let counts = match text("Counter")?.and_then(|c| parse_counter(&c)) {
            Some(counts) => counts,
            None => {
                debug!(location = %location.display(), "no usable Counter; scanning entries");
                scan_counts(reader)?
            }
        };
        meta.article_count = counts.articles;
        meta.media_count = counts.media;
        Ok(meta)
    }
}

fn split_list(value: &str, sep: char) -> Vec<String> {
    value
        .split(sep)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}

fn apply_tags(meta: &mut ArchiveMetadata, tags: &str) {
    for tag in split_list(tags, ';') {
        let Some((key, value)) = tag.strip_prefix('_').and_then(|t| t.split_once(':')) else {
            match tag.as_str() {
                "nopic" => meta.has_pictures = false,
                "novid" => meta.has_videos = false,
                "nodet" => meta.has_details = false,
                _ => {}
            }
            meta.tags.push(tag);
            continue;
        };
        match key {
            "category" => meta.category = Some(value.to_owned()),
            "pictures" => meta.has_pictures = value != "no",
            "videos" => meta.has_videos = value != "no",
            "details" => meta.has_details = value != "no",
            "sw" => meta.requires_service_workers = value == "yes",
            "ftindex" => meta.has_fulltext_index |= value == "yes",
            _ => meta.tags.push(tag.clone()),
        }
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
struct Counts {
    articles: u64,
    media:    u64,
}

impl Counts {
    fn add(&mut self, mime: &str, n: u64) {
        let essence = mime.split(';').next().unwrap_or("").trim();
        if essence == "text/html" {
            self.articles += n;
        } else if ["image/", "video/", "audio/"].iter().any(|p| essence.starts_with(p)) {
            self.media += n;
        }
    }
}

/// Parse `mime=count;mime=count`.  Any malformed item discards the lot.
fn parse_counter(counter: &str) -> Option<Counts> {
    let mut counts = Counts::default();
    for item in split_list(counter, ';') {
        let (mime, n) = item.rsplit_once('=')?;
        counts.add(mime, n.trim().parse().ok()?);
    }
    Some(counts)
}

fn scan_counts(reader: &dyn ArchiveReader) -> Result<Counts> {
    let mut counts = Counts::default();
    for index in 0..reader.entry_count() {
        if let (_, Entry::Content(c)) = reader.entry_at(index)? {
            if c.in_content_namespace {
                counts.add(&c.mime_type, 1);
            }
        }
    }
    Ok(counts)
}

fn favicon(reader: &dyn ArchiveReader) -> Result<Option<Favicon>> {
    for path in FAVICON_ENTRIES {
        if let Entry::Content(entry) = reader.lookup(path)? {
            let size = reader.blob_size(&entry)?;
            return Ok(Some(Favicon {
                data:      reader.read_blob(&entry, 0, size)?,
                mime_type: entry.mime_type,
            }));
        }
    }
    Ok(None)
}
