//! Extraction boundary: pulling raw records out of the listing.
//!
//! The mechanics of rendering and scraping the listing live outside this
//! crate. What it sees is an [`Extractor`] that hands back one page of raw
//! records per call, plus a cursor for the next page.

use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::config::ExtractionConfig;
use crate::model::{ResourceRecord, format_version, resource_id_from_url};

/// Unrecoverable failure from the extraction collaborator. Aborts the job.
#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    #[error("fetch failed: {0}")]
    Fetch(String),

    #[error("timed out after {secs}s loading {what}")]
    Timeout { what: String, secs: u64 },

    #[error("failed to read feed {path}: {source}")]
    Feed {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid feed {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("no feed configured; set extraction.feed in config.toml")]
    NoFeed,
}

/// Position in the listing. Starts at page zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Cursor(u64);

impl Cursor {
    pub fn start() -> Self {
        Self(0)
    }

    pub fn page(self) -> u64 {
        self.0
    }

    #[must_use]
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

/// One page of results.
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub records: Vec<RawRecord>,

    /// Where to continue, or `None` when the listing is exhausted.
    pub next: Option<Cursor>,

    /// Total number of records in the listing, when the source reports it.
    pub total: Option<u64>,
}

/// A record as the scraper produced it, before normalization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawRecord {
    pub resource_id: Option<String>,
    pub url: String,
    pub title: Option<String>,
    pub developer_id: Option<String>,
    pub version: Option<String>,
    pub updated_date: Option<String>,
    pub tagline: Option<String>,
    pub contributor: Option<String>,
}

impl RawRecord {
    /// Normalize into a resource record: trim fields, derive the resource
    /// id from the URL when absent, and put the version in dotted form.
    pub fn into_record(self) -> ResourceRecord {
        let clean = |s: Option<String>| {
            s.map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        };
        let url = self.url.trim().to_string();
        let resource_id = clean(self.resource_id).or_else(|| resource_id_from_url(&url));

        ResourceRecord {
            resource_id,
            title: clean(self.title),
            version: clean(self.version).map(|v| format_version(&v)),
            updated_date: clean(self.updated_date),
            developer_id: clean(self.developer_id),
            contributor: clean(self.contributor),
            tagline: clean(self.tagline),
            url,
        }
    }
}

/// The external page-extraction collaborator.
pub trait Extractor {
    /// Fetch the page at `cursor`.
    fn extract_page(&mut self, cursor: Cursor) -> Result<Page, ExtractionError>;
}

/// Serves pages from a JSON array of raw records on disk.
///
/// The file is read on the first request so a missing feed fails the job,
/// not the daemon.
pub struct FeedExtractor {
    path: PathBuf,
    page_size: usize,
    records: Option<Vec<RawRecord>>,
}

impl FeedExtractor {
    pub fn new(path: impl Into<PathBuf>, page_size: usize) -> Self {
        Self {
            path: path.into(),
            page_size: page_size.max(1),
            records: None,
        }
    }

    /// The feed named by the extraction settings.
    pub fn from_config(config: &ExtractionConfig) -> Result<Self, ExtractionError> {
        let path = config.feed.as_deref().ok_or(ExtractionError::NoFeed)?;
        Ok(Self::new(path, config.page_size))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&mut self) -> Result<&[RawRecord], ExtractionError> {
        if self.records.is_none() {
            let json = fs::read_to_string(&self.path).map_err(|source| ExtractionError::Feed {
                path: self.path.clone(),
                source,
            })?;
            let records: Vec<RawRecord> =
                serde_json::from_str(&json).map_err(|source| ExtractionError::Parse {
                    path: self.path.clone(),
                    source,
                })?;
            self.records = Some(records);
        }
        Ok(self.records.as_deref().unwrap_or_default())
    }
}

impl Extractor for FeedExtractor {
    fn extract_page(&mut self, cursor: Cursor) -> Result<Page, ExtractionError> {
        let page_size = self.page_size;
        let records = self.load()?;
        let total = records.len();

        let start = usize::try_from(cursor.page())
            .unwrap_or(usize::MAX)
            .saturating_mul(page_size)
            .min(total);
        let end = start.saturating_add(page_size).min(total);

        Ok(Page {
            records: records[start..end].to_vec(),
            next: (end < total).then(|| cursor.next()),
            total: Some(total as u64),
        })
    }
}
