//! The importer adapter contract.
//!
//! One adapter per [`SourceKind`]. An adapter turns a source reference
//! into a finite stream of [`ExtractedItem`]s over a bounded channel:
//! the coordinator consumes one item before the adapter may produce the
//! next, so memory stays bounded regardless of source size.
//!
//! Failure contract: a whole-source failure (unreachable repository,
//! missing vault path) fails the `extract` call itself with
//! [`IngestError::SourceUnavailable`]; a single bad item flows through
//! the stream as an [`ItemError`] and extraction continues. Streams are
//! restartable only by calling `extract` again — there is no mid-stream
//! resume. Duplicate content is never an adapter concern; the store
//! resolves it.

use async_trait::async_trait;
use globset::{Glob, GlobSet, GlobSetBuilder};
use tokio::sync::mpsc;

use context_ingest_core::error::{IngestError, ItemError};
use context_ingest_core::models::{ExtractedItem, SourceKind};

use crate::options::ImportOptions;

/// One record in flight at a time.
pub const STREAM_CAPACITY: usize = 1;

pub type ItemResult = Result<ExtractedItem, ItemError>;
pub type ItemStream = mpsc::Receiver<ItemResult>;
pub type ItemSender = mpsc::Sender<ItemResult>;

/// A single import request as seen by an adapter.
#[derive(Debug, Clone)]
pub struct ExtractRequest {
    /// Source-kind-specific reference: repo URL or path, page URL,
    /// vault directory, media file or directory.
    pub reference: String,
    /// Options already validated for this adapter's kind.
    pub options: ImportOptions,
}

#[async_trait]
pub trait Importer: Send + Sync {
    fn source_kind(&self) -> SourceKind;

    /// One-line description shown by `cingest importers`.
    fn description(&self) -> &str;

    /// Begin extraction. Returns the receiving end of the item stream;
    /// production happens on a spawned task. May suspend on I/O without
    /// blocking other jobs.
    async fn extract(&self, request: &ExtractRequest) -> Result<ItemStream, IngestError>;
}

impl std::fmt::Debug for dyn Importer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Importer")
            .field("source_kind", &self.source_kind())
            .field("description", &self.description())
            .finish()
    }
}

pub fn channel() -> (ItemSender, ItemStream) {
    mpsc::channel(STREAM_CAPACITY)
}

/// Directory names skipped by every file-walking adapter.
pub const DEFAULT_IGNORE_PARTS: &[&str] = &[
    ".git",
    ".hg",
    ".svn",
    "target",
    "node_modules",
    "__pycache__",
    ".idea",
    ".tox",
    ".pytest_cache",
    ".mypy_cache",
    ".ipynb_checkpoints",
];

pub fn build_globset(patterns: &[String]) -> Result<GlobSet, IngestError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .map_err(|e| IngestError::InvalidOptions(format!("bad glob '{}': {}", pattern, e)))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| IngestError::InvalidOptions(e.to_string()))
}

/// Whether any path component is on the default ignore list.
pub fn is_ignored_path(relative: &std::path::Path) -> bool {
    relative.components().any(|c| {
        let name = c.as_os_str().to_string_lossy();
        DEFAULT_IGNORE_PARTS.iter().any(|part| name == *part)
    })
}
