//! Core data models used throughout the ingestion engine.
//!
//! These types represent the normalized content records, payloads, and
//! relation edges that flow from importer adapters into the context store.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// The closed set of content sources the engine understands.
///
/// Adapter dispatch is keyed on this enum — one importer per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Repository,
    Web,
    Image,
    Video,
    Audio,
    Vault,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Repository => "repository",
            SourceKind::Web => "web",
            SourceKind::Image => "image",
            SourceKind::Video => "video",
            SourceKind::Audio => "audio",
            SourceKind::Vault => "vault",
        }
    }

    /// All kinds, in registry display order.
    pub fn all() -> [SourceKind; 6] {
        [
            SourceKind::Repository,
            SourceKind::Web,
            SourceKind::Image,
            SourceKind::Video,
            SourceKind::Audio,
            SourceKind::Vault,
        ]
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "repository" => Ok(SourceKind::Repository),
            "web" => Ok(SourceKind::Web),
            "image" => Ok(SourceKind::Image),
            "video" => Ok(SourceKind::Video),
            "audio" => Ok(SourceKind::Audio),
            "vault" => Ok(SourceKind::Vault),
            other => Err(format!(
                "unknown source kind '{}' (expected repository, web, image, video, audio, or vault)",
                other
            )),
        }
    }
}

/// Extracted content carried by a record. Opaque to the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Payload {
    /// Normalized text content (source files, notes, fetched pages).
    Text { body: String },
    /// Reference to binary content left in place (media files). The
    /// adapter hashes the bytes so the store can detect changes without
    /// holding them.
    Binary {
        reference: String,
        size: u64,
        sha256: String,
    },
    /// Structured metadata-only content.
    Structured { value: serde_json::Value },
}

/// Typed relation between two content records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    DerivedFrom,
    DuplicateOf,
    PartOf,
}

impl RelationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationKind::DerivedFrom => "derived_from",
            RelationKind::DuplicateOf => "duplicate_of",
            RelationKind::PartOf => "part_of",
        }
    }
}

impl FromStr for RelationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "derived_from" => Ok(RelationKind::DerivedFrom),
            "duplicate_of" => Ok(RelationKind::DuplicateOf),
            "part_of" => Ok(RelationKind::PartOf),
            other => Err(format!("unknown relation kind '{}'", other)),
        }
    }
}

/// Directed edge in the context graph.
///
/// Edges are non-unique across relation types: the same pair of records
/// may be connected by several edges of different kinds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationEdge {
    pub from_id: String,
    pub to_id: String,
    pub relation: RelationKind,
}

/// Normalized content record — the atomic unit the store persists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentRecord {
    /// Stable identity derived from `(source_kind, canonical_locator)`.
    pub record_id: String,
    pub source_kind: SourceKind,
    pub canonical_locator: String,
    /// Hash of the extracted payload; drives change detection.
    pub content_hash: String,
    pub payload: Payload,
    pub metadata: serde_json::Value,
    /// Unix seconds of the extraction that produced this version.
    pub imported_at: i64,
    /// Strictly increasing per `record_id`; bumped only when
    /// `content_hash` changes.
    pub version: i64,
}

/// Link emitted by an adapter alongside an item, pointing at another
/// locator of the same source kind (e.g. a vault note's wikilink target).
/// The coordinator resolves links to graph edges after the stream ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemLink {
    pub relation: RelationKind,
    pub locator: String,
}

/// Raw item produced by an importer adapter before versioning.
///
/// The store derives the record id and assigns the version; adapters only
/// describe what they extracted.
#[derive(Debug, Clone)]
pub struct ExtractedItem {
    pub source_kind: SourceKind,
    pub canonical_locator: String,
    pub payload: Payload,
    pub metadata: serde_json::Value,
    pub extracted_at: DateTime<Utc>,
    pub links: Vec<ItemLink>,
}

impl ExtractedItem {
    pub fn new(kind: SourceKind, locator: impl Into<String>, payload: Payload) -> Self {
        Self {
            source_kind: kind,
            canonical_locator: locator.into(),
            payload,
            metadata: serde_json::json!({}),
            extracted_at: Utc::now(),
            links: Vec::new(),
        }
    }

    /// Identity of the record this item maps to.
    pub fn record_id(&self) -> String {
        record_id(self.source_kind, &self.canonical_locator)
    }

    /// Hash of the payload, used by the store for change detection and
    /// cross-kind duplicate detection.
    ///
    /// Binary payloads reuse the file hash the adapter computed; text and
    /// structured payloads are hashed here so every adapter hashes the
    /// same way.
    pub fn content_hash(&self) -> String {
        match &self.payload {
            Payload::Text { body } => {
                let mut hasher = Sha256::new();
                hasher.update(body.as_bytes());
                format!("{:x}", hasher.finalize())
            }
            Payload::Binary { sha256, .. } => sha256.clone(),
            Payload::Structured { value } => {
                let mut hasher = Sha256::new();
                hasher.update(value.to_string().as_bytes());
                format!("{:x}", hasher.finalize())
            }
        }
    }

    /// Freeze this item into a versioned record.
    pub fn into_record(self, version: i64) -> ContentRecord {
        let record_id = self.record_id();
        let content_hash = self.content_hash();
        ContentRecord {
            record_id,
            source_kind: self.source_kind,
            canonical_locator: self.canonical_locator,
            content_hash,
            payload: self.payload,
            metadata: self.metadata,
            imported_at: self.extracted_at.timestamp(),
            version,
        }
    }
}

/// Derive the stable record identity for a canonical locator.
///
/// Two imports of the same `(kind, locator)` pair always produce the same
/// id, in and across processes.
pub fn record_id(kind: SourceKind, canonical_locator: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(kind.as_str().as_bytes());
    hasher.update(b"\n");
    hasher.update(canonical_locator.as_bytes());
    format!("{:x}", hasher.finalize())
}
