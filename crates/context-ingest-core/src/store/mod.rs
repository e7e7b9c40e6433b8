//! Storage abstraction for the context store.
//!
//! The [`ContextStore`] trait is the authoritative persistence and
//! conflict-resolution surface for content records and the relation
//! graph. All mutation funnels through [`ContextStore::upsert`], which is
//! the single place the version invariant is enforced.
//!
//! Implementations must be `Send + Sync` and must serialize upserts per
//! `record_id` (writes for distinct records proceed independently).

pub mod memory;

pub use memory::MemoryStore;

use std::collections::HashSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::IngestError;
use crate::models::{ContentRecord, ExtractedItem, RelationEdge, RelationKind, SourceKind};

/// What an upsert did to the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpsertStatus {
    /// First import of this locator; stored at version 1.
    Created,
    /// Payload hash changed; stored as a new version.
    Updated,
    /// Identical payload hash; nothing written.
    Unchanged,
}

/// Result of a single [`ContextStore::upsert`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpsertOutcome {
    pub status: UpsertStatus,
    pub record_id: String,
    /// The version now current for this record.
    pub version: i64,
    /// Record ids of other records whose latest version carries the same
    /// content hash. Identity stays locator-derived — the store links
    /// duplicates with `duplicate_of` edges instead of merging them.
    pub duplicate_of: Vec<String>,
}

/// Filter for [`ContextStore::query`].
///
/// Results are ordered by `imported_at` ascending. With `latest_only`
/// set, exactly one record (the highest version) is returned per
/// `record_id`.
#[derive(Debug, Clone, Default)]
pub struct RecordFilter {
    pub source_kind: Option<SourceKind>,
    pub locator_prefix: Option<String>,
    /// Equality predicate on a top-level metadata key.
    pub metadata: Option<(String, serde_json::Value)>,
    /// Inclusive `imported_at` lower bound, unix seconds.
    pub since: Option<i64>,
    /// Inclusive `imported_at` upper bound, unix seconds.
    pub until: Option<i64>,
    pub latest_only: bool,
}

impl RecordFilter {
    /// Whether a record passes everything except the latest-only collapse.
    pub fn matches(&self, record: &ContentRecord) -> bool {
        if let Some(kind) = self.source_kind {
            if record.source_kind != kind {
                return false;
            }
        }
        if let Some(prefix) = &self.locator_prefix {
            if !record.canonical_locator.starts_with(prefix.as_str()) {
                return false;
            }
        }
        if let Some((key, expected)) = &self.metadata {
            if record.metadata.get(key) != Some(expected) {
                return false;
            }
        }
        if let Some(since) = self.since {
            if record.imported_at < since {
                return false;
            }
        }
        if let Some(until) = self.until {
            if record.imported_at > until {
                return false;
            }
        }
        true
    }
}

/// Authoritative persistence for content records and graph edges.
///
/// # Concurrency discipline
///
/// `upsert` for a given `record_id` is serialized so the monotonic
/// version invariant holds; readers never block writers and observe
/// either the pre- or post-upsert state.
#[async_trait]
pub trait ContextStore: Send + Sync {
    /// The sole write path for records.
    ///
    /// Absent record id → insert at version 1 (`Created`). Present with a
    /// differing content hash → insert the next version (`Updated`).
    /// Present with an identical hash → no-op (`Unchanged`).
    ///
    /// When the written hash matches the latest version of records under
    /// other ids, a `duplicate_of` edge is created from this record to
    /// each of them and the outcome reports the peers.
    async fn upsert(&self, item: &ExtractedItem) -> Result<UpsertOutcome, IngestError>;

    /// Fetch one record. `version: None` returns the latest.
    async fn get(
        &self,
        record_id: &str,
        version: Option<i64>,
    ) -> Result<Option<ContentRecord>, IngestError>;

    /// Query records; see [`RecordFilter`] for semantics.
    async fn query(&self, filter: &RecordFilter) -> Result<Vec<ContentRecord>, IngestError>;

    /// Add a graph edge. Returns `false` if the identical edge already
    /// exists. Rejects a `derived_from` edge whose reverse already exists
    /// with [`IngestError::InvalidEdge`].
    async fn add_edge(&self, edge: &RelationEdge) -> Result<bool, IngestError>;

    /// All edges touching a record, in either direction.
    async fn edges_for(&self, record_id: &str) -> Result<Vec<RelationEdge>, IngestError>;

    /// Administrative removal: deletes every version of the record and
    /// severs all edges referencing it. Returns the number of versions
    /// removed. Normal operation never deletes records.
    async fn remove(&self, record_id: &str) -> Result<u64, IngestError>;

    /// Record ids reachable from `record_id` by following outgoing edges,
    /// optionally restricted to one relation kind.
    ///
    /// The graph may contain cycles (`part_of` chains across vault notes
    /// are allowed to loop); a visited set keeps the walk finite.
    async fn related(
        &self,
        record_id: &str,
        relation: Option<RelationKind>,
    ) -> Result<Vec<String>, IngestError> {
        // Nodes are marked visited when enqueued, so a record reachable
        // by several paths is reported once.
        let mut visited: HashSet<String> = HashSet::new();
        visited.insert(record_id.to_string());
        let mut frontier = vec![record_id.to_string()];
        let mut reachable = Vec::new();
        while let Some(current) = frontier.pop() {
            for edge in self.edges_for(&current).await? {
                if edge.from_id != current {
                    continue;
                }
                if let Some(kind) = relation {
                    if edge.relation != kind {
                        continue;
                    }
                }
                if visited.insert(edge.to_id.clone()) {
                    reachable.push(edge.to_id.clone());
                    frontier.push(edge.to_id);
                }
            }
        }
        Ok(reachable)
    }
}

/// Guard shared by store implementations: a `derived_from` edge may not
/// coexist with its mirror image.
pub fn mutual_derived_from(edge: &RelationEdge, existing: &[RelationEdge]) -> bool {
    edge.relation == RelationKind::DerivedFrom
        && existing.iter().any(|e| {
            e.relation == RelationKind::DerivedFrom
                && e.from_id == edge.to_id
                && e.to_id == edge.from_id
        })
}
