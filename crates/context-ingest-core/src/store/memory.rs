//! In-memory [`ContextStore`] implementation.
//!
//! Backs unit and coordinator tests. A single `RwLock` over the record
//! map serializes all upserts, which trivially satisfies the
//! per-`record_id` write discipline; readers share the lock and never
//! observe a partially written record.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::IngestError;
use crate::models::{ContentRecord, ExtractedItem, RelationEdge, RelationKind};

use super::{mutual_derived_from, ContextStore, RecordFilter, UpsertOutcome, UpsertStatus};

/// In-memory store for tests and ephemeral runs.
pub struct MemoryStore {
    /// Versions per record id, ascending.
    records: RwLock<HashMap<String, Vec<ContentRecord>>>,
    edges: RwLock<Vec<RelationEdge>>,
    /// Latest-version content hash → record ids carrying it.
    hash_index: RwLock<HashMap<String, HashSet<String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            edges: RwLock::new(Vec::new()),
            hash_index: RwLock::new(HashMap::new()),
        }
    }

    fn reindex_hash(&self, record_id: &str, old_hash: Option<&str>, new_hash: &str) {
        let mut index = self.hash_index.write().unwrap();
        if let Some(old) = old_hash {
            if let Some(ids) = index.get_mut(old) {
                ids.remove(record_id);
                if ids.is_empty() {
                    index.remove(old);
                }
            }
        }
        index
            .entry(new_hash.to_string())
            .or_default()
            .insert(record_id.to_string());
    }

    fn duplicate_peers(&self, record_id: &str, content_hash: &str) -> Vec<String> {
        let index = self.hash_index.read().unwrap();
        let mut peers: Vec<String> = index
            .get(content_hash)
            .map(|ids| ids.iter().filter(|id| *id != record_id).cloned().collect())
            .unwrap_or_default();
        peers.sort();
        peers
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContextStore for MemoryStore {
    async fn upsert(&self, item: &ExtractedItem) -> Result<UpsertOutcome, IngestError> {
        let record_id = item.record_id();
        let content_hash = item.content_hash();

        let (status, version, old_hash) = {
            let mut records = self.records.write().unwrap();
            let versions = records.entry(record_id.clone()).or_default();
            match versions.last() {
                None => {
                    versions.push(item.clone().into_record(1));
                    (UpsertStatus::Created, 1, None)
                }
                Some(latest) if latest.content_hash == content_hash => {
                    (UpsertStatus::Unchanged, latest.version, None)
                }
                Some(latest) => {
                    let next = latest.version + 1;
                    let old = latest.content_hash.clone();
                    versions.push(item.clone().into_record(next));
                    (UpsertStatus::Updated, next, Some(old))
                }
            }
        };

        if status != UpsertStatus::Unchanged {
            self.reindex_hash(&record_id, old_hash.as_deref(), &content_hash);
        }

        let duplicate_of = self.duplicate_peers(&record_id, &content_hash);
        for peer in &duplicate_of {
            let edge = RelationEdge {
                from_id: record_id.clone(),
                to_id: peer.clone(),
                relation: RelationKind::DuplicateOf,
            };
            self.add_edge(&edge).await?;
        }

        Ok(UpsertOutcome {
            status,
            record_id,
            version,
            duplicate_of,
        })
    }

    async fn get(
        &self,
        record_id: &str,
        version: Option<i64>,
    ) -> Result<Option<ContentRecord>, IngestError> {
        let records = self.records.read().unwrap();
        let versions = match records.get(record_id) {
            Some(v) if !v.is_empty() => v,
            _ => return Ok(None),
        };
        let found = match version {
            None => versions.last(),
            Some(v) => versions.iter().find(|r| r.version == v),
        };
        Ok(found.cloned())
    }

    async fn query(&self, filter: &RecordFilter) -> Result<Vec<ContentRecord>, IngestError> {
        let records = self.records.read().unwrap();
        let mut out: Vec<ContentRecord> = Vec::new();
        for versions in records.values() {
            if filter.latest_only {
                if let Some(latest) = versions.last() {
                    if filter.matches(latest) {
                        out.push(latest.clone());
                    }
                }
            } else {
                out.extend(versions.iter().filter(|r| filter.matches(r)).cloned());
            }
        }
        out.sort_by(|a, b| {
            a.imported_at
                .cmp(&b.imported_at)
                .then_with(|| a.record_id.cmp(&b.record_id))
                .then_with(|| a.version.cmp(&b.version))
        });
        Ok(out)
    }

    async fn add_edge(&self, edge: &RelationEdge) -> Result<bool, IngestError> {
        let mut edges = self.edges.write().unwrap();
        if edges.contains(edge) {
            return Ok(false);
        }
        if mutual_derived_from(edge, &edges) {
            return Err(IngestError::InvalidEdge(format!(
                "mutual derived_from between {} and {}",
                edge.from_id, edge.to_id
            )));
        }
        edges.push(edge.clone());
        Ok(true)
    }

    async fn edges_for(&self, record_id: &str) -> Result<Vec<RelationEdge>, IngestError> {
        let edges = self.edges.read().unwrap();
        Ok(edges
            .iter()
            .filter(|e| e.from_id == record_id || e.to_id == record_id)
            .cloned()
            .collect())
    }

    async fn remove(&self, record_id: &str) -> Result<u64, IngestError> {
        let removed = {
            let mut records = self.records.write().unwrap();
            match records.remove(record_id) {
                Some(versions) => {
                    if let Some(latest) = versions.last() {
                        let mut index = self.hash_index.write().unwrap();
                        if let Some(ids) = index.get_mut(&latest.content_hash) {
                            ids.remove(record_id);
                            if ids.is_empty() {
                                index.remove(&latest.content_hash);
                            }
                        }
                    }
                    versions.len() as u64
                }
                None => 0,
            }
        };
        let mut edges = self.edges.write().unwrap();
        edges.retain(|e| e.from_id != record_id && e.to_id != record_id);
        Ok(removed)
    }
}
