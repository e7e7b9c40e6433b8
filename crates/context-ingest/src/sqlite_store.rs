//! SQLite-backed [`ContextStore`] implementation.
//!
//! Each trait operation maps onto the `records` / `edges` schema created
//! by [`crate::migrate`]. Upserts for the same `record_id` are serialized
//! through a per-record async lock map; distinct records proceed
//! independently. WAL mode keeps readers off the writers' path.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::Context;
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};

use context_ingest_core::error::IngestError;
use context_ingest_core::models::{
    ContentRecord, ExtractedItem, Payload, RelationEdge, RelationKind, SourceKind,
};
use context_ingest_core::store::{ContextStore, RecordFilter, UpsertOutcome, UpsertStatus};

use crate::config::Config;

/// SQLite implementation of the [`ContextStore`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
    record_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            record_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Open the configured database (creating the file and its directory
    /// if needed) in WAL mode and wrap it in a store.
    pub async fn open(config: &Config) -> anyhow::Result<Self> {
        let path = &config.db.path;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating database directory {}", parent.display()))?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .with_context(|| format!("opening database {}", path.display()))?;

        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn lock_for(&self, record_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.record_locks.lock().unwrap();
        locks
            .entry(record_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Drop the lock entry once no task holds a clone, so the map does
    /// not grow with every record id ever written.
    fn evict_lock(&self, record_id: &str) {
        let mut locks = self.record_locks.lock().unwrap();
        if let Some(entry) = locks.get(record_id) {
            if Arc::strong_count(entry) == 1 {
                locks.remove(record_id);
            }
        }
    }

    #[cfg(test)]
    pub fn lock_map_len(&self) -> usize {
        self.record_locks.lock().unwrap().len()
    }

    /// Latest-version records carrying `content_hash` under another id.
    async fn duplicate_peers(
        &self,
        record_id: &str,
        content_hash: &str,
    ) -> Result<Vec<String>, IngestError> {
        let rows = sqlx::query(
            r#"
            SELECT r.record_id FROM records r
            JOIN (SELECT record_id, MAX(version) AS v FROM records GROUP BY record_id) latest
              ON r.record_id = latest.record_id AND r.version = latest.v
            WHERE r.content_hash = ? AND r.record_id != ?
            ORDER BY r.record_id
            "#,
        )
        .bind(content_hash)
        .bind(record_id)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        Ok(rows.iter().map(|r| r.get("record_id")).collect())
    }

    async fn upsert_locked(
        &self,
        item: &ExtractedItem,
        record_id: &str,
        content_hash: &str,
    ) -> Result<UpsertOutcome, IngestError> {
        let latest = sqlx::query(
            "SELECT version, content_hash FROM records WHERE record_id = ? ORDER BY version DESC LIMIT 1",
        )
        .bind(record_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;

        let (status, version) = match latest {
            None => (UpsertStatus::Created, 1),
            Some(row) => {
                let prior_hash: String = row.get("content_hash");
                let prior_version: i64 = row.get("version");
                if prior_hash == content_hash {
                    (UpsertStatus::Unchanged, prior_version)
                } else {
                    (UpsertStatus::Updated, prior_version + 1)
                }
            }
        };

        if status != UpsertStatus::Unchanged {
            let record = item.clone().into_record(version);
            let payload_json = serde_json::to_string(&record.payload)
                .map_err(|e| IngestError::Store(anyhow::Error::new(e)))?;
            let result = sqlx::query(
                r#"
                INSERT INTO records (record_id, version, source_kind, canonical_locator,
                                     content_hash, payload_json, metadata_json, imported_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&record.record_id)
            .bind(record.version)
            .bind(record.source_kind.as_str())
            .bind(&record.canonical_locator)
            .bind(&record.content_hash)
            .bind(&payload_json)
            .bind(record.metadata.to_string())
            .bind(record.imported_at)
            .execute(&self.pool)
            .await;

            if let Err(e) = result {
                let conflict = e
                    .as_database_error()
                    .map(|d| d.is_unique_violation())
                    .unwrap_or(false);
                if conflict {
                    return Err(IngestError::StoreWriteConflict {
                        record_id: record_id.to_string(),
                        reason: format!("version {} already exists", version),
                    });
                }
                return Err(store_err(e));
            }
        }

        let duplicate_of = self.duplicate_peers(record_id, content_hash).await?;
        for peer in &duplicate_of {
            self.add_edge(&RelationEdge {
                from_id: record_id.to_string(),
                to_id: peer.clone(),
                relation: RelationKind::DuplicateOf,
            })
            .await?;
        }

        Ok(UpsertOutcome {
            status,
            record_id: record_id.to_string(),
            version,
            duplicate_of,
        })
    }

    async fn remove_locked(&self, record_id: &str) -> Result<u64, IngestError> {
        let mut tx = self.pool.begin().await.map_err(store_err)?;
        let removed = sqlx::query("DELETE FROM records WHERE record_id = ?")
            .bind(record_id)
            .execute(&mut *tx)
            .await
            .map_err(store_err)?
            .rows_affected();
        sqlx::query("DELETE FROM edges WHERE from_id = ? OR to_id = ?")
            .bind(record_id)
            .bind(record_id)
            .execute(&mut *tx)
            .await
            .map_err(store_err)?;
        tx.commit().await.map_err(store_err)?;

        Ok(removed)
    }
}

fn store_err(e: sqlx::Error) -> IngestError {
    IngestError::Store(anyhow::Error::new(e))
}

fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> Result<ContentRecord, IngestError> {
    let kind_str: String = row.get("source_kind");
    let source_kind: SourceKind = kind_str
        .parse()
        .map_err(|e: String| IngestError::Store(anyhow::anyhow!(e)))?;
    let payload_json: String = row.get("payload_json");
    let payload: Payload = serde_json::from_str(&payload_json)
        .map_err(|e| IngestError::Store(anyhow::anyhow!("corrupt payload: {}", e)))?;
    let metadata_json: String = row.get("metadata_json");
    let metadata = serde_json::from_str(&metadata_json).unwrap_or(serde_json::json!({}));

    Ok(ContentRecord {
        record_id: row.get("record_id"),
        source_kind,
        canonical_locator: row.get("canonical_locator"),
        content_hash: row.get("content_hash"),
        payload,
        metadata,
        imported_at: row.get("imported_at"),
        version: row.get("version"),
    })
}

#[async_trait]
impl ContextStore for SqliteStore {
    async fn upsert(&self, item: &ExtractedItem) -> Result<UpsertOutcome, IngestError> {
        let record_id = item.record_id();
        let content_hash = item.content_hash();

        let lock = self.lock_for(&record_id);
        let result = {
            let _guard = lock.lock().await;
            self.upsert_locked(item, &record_id, &content_hash).await
        };
        drop(lock);
        self.evict_lock(&record_id);
        result
    }

    async fn get(
        &self,
        record_id: &str,
        version: Option<i64>,
    ) -> Result<Option<ContentRecord>, IngestError> {
        let row = match version {
            Some(v) => {
                sqlx::query("SELECT * FROM records WHERE record_id = ? AND version = ?")
                    .bind(record_id)
                    .bind(v)
                    .fetch_optional(&self.pool)
                    .await
            }
            None => {
                sqlx::query(
                    "SELECT * FROM records WHERE record_id = ? ORDER BY version DESC LIMIT 1",
                )
                .bind(record_id)
                .fetch_optional(&self.pool)
                .await
            }
        }
        .map_err(store_err)?;

        row.as_ref().map(row_to_record).transpose()
    }

    async fn query(&self, filter: &RecordFilter) -> Result<Vec<ContentRecord>, IngestError> {
        let base = if filter.latest_only {
            r#"
            SELECT r.* FROM records r
            JOIN (SELECT record_id, MAX(version) AS v FROM records GROUP BY record_id) latest
              ON r.record_id = latest.record_id AND r.version = latest.v
            "#
        } else {
            "SELECT r.* FROM records r"
        };

        let mut sql = String::from(base);
        sql.push_str(" WHERE 1=1");
        if filter.source_kind.is_some() {
            sql.push_str(" AND r.source_kind = ?");
        }
        if filter.locator_prefix.is_some() {
            sql.push_str(" AND r.canonical_locator LIKE ? ESCAPE '\\'");
        }
        if filter.since.is_some() {
            sql.push_str(" AND r.imported_at >= ?");
        }
        if filter.until.is_some() {
            sql.push_str(" AND r.imported_at <= ?");
        }
        sql.push_str(" ORDER BY r.imported_at ASC, r.record_id ASC, r.version ASC");

        let mut query = sqlx::query(&sql);
        if let Some(kind) = filter.source_kind {
            query = query.bind(kind.as_str().to_string());
        }
        if let Some(prefix) = &filter.locator_prefix {
            query = query.bind(format!("{}%", escape_like(prefix)));
        }
        if let Some(since) = filter.since {
            query = query.bind(since);
        }
        if let Some(until) = filter.until {
            query = query.bind(until);
        }

        let rows = query.fetch_all(&self.pool).await.map_err(store_err)?;
        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            let record = row_to_record(row)?;
            // Metadata predicates are applied in process; payloads stay
            // opaque to SQL.
            if let Some((key, expected)) = &filter.metadata {
                if record.metadata.get(key) != Some(expected) {
                    continue;
                }
            }
            records.push(record);
        }
        Ok(records)
    }

    async fn add_edge(&self, edge: &RelationEdge) -> Result<bool, IngestError> {
        if edge.relation == RelationKind::DerivedFrom {
            let reverse: Option<i64> = sqlx::query_scalar(
                "SELECT 1 FROM edges WHERE from_id = ? AND to_id = ? AND relation = 'derived_from'",
            )
            .bind(&edge.to_id)
            .bind(&edge.from_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(store_err)?;
            if reverse.is_some() {
                return Err(IngestError::InvalidEdge(format!(
                    "mutual derived_from between {} and {}",
                    edge.from_id, edge.to_id
                )));
            }
        }

        let result = sqlx::query(
            "INSERT OR IGNORE INTO edges (from_id, to_id, relation) VALUES (?, ?, ?)",
        )
        .bind(&edge.from_id)
        .bind(&edge.to_id)
        .bind(edge.relation.as_str())
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        Ok(result.rows_affected() > 0)
    }

    async fn edges_for(&self, record_id: &str) -> Result<Vec<RelationEdge>, IngestError> {
        let rows = sqlx::query(
            "SELECT from_id, to_id, relation FROM edges WHERE from_id = ? OR to_id = ?",
        )
        .bind(record_id)
        .bind(record_id)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        let mut edges = Vec::with_capacity(rows.len());
        for row in &rows {
            let relation_str: String = row.get("relation");
            let relation: RelationKind = relation_str
                .parse()
                .map_err(|e: String| IngestError::Store(anyhow::anyhow!(e)))?;
            edges.push(RelationEdge {
                from_id: row.get("from_id"),
                to_id: row.get("to_id"),
                relation,
            });
        }
        Ok(edges)
    }

    async fn remove(&self, record_id: &str) -> Result<u64, IngestError> {
        let lock = self.lock_for(record_id);
        let result = {
            let _guard = lock.lock().await;
            self.remove_locked(record_id).await
        };
        drop(lock);
        self.evict_lock(record_id);
        result
    }
}

fn escape_like(prefix: &str) -> String {
    prefix
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn like_escaping_covers_wildcards() {
        assert_eq!(escape_like("a%b_c"), "a\\%b\\_c");
        assert_eq!(escape_like("plain/prefix"), "plain/prefix");
    }

    #[tokio::test]
    async fn record_locks_are_evicted_after_use() {
        let dir = tempfile::tempdir().unwrap();
        let options = SqliteConnectOptions::new()
            .filename(dir.path().join("locks.db"))
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .connect_with(options)
            .await
            .unwrap();
        crate::migrate::apply_schema(&pool).await.unwrap();
        let store = SqliteStore::new(pool);

        for i in 0..8 {
            let item = ExtractedItem::new(
                SourceKind::Vault,
                format!("/vault/note-{i}.md"),
                Payload::Text {
                    body: format!("body {i}"),
                },
            );
            store.upsert(&item).await.unwrap();
        }
        assert_eq!(store.lock_map_len(), 0);

        let item = ExtractedItem::new(
            SourceKind::Vault,
            "/vault/gone.md",
            Payload::Text {
                body: "gone".into(),
            },
        );
        let outcome = store.upsert(&item).await.unwrap();
        store.remove(&outcome.record_id).await.unwrap();
        assert_eq!(store.lock_map_len(), 0);
    }
}
