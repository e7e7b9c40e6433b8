use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::sqlite_store::SqliteStore;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let store = SqliteStore::open(config).await?;
    apply_schema(store.pool()).await?;
    store.pool().close().await;
    Ok(())
}

/// Create the records and edges tables. Idempotent.
pub async fn apply_schema(pool: &SqlitePool) -> Result<()> {
    // Content records, one row per (record_id, version)
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS records (
            record_id TEXT NOT NULL,
            version INTEGER NOT NULL,
            source_kind TEXT NOT NULL,
            canonical_locator TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            payload_json TEXT NOT NULL,
            metadata_json TEXT NOT NULL DEFAULT '{}',
            imported_at INTEGER NOT NULL,
            PRIMARY KEY (record_id, version)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Relation edges: directed, unique per (from, to, relation)
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS edges (
            from_id TEXT NOT NULL,
            to_id TEXT NOT NULL,
            relation TEXT NOT NULL,
            PRIMARY KEY (from_id, to_id, relation)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_records_content_hash ON records(content_hash)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_records_source_kind ON records(source_kind)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_records_imported_at ON records(imported_at)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_edges_to_id ON edges(to_id)")
        .execute(pool)
        .await?;

    Ok(())
}
