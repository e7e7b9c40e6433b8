//! SQLite store behavior against a real database file, including
//! persistence of identities and versions across reopen.

use std::path::Path;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use tempfile::TempDir;

use context_ingest::core::models::{
    record_id, ExtractedItem, Payload, RelationEdge, RelationKind, SourceKind,
};
use context_ingest::core::store::{ContextStore, RecordFilter, UpsertStatus};
use context_ingest::migrate;
use context_ingest::sqlite_store::SqliteStore;

async fn open_pool(path: &Path) -> SqlitePool {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal);
    SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .unwrap()
}

async fn fresh_store(tmp: &TempDir) -> SqliteStore {
    let pool = open_pool(&tmp.path().join("store.sqlite")).await;
    migrate::apply_schema(&pool).await.unwrap();
    SqliteStore::new(pool)
}

fn text(kind: SourceKind, locator: &str, body: &str) -> ExtractedItem {
    ExtractedItem::new(
        kind,
        locator,
        Payload::Text {
            body: body.to_string(),
        },
    )
}

#[tokio::test]
async fn upsert_creates_updates_and_skips() {
    let tmp = TempDir::new().unwrap();
    let store = fresh_store(&tmp).await;

    let first = store
        .upsert(&text(SourceKind::Web, "https://e.com/a", "alpha"))
        .await
        .unwrap();
    assert_eq!(first.status, UpsertStatus::Created);
    assert_eq!(first.version, 1);

    let unchanged = store
        .upsert(&text(SourceKind::Web, "https://e.com/a", "alpha"))
        .await
        .unwrap();
    assert_eq!(unchanged.status, UpsertStatus::Unchanged);
    assert_eq!(unchanged.version, 1);

    let updated = store
        .upsert(&text(SourceKind::Web, "https://e.com/a", "alpha v2"))
        .await
        .unwrap();
    assert_eq!(updated.status, UpsertStatus::Updated);
    assert_eq!(updated.version, 2);

    // Both versions stay retrievable; None selects the latest.
    let latest = store.get(&first.record_id, None).await.unwrap().unwrap();
    assert_eq!(latest.version, 2);
    let original = store.get(&first.record_id, Some(1)).await.unwrap().unwrap();
    match original.payload {
        Payload::Text { body } => assert_eq!(body, "alpha"),
        other => panic!("unexpected payload: {:?}", other),
    }
}

#[tokio::test]
async fn identity_and_versions_survive_reopen() {
    let tmp = TempDir::new().unwrap();
    let db_path = tmp.path().join("store.sqlite");

    {
        let pool = open_pool(&db_path).await;
        migrate::apply_schema(&pool).await.unwrap();
        let store = SqliteStore::new(pool);
        let outcome = store
            .upsert(&text(SourceKind::Vault, "/notes/a.md", "first body"))
            .await
            .unwrap();
        assert_eq!(outcome.status, UpsertStatus::Created);
        store.pool().close().await;
    }

    let pool = open_pool(&db_path).await;
    let store = SqliteStore::new(pool);

    // Same locator in a new process: same identity, no new version.
    let outcome = store
        .upsert(&text(SourceKind::Vault, "/notes/a.md", "first body"))
        .await
        .unwrap();
    assert_eq!(outcome.status, UpsertStatus::Unchanged);
    assert_eq!(
        outcome.record_id,
        record_id(SourceKind::Vault, "/notes/a.md")
    );

    let changed = store
        .upsert(&text(SourceKind::Vault, "/notes/a.md", "second body"))
        .await
        .unwrap();
    assert_eq!(changed.status, UpsertStatus::Updated);
    assert_eq!(changed.version, 2);
}

#[tokio::test]
async fn identical_payloads_across_kinds_link_as_duplicates() {
    let tmp = TempDir::new().unwrap();
    let store = fresh_store(&tmp).await;

    let web = store
        .upsert(&text(SourceKind::Web, "https://e.com/post", "same words"))
        .await
        .unwrap();
    assert!(web.duplicate_of.is_empty());

    let vault = store
        .upsert(&text(SourceKind::Vault, "/notes/post.md", "same words"))
        .await
        .unwrap();
    assert_eq!(vault.duplicate_of, vec![web.record_id.clone()]);

    let edges = store.edges_for(&vault.record_id).await.unwrap();
    assert!(edges.iter().any(|e| {
        e.relation == RelationKind::DuplicateOf
            && e.from_id == vault.record_id
            && e.to_id == web.record_id
    }));

    // Diverging the copy clears the duplicate relation for new versions.
    let diverged = store
        .upsert(&text(SourceKind::Vault, "/notes/post.md", "now different"))
        .await
        .unwrap();
    assert!(diverged.duplicate_of.is_empty());
}

#[tokio::test]
async fn mutual_derived_from_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let store = fresh_store(&tmp).await;

    let a = store
        .upsert(&text(SourceKind::Web, "https://e.com/a", "a"))
        .await
        .unwrap();
    let b = store
        .upsert(&text(SourceKind::Web, "https://e.com/b", "b"))
        .await
        .unwrap();

    let forward = RelationEdge {
        from_id: a.record_id.clone(),
        to_id: b.record_id.clone(),
        relation: RelationKind::DerivedFrom,
    };
    assert!(store.add_edge(&forward).await.unwrap());

    // Same edge again is a no-op, not an error.
    assert!(!store.add_edge(&forward).await.unwrap());

    let reverse = RelationEdge {
        from_id: b.record_id.clone(),
        to_id: a.record_id.clone(),
        relation: RelationKind::DerivedFrom,
    };
    assert!(store.add_edge(&reverse).await.is_err());
}

#[tokio::test]
async fn query_filters_and_latest_only() {
    let tmp = TempDir::new().unwrap();
    let store = fresh_store(&tmp).await;

    store
        .upsert(&text(SourceKind::Web, "https://e.com/a", "one"))
        .await
        .unwrap();
    store
        .upsert(&text(SourceKind::Web, "https://e.com/a", "two"))
        .await
        .unwrap();
    store
        .upsert(&text(SourceKind::Vault, "/notes/x.md", "three"))
        .await
        .unwrap();

    let all = store.query(&RecordFilter::default()).await.unwrap();
    assert_eq!(all.len(), 3);

    let latest = store
        .query(&RecordFilter {
            latest_only: true,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(latest.len(), 2);
    assert!(latest
        .iter()
        .all(|r| r.source_kind != SourceKind::Web || r.version == 2));

    let web_only = store
        .query(&RecordFilter {
            source_kind: Some(SourceKind::Web),
            latest_only: true,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(web_only.len(), 1);

    let by_prefix = store
        .query(&RecordFilter {
            locator_prefix: Some("/notes/".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(by_prefix.len(), 1);
    assert_eq!(by_prefix[0].canonical_locator, "/notes/x.md");
}

#[tokio::test]
async fn web_page_lifecycle_with_vault_duplicate() {
    let tmp = TempDir::new().unwrap();
    let store = fresh_store(&tmp).await;
    let url = "https://example.com/a";

    let first = store
        .upsert(&text(SourceKind::Web, url, "original page body"))
        .await
        .unwrap();
    assert_eq!(first.status, UpsertStatus::Created);

    let second = store
        .upsert(&text(SourceKind::Web, url, "original page body"))
        .await
        .unwrap();
    assert_eq!(second.status, UpsertStatus::Unchanged);
    assert_eq!(second.version, 1);

    let third = store
        .upsert(&text(SourceKind::Web, url, "rewritten page body"))
        .await
        .unwrap();
    assert_eq!(third.status, UpsertStatus::Updated);
    assert_eq!(third.version, 2);

    // A vault note whose body matches the page's current content gets its
    // own record plus a duplicate_of edge to the web record.
    let note = store
        .upsert(&text(SourceKind::Vault, "/notes/a.md", "rewritten page body"))
        .await
        .unwrap();
    assert_eq!(note.status, UpsertStatus::Created);
    assert_ne!(note.record_id, first.record_id);
    assert_eq!(note.duplicate_of, vec![first.record_id.clone()]);

    let edges = store.edges_for(&note.record_id).await.unwrap();
    assert!(edges.iter().any(|e| {
        e.relation == RelationKind::DuplicateOf && e.to_id == first.record_id
    }));
}

#[tokio::test]
async fn remove_deletes_versions_and_severs_edges() {
    let tmp = TempDir::new().unwrap();
    let store = fresh_store(&tmp).await;

    let target = store
        .upsert(&text(SourceKind::Web, "https://e.com/a", "one"))
        .await
        .unwrap();
    store
        .upsert(&text(SourceKind::Web, "https://e.com/a", "two"))
        .await
        .unwrap();
    let other = store
        .upsert(&text(SourceKind::Web, "https://e.com/b", "other"))
        .await
        .unwrap();
    store
        .add_edge(&RelationEdge {
            from_id: other.record_id.clone(),
            to_id: target.record_id.clone(),
            relation: RelationKind::DerivedFrom,
        })
        .await
        .unwrap();

    let removed = store.remove(&target.record_id).await.unwrap();
    assert_eq!(removed, 2);
    assert!(store.get(&target.record_id, None).await.unwrap().is_none());
    assert!(store.edges_for(&other.record_id).await.unwrap().is_empty());

    // The untouched record survives.
    assert!(store.get(&other.record_id, None).await.unwrap().is_some());
}
