//! # Context Ingest
//!
//! The native half of the context ingestion engine: importer adapters for
//! the six source kinds (repository, web, image, video, audio, vault),
//! the importer registry, the ingestion coordinator, and the
//! SQLite-backed [`ContextStore`](context_ingest_core::store::ContextStore).
//!
//! The data model, error taxonomy, store trait, and in-memory store live
//! in `context-ingest-core`.

pub mod config;
pub mod coordinator;
pub mod importer;
pub mod importer_media;
pub mod importer_repository;
pub mod importer_vault;
pub mod importer_web;
pub mod migrate;
pub mod options;
pub mod registry;
pub mod sqlite_store;

pub use context_ingest_core as core;
