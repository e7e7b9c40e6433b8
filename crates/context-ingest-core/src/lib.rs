//! # Context Ingest Core
//!
//! Shared logic for the context ingestion engine: the normalized content
//! record model, the relation graph types, the error taxonomy, and the
//! [`store::ContextStore`] trait with an in-memory reference implementation.
//!
//! This crate contains no tokio, sqlx, filesystem I/O, or other
//! native-only dependencies. Importer adapters and the SQLite-backed
//! store live in the `context-ingest` crate.

pub mod error;
pub mod models;
pub mod store;
