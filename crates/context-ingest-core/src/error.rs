//! Error taxonomy for the ingestion engine.
//!
//! Job-fatal conditions are variants of [`IngestError`]; single-item
//! extraction failures are carried as plain [`ItemError`] values through
//! the adapter stream and the job result, never propagated as errors.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::SourceKind;

#[derive(Debug, Error)]
pub enum IngestError {
    /// Registry lookup miss. Fails the job during resolution.
    #[error("no importer registered for source kind '{0}'")]
    UnknownSourceKind(SourceKind),

    /// Whole-source failure: unreachable host, missing path, auth failure,
    /// or deadline expiry (`timed_out` distinguishes the timeout case).
    #[error("source unavailable: {reason}")]
    SourceUnavailable { reason: String, timed_out: bool },

    /// Pre-flight option validation failure. The job never starts.
    #[error("invalid options: {0}")]
    InvalidOptions(String),

    /// Version collision under the per-record serialization discipline.
    /// Should not happen; treated as fatal, never retried.
    #[error("store write conflict for record {record_id}: {reason}")]
    StoreWriteConflict { record_id: String, reason: String },

    /// Rejected graph edge (mutual derived_from).
    #[error("invalid edge: {0}")]
    InvalidEdge(String),

    /// Storage backend fault (I/O, SQL).
    #[error("store error: {0}")]
    Store(#[from] anyhow::Error),
}

impl IngestError {
    pub fn unavailable(reason: impl Into<String>) -> Self {
        IngestError::SourceUnavailable {
            reason: reason.into(),
            timed_out: false,
        }
    }

    pub fn timeout(reason: impl Into<String>) -> Self {
        IngestError::SourceUnavailable {
            reason: reason.into(),
            timed_out: true,
        }
    }
}

/// A single-item extraction failure. Recorded in the job result;
/// non-fatal by contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemError {
    /// Locator of the item that failed, as close to canonical as the
    /// adapter got before failing.
    pub locator: String,
    pub reason: String,
}

impl ItemError {
    pub fn new(locator: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            locator: locator.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_is_flagged() {
        match IngestError::timeout("deadline exceeded") {
            IngestError::SourceUnavailable { timed_out, .. } => assert!(timed_out),
            other => panic!("unexpected variant: {:?}", other),
        }
        match IngestError::unavailable("no such host") {
            IngestError::SourceUnavailable { timed_out, .. } => assert!(!timed_out),
            other => panic!("unexpected variant: {:?}", other),
        }
    }
}
