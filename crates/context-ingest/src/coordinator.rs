//! Ingestion coordinator: drives one import job end to end.
//!
//! Job lifecycle: `Pending → Resolving → Extracting → Committing →
//! Completed`, with `Failed` reachable from any non-terminal state and
//! `Cancelled` when the caller's flag trips between items. Records are
//! committed in the order the adapter yields them, one at a time — the
//! bounded stream means memory does not grow with source size.
//!
//! Every job returns a structured [`JobResult`], failures included.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use context_ingest_core::error::{IngestError, ItemError};
use context_ingest_core::models::{record_id, ItemLink, SourceKind};
use context_ingest_core::store::{ContextStore, UpsertStatus};

use crate::importer::ExtractRequest;
use crate::options;
use crate::registry::ImporterRegistry;

/// One import job as submitted by a caller.
#[derive(Debug, Clone)]
pub struct ImportRequest {
    pub source_kind: SourceKind,
    pub source_reference: String,
    /// Raw per-kind options mapping; validated before the job starts.
    pub options: serde_json::Value,
    /// Budget for the whole extraction; expiry fails the job as a
    /// timeout, distinct from other source failures.
    pub deadline: Option<Duration>,
}

impl ImportRequest {
    pub fn new(kind: SourceKind, reference: impl Into<String>) -> Self {
        Self {
            source_kind: kind,
            source_reference: reference.into(),
            options: serde_json::Value::Null,
            deadline: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum JobStatus {
    Completed,
    Failed,
    Cancelled,
}

/// Structured outcome of a job. Item errors are carried here, never
/// thrown; `failure_reason` is set only for `Failed`.
#[derive(Debug, Clone, Serialize)]
pub struct JobResult {
    pub job_id: String,
    pub status: JobStatus,
    pub created: u64,
    pub updated: u64,
    pub unchanged: u64,
    /// Items whose upsert reported a duplicate_of relation.
    pub duplicates: u64,
    pub item_errors: Vec<ItemError>,
    pub total_items: u64,
    pub failure_reason: Option<String>,
    /// Set when the failure was the deadline expiring.
    pub timed_out: bool,
}

/// Cooperative cancellation flag, checked between yielded records.
/// Cancellation is not a rollback: upserts already committed stay.
pub type CancelFlag = Arc<AtomicBool>;

pub fn cancel_flag() -> CancelFlag {
    Arc::new(AtomicBool::new(false))
}

pub struct Coordinator {
    registry: Arc<ImporterRegistry>,
    store: Arc<dyn ContextStore>,
}

/// Running tallies for one job, folded into the final [`JobResult`].
#[derive(Default)]
struct JobCounts {
    created: u64,
    updated: u64,
    unchanged: u64,
    duplicates: u64,
    item_errors: Vec<ItemError>,
}

impl JobCounts {
    fn total(&self) -> u64 {
        self.created + self.updated + self.unchanged + self.item_errors.len() as u64
    }

    fn into_result(self, job_id: String, status: JobStatus, failure: Option<IngestError>) -> JobResult {
        let total_items = self.total();
        let timed_out = matches!(
            failure,
            Some(IngestError::SourceUnavailable { timed_out: true, .. })
        );
        JobResult {
            job_id,
            status,
            created: self.created,
            updated: self.updated,
            unchanged: self.unchanged,
            duplicates: self.duplicates,
            item_errors: self.item_errors,
            total_items,
            failure_reason: failure.map(|e| e.to_string()),
            timed_out,
        }
    }
}

impl Coordinator {
    pub fn new(registry: Arc<ImporterRegistry>, store: Arc<dyn ContextStore>) -> Self {
        Self { registry, store }
    }

    pub async fn run(&self, request: ImportRequest) -> JobResult {
        self.run_cancellable(request, cancel_flag()).await
    }

    pub async fn run_cancellable(&self, request: ImportRequest, cancel: CancelFlag) -> JobResult {
        let job_id = Uuid::new_v4().to_string();
        let kind = request.source_kind;
        debug!(job_id = %job_id, kind = %kind, reference = %request.source_reference, "job pending");

        // Pre-flight: invalid options fail before the job resolves an
        // adapter, but still produce a structured result.
        let opts = match options::validate(kind, &request.options) {
            Ok(opts) => opts,
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "job rejected before start");
                return JobCounts::default().into_result(job_id, JobStatus::Failed, Some(e));
            }
        };

        debug!(job_id = %job_id, "job resolving");
        let importer = match self.registry.resolve(kind) {
            Ok(importer) => importer,
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "job failed during resolution");
                return JobCounts::default().into_result(job_id, JobStatus::Failed, Some(e));
            }
        };

        let deadline = request.deadline.map(|d| Instant::now() + d);
        let extract_request = ExtractRequest {
            reference: request.source_reference.clone(),
            options: opts,
        };

        debug!(job_id = %job_id, "job extracting");
        let extract = importer.extract(&extract_request);
        let stream = match with_deadline(deadline, extract).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                warn!(job_id = %job_id, error = %e, "source failed");
                return JobCounts::default().into_result(job_id, JobStatus::Failed, Some(e));
            }
            Err(timeout) => {
                warn!(job_id = %job_id, "deadline exceeded during extraction");
                return JobCounts::default().into_result(job_id, JobStatus::Failed, Some(timeout));
            }
        };

        let mut stream = stream;
        let mut counts = JobCounts::default();
        // Committed record ids with unresolved links, fixed up after the
        // stream ends so intra-source targets exist.
        let mut pending_links: Vec<(String, Vec<ItemLink>)> = Vec::new();

        loop {
            if cancel.load(Ordering::SeqCst) {
                info!(job_id = %job_id, total = counts.total(), "job cancelled");
                return counts.into_result(job_id, JobStatus::Cancelled, None);
            }

            let next = match with_deadline(deadline, stream.recv()).await {
                Ok(next) => next,
                Err(timeout) => {
                    warn!(job_id = %job_id, "deadline exceeded between records");
                    return counts.into_result(job_id, JobStatus::Failed, Some(timeout));
                }
            };

            let item = match next {
                Some(Ok(item)) => item,
                Some(Err(item_error)) => {
                    debug!(job_id = %job_id, locator = %item_error.locator, "item error");
                    counts.item_errors.push(item_error);
                    continue;
                }
                None => break,
            };

            match self.store.upsert(&item).await {
                Ok(outcome) => {
                    match outcome.status {
                        UpsertStatus::Created => counts.created += 1,
                        UpsertStatus::Updated => counts.updated += 1,
                        UpsertStatus::Unchanged => counts.unchanged += 1,
                    }
                    if !outcome.duplicate_of.is_empty() {
                        counts.duplicates += 1;
                    }
                    if !item.links.is_empty() {
                        pending_links.push((outcome.record_id, item.links));
                    }
                }
                Err(e) => {
                    // Store faults (write conflicts included) are fatal to
                    // the job, never retried here.
                    warn!(job_id = %job_id, error = %e, "commit failed");
                    return counts.into_result(job_id, JobStatus::Failed, Some(e));
                }
            }
        }

        if let Err(e) = self.resolve_links(kind, pending_links).await {
            warn!(job_id = %job_id, error = %e, "edge commit failed");
            return counts.into_result(job_id, JobStatus::Failed, Some(e));
        }

        info!(
            job_id = %job_id,
            created = counts.created,
            updated = counts.updated,
            unchanged = counts.unchanged,
            duplicates = counts.duplicates,
            item_errors = counts.item_errors.len(),
            "job completed"
        );
        counts.into_result(job_id, JobStatus::Completed, None)
    }

    /// Turn item links into graph edges. Targets resolve by identity
    /// derivation; a link to something never imported is skipped.
    async fn resolve_links(
        &self,
        kind: SourceKind,
        pending: Vec<(String, Vec<ItemLink>)>,
    ) -> Result<(), IngestError> {
        for (from_id, links) in pending {
            for link in links {
                let to_id = record_id(kind, &link.locator);
                if self.store.get(&to_id, None).await?.is_none() {
                    debug!(locator = %link.locator, "link target not imported, skipping edge");
                    continue;
                }
                self.store
                    .add_edge(&context_ingest_core::models::RelationEdge {
                        from_id: from_id.clone(),
                        to_id,
                        relation: link.relation,
                    })
                    .await?;
            }
        }
        Ok(())
    }
}

/// Await a future against an optional deadline; expiry maps to the
/// timeout flavor of `SourceUnavailable`.
async fn with_deadline<F: std::future::Future>(
    deadline: Option<Instant>,
    fut: F,
) -> Result<F::Output, IngestError> {
    match deadline {
        None => Ok(fut.await),
        Some(at) => tokio::time::timeout_at(at, fut)
            .await
            .map_err(|_| IngestError::timeout("deadline exceeded")),
    }
}
