use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::client::{AnalysisReply, AnalysisService};
use super::upsert::{ParsedResult, ResultUpsertService, UpsertOutcome};
use super::canonical_subject_url;
use crate::config::{AnalysisConfig, RequestConfig};
use crate::error::{AnalysisError, StorageResult};
use crate::pool::WorkerPool;
use crate::retry::{retry_with_backoff, RetryError, RetryPolicy};
use crate::storage::{AnalysisStatus, AnalysisStatusRecord, Storage};

/// Dispatcher tuning.
#[derive(Debug, Clone)]
pub struct DispatcherSettings {
    pub subject_url_prefix: String,
    pub retry: RetryPolicy,
}

impl DispatcherSettings {
    pub fn from_config(analysis: &AnalysisConfig, request: &RequestConfig) -> Self {
        Self {
            subject_url_prefix: analysis.subject_url_prefix.clone(),
            retry: RetryPolicy::from(request),
        }
    }
}

/// What a reader sees for an item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnalysisView {
    /// No analysis recorded yet.
    Pending,
    /// Stored record in whatever state it is, FAILED included.
    Record(AnalysisStatusRecord),
}

/// Final statuses of a batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub completed: usize,
    pub failed: usize,
}

/// Runs external analyses through a bounded pool and persists each item's
/// status.
///
/// Every item passes through PENDING before its first call and leaves it as
/// COMPLETED or FAILED. Errors never escape; they end up in the record.
#[derive(Clone)]
pub struct AnalysisDispatcher {
    storage: Arc<dyn Storage>,
    service: Arc<dyn AnalysisService>,
    upserts: ResultUpsertService,
    pool: WorkerPool,
    settings: DispatcherSettings,
    cancel: CancellationToken,
}

impl AnalysisDispatcher {
    pub fn new(
        storage: Arc<dyn Storage>,
        service: Arc<dyn AnalysisService>,
        pool: WorkerPool,
        settings: DispatcherSettings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            upserts: ResultUpsertService::new(Arc::clone(&storage)),
            storage,
            service,
            pool,
            settings,
            cancel,
        }
    }

    /// Mark every id PENDING, run them on the pool and wait for all of them.
    pub async fn dispatch_batch(&self, item_ids: &[String]) -> DispatchSummary {
        let mut summary = DispatchSummary::default();
        let mut handles = Vec::with_capacity(item_ids.len());

        info!(count = item_ids.len(), pool = %self.pool.name(), "Dispatching analysis batch");

        for item_id in item_ids {
            let record = self.prepare_pending(None, item_id).await;

            let worker = self.clone();
            let task_record = record.clone();
            match self.pool.submit(async move { worker.run_pending(task_record).await }) {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    warn!(item_id = %item_id, error = %e, "Analysis not scheduled");
                    let record = self.finish(record, Err(e.to_string())).await;
                    if let Err(e) = self.storage.upsert_status(&record).await {
                        error!(item_id = %item_id, error = %e, "Failed to save analysis status");
                    }
                    summary.tally(&record);
                }
            }
        }

        for joined in self.pool.join_all(handles).await {
            match joined {
                Ok(record) => summary.tally(&record),
                Err(e) => {
                    error!(error = %e, "Analysis task aborted");
                    summary.failed += 1;
                }
            }
        }

        info!(completed = summary.completed, failed = summary.failed, "Analysis batch finished");
        summary
    }

    /// Analyze one system-owned item and return its final record.
    pub async fn dispatch_one(&self, item_id: &str) -> AnalysisStatusRecord {
        let record = self.prepare_pending(None, item_id).await;
        self.run_pending(record).await
    }

    /// Analyze `item_id` on behalf of `owner_id`, keyed by both.
    pub async fn dispatch_for_owner(&self, owner_id: &str, item_id: &str) -> AnalysisStatusRecord {
        let record = self.prepare_pending(Some(owner_id), item_id).await;
        self.run_pending(record).await
    }

    /// Analyze without persisting a status record. The returned record is
    /// always COMPLETED or FAILED.
    pub async fn analyze_anonymous(&self, item_id: &str) -> AnalysisStatusRecord {
        let record = AnalysisStatusRecord::pending(item_id);
        let outcome = self.call_with_retry(item_id).await;
        self.resolve(record, outcome).await
    }

    /// Current view of `(owner, item)`.
    pub async fn status_of(
        &self,
        owner_id: Option<&str>,
        item_id: &str,
    ) -> StorageResult<AnalysisView> {
        Ok(match self.storage.get_status(owner_id, item_id).await? {
            Some(record) => AnalysisView::Record(record),
            None => AnalysisView::Pending,
        })
    }

    /// Create the PENDING record, or reset a terminal one for a fresh attempt.
    async fn prepare_pending(&self, owner_id: Option<&str>, item_id: &str) -> AnalysisStatusRecord {
        let record = match self.storage.get_status(owner_id, item_id).await {
            Ok(Some(mut existing)) => {
                if existing.status.is_terminal() {
                    existing.reset_pending();
                }
                existing
            }
            Ok(None) => {
                let record = AnalysisStatusRecord::pending(item_id);
                match owner_id {
                    Some(owner) => record.with_owner(owner),
                    None => record,
                }
            }
            Err(e) => {
                error!(item_id, error = %e, "Failed to load analysis status");
                let record = AnalysisStatusRecord::pending(item_id);
                match owner_id {
                    Some(owner) => record.with_owner(owner),
                    None => record,
                }
            }
        };

        if let Err(e) = self.storage.upsert_status(&record).await {
            error!(item_id, error = %e, "Failed to save pending status");
        }
        record
    }

    async fn run_pending(&self, record: AnalysisStatusRecord) -> AnalysisStatusRecord {
        let outcome = self.call_with_retry(&record.item_id).await;
        let record = self.resolve(record, outcome).await;
        if let Err(e) = self.storage.upsert_status(&record).await {
            error!(item_id = %record.item_id, error = %e, "Failed to save analysis status");
        }
        record
    }

    async fn call_with_retry(&self, item_id: &str) -> Result<AnalysisReply, AnalysisError> {
        let subject_url = canonical_subject_url(&self.settings.subject_url_prefix, item_id);
        let service = &self.service;

        retry_with_backoff(self.settings.retry, &self.cancel, item_id, |_| {
            service.analyze(item_id, &subject_url)
        })
        .await
        .map_err(|e| match e {
            RetryError::Exhausted { last, attempts } => AnalysisError::Unavailable {
                message: last.to_string(),
                attempts,
            },
            RetryError::Cancelled { attempts, .. } => AnalysisError::Cancelled { attempts },
        })
    }

    /// Store the result of a successful call and settle the record.
    async fn resolve(
        &self,
        record: AnalysisStatusRecord,
        outcome: Result<AnalysisReply, AnalysisError>,
    ) -> AnalysisStatusRecord {
        let reply = match outcome {
            Ok(reply) => reply,
            Err(e) => return self.finish(record, Err(e.to_string())).await,
        };

        let parsed = ParsedResult::from_value(&reply.body);
        match self.upserts.apply(&parsed, &reply.raw).await {
            UpsertOutcome::Failed { message, .. } => {
                self.finish(record, Err(format!("Failed to store result: {}", message)))
                    .await
            }
            UpsertOutcome::Applied { .. } | UpsertOutcome::Skipped { .. } => {
                self.finish(record, Ok((parsed, reply.raw))).await
            }
        }
    }

    async fn finish(
        &self,
        mut record: AnalysisStatusRecord,
        outcome: Result<(ParsedResult, String), String>,
    ) -> AnalysisStatusRecord {
        let transition = match outcome {
            Ok((parsed, raw)) => {
                info!(item_id = %record.item_id, score = ?parsed.composite_score, "Analysis completed");
                record.mark_completed(parsed.composite_score, parsed.summary, raw)
            }
            Err(message) => {
                error!(item_id = %record.item_id, error = %message, "Analysis failed");
                record.mark_failed(message)
            }
        };
        if let Err(e) = transition {
            warn!(item_id = %record.item_id, error = %e, "Status transition rejected");
        }
        record
    }
}

impl DispatchSummary {
    fn tally(&mut self, record: &AnalysisStatusRecord) {
        match record.status {
            AnalysisStatus::Completed => self.completed += 1,
            _ => self.failed += 1,
        }
    }
}
