use chrono::NaiveDate;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{Dimension, DimensionScores, ProviderResult, ScoringProvider};
use crate::config::AggregatorConfig;
use crate::error::StorageResult;
use crate::pool::WorkerPool;
use crate::storage::{CompositeScoreRecord, CompositeStatus, ProviderScore, Storage, Subject};

/// Aggregator tuning.
#[derive(Debug, Clone)]
pub struct AggregatorSettings {
    pub analysis_period: String,
    /// Pause between subjects in a batch run.
    pub subject_delay: Duration,
}

impl Default for AggregatorSettings {
    fn default() -> Self {
        Self::from(&AggregatorConfig::default())
    }
}

impl From<&AggregatorConfig> for AggregatorSettings {
    fn from(config: &AggregatorConfig) -> Self {
        Self {
            analysis_period: config.analysis_period.clone(),
            subject_delay: Duration::from_millis(config.subject_delay_ms),
        }
    }
}

/// Tally of a batch run or retry sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub completed: usize,
    pub failed: usize,
    /// Records left alone, e.g. at the retry cap.
    pub skipped: usize,
}

impl BatchSummary {
    fn record(&mut self, record: &CompositeScoreRecord) {
        if record.status == CompositeStatus::Completed {
            self.completed += 1;
        } else {
            self.failed += 1;
        }
    }
}

/// Fans a subject out to every registered [`ScoringProvider`] and folds the
/// successful results into a [`CompositeScoreRecord`].
///
/// No method here returns an error: failures end up in the persisted record
/// and the log.
pub struct MultiProviderAggregator {
    storage: Arc<dyn Storage>,
    providers: Vec<Arc<dyn ScoringProvider>>,
    pool: WorkerPool,
    settings: AggregatorSettings,
}

impl MultiProviderAggregator {
    pub fn new(
        storage: Arc<dyn Storage>,
        providers: Vec<Arc<dyn ScoringProvider>>,
        pool: WorkerPool,
        settings: AggregatorSettings,
    ) -> Self {
        Self {
            storage,
            providers,
            pool,
            settings,
        }
    }

    pub fn settings(&self) -> &AggregatorSettings {
        &self.settings
    }

    /// Run one analysis cycle for `subject` on `date`.
    ///
    /// A COMPLETED record only has its failed providers retried. A FAILED
    /// record is replaced by a fresh full analysis that keeps its retry count.
    pub async fn analyze_subject(
        &self,
        subject: &Subject,
        date: NaiveDate,
        period: &str,
    ) -> CompositeScoreRecord {
        let mut record = CompositeScoreRecord::new(&subject.id, date, period);

        match self.storage.get_composite(&subject.id, date).await {
            Ok(Some(existing)) if existing.status == CompositeStatus::Completed => {
                return self
                    .retry_failed_providers_only(subject, existing, period)
                    .await;
            }
            Ok(Some(existing)) => {
                record.retry_count = existing.retry_count;
                if existing.status == CompositeStatus::Failed {
                    debug!(subject_id = %subject.id, %date, "Replacing failed composite record");
                    if let Err(e) = self.storage.delete_composite(&existing.id).await {
                        return self.fail(record, e.to_string()).await;
                    }
                } else {
                    warn!(
                        subject_id = %subject.id,
                        %date,
                        status = %existing.status,
                        "Overwriting unfinished composite record"
                    );
                }
            }
            Ok(None) => {}
            Err(e) => return self.fail(record, e.to_string()).await,
        }

        if let Err(e) = self.run_full_cycle(subject, period, &mut record).await {
            return self.fail(record, e.to_string()).await;
        }
        record
    }

    async fn run_full_cycle(
        &self,
        subject: &Subject,
        period: &str,
        record: &mut CompositeScoreRecord,
    ) -> StorageResult<()> {
        self.storage.save_composite(record).await?;

        let results = self.fan_out(subject, period, &self.providers).await;
        apply_results(record, &results);

        match record.status {
            CompositeStatus::Completed => info!(
                subject_id = %subject.id,
                overall = ?record.overall_score,
                providers = record.provider_scores.len(),
                total = results.len(),
                "Composite analysis completed"
            ),
            _ => warn!(
                subject_id = %subject.id,
                error = ?record.error_message,
                "Composite analysis failed"
            ),
        }

        self.storage.save_composite(record).await
    }

    /// Re-invoke only the providers with no score on `existing`.
    ///
    /// Successful retries fill in that provider's fields. Dimension and
    /// overall averages are left as they were.
    pub async fn retry_failed_providers_only(
        &self,
        subject: &Subject,
        existing: CompositeScoreRecord,
        period: &str,
    ) -> CompositeScoreRecord {
        let missing: Vec<Arc<dyn ScoringProvider>> = self
            .providers
            .iter()
            .filter(|p| existing.provider_score(p.name()).is_none())
            .cloned()
            .collect();

        if missing.is_empty() {
            debug!(subject_id = %subject.id, "Every provider already scored, nothing to retry");
            return existing;
        }

        let mut record = existing;
        let results = self.fan_out(subject, period, &missing).await;

        let mut updated = 0;
        for result in results.iter().filter(|r| r.success) {
            record
                .provider_scores
                .insert(result.provider.clone(), ProviderScore::from(result));
            updated += 1;
        }

        info!(
            subject_id = %subject.id,
            retried = missing.len(),
            updated,
            "Retried failed providers"
        );

        if updated > 0 {
            record.audit.touch();
            if let Err(e) = self.storage.save_composite(&record).await {
                error!(subject_id = %subject.id, error = %e, "Failed to save provider retry");
            }
        }
        record
    }

    /// Re-run every FAILED record still under the retry cap.
    pub async fn retry_failed_analyses(&self) -> BatchSummary {
        let mut summary = BatchSummary::default();

        let failed = match self.storage.list_composites(CompositeStatus::Failed).await {
            Ok(records) => records,
            Err(e) => {
                error!(error = %e, "Failed to list failed analyses");
                return summary;
            }
        };

        info!(count = failed.len(), "Retrying failed analyses");

        for mut record in failed {
            if !record.can_retry() {
                info!(
                    subject_id = %record.subject_id,
                    date = %record.analysis_date,
                    retry_count = record.retry_count,
                    "Retry cap reached, skipping"
                );
                summary.skipped += 1;
                continue;
            }

            let subject = match self.storage.get_subject(&record.subject_id).await {
                Ok(Some(subject)) => subject,
                Ok(None) => Subject::new(&record.subject_id, &record.subject_id),
                Err(e) => {
                    error!(subject_id = %record.subject_id, error = %e, "Failed to load subject");
                    summary.skipped += 1;
                    continue;
                }
            };

            record.retry_count += 1;
            record.audit.touch();
            if let Err(e) = self.storage.save_composite(&record).await {
                error!(subject_id = %record.subject_id, error = %e, "Failed to bump retry count");
                summary.skipped += 1;
                continue;
            }

            let result = self
                .analyze_subject(&subject, record.analysis_date, &record.analysis_period)
                .await;
            summary.record(&result);
        }

        info!(?summary, "Retry sweep finished");
        summary
    }

    /// Analyze every active subject one after another, pausing between them.
    ///
    /// Cancellation stops the batch at the next pause.
    pub async fn analyze_all_subjects(
        &self,
        date: NaiveDate,
        cancel: &CancellationToken,
    ) -> BatchSummary {
        let mut summary = BatchSummary::default();

        let subjects = match self.storage.list_active_subjects().await {
            Ok(subjects) => subjects,
            Err(e) => {
                error!(error = %e, "Failed to list subjects");
                return summary;
            }
        };

        info!(count = subjects.len(), %date, "Starting batch analysis");

        for (index, subject) in subjects.iter().enumerate() {
            if index > 0 {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        warn!(remaining = subjects.len() - index, "Batch analysis cancelled");
                        break;
                    }
                    _ = tokio::time::sleep(self.settings.subject_delay) => {}
                }
            }

            let record = self
                .analyze_subject(subject, date, &self.settings.analysis_period)
                .await;
            summary.record(&record);
        }

        info!(?summary, "Batch analysis finished");
        summary
    }

    /// Run `providers` concurrently on the pool. Always one result per provider.
    async fn fan_out(
        &self,
        subject: &Subject,
        period: &str,
        providers: &[Arc<dyn ScoringProvider>],
    ) -> Vec<ProviderResult> {
        let mut results = Vec::with_capacity(providers.len());
        let mut names = Vec::with_capacity(providers.len());
        let mut handles = Vec::with_capacity(providers.len());

        for provider in providers {
            let name = provider.name().to_string();
            let task_provider = Arc::clone(provider);
            let task_subject = subject.clone();
            let task_period = period.to_string();

            match self.pool.submit(async move {
                task_provider.analyze(&task_subject, &task_period).await
            }) {
                Ok(handle) => {
                    names.push(name);
                    handles.push(handle);
                }
                Err(e) => results.push(ProviderResult::failure(name, &subject.id, e.to_string())),
            }
        }

        let joined = self.pool.join_all(handles).await;
        for (name, outcome) in names.into_iter().zip(joined) {
            results.push(outcome.unwrap_or_else(|e| {
                ProviderResult::failure(name, &subject.id, e.to_string())
            }));
        }
        results
    }

    async fn fail(
        &self,
        mut record: CompositeScoreRecord,
        message: String,
    ) -> CompositeScoreRecord {
        error!(subject_id = %record.subject_id, error = %message, "Composite analysis aborted");
        record.mark_failed(message);
        if let Err(e) = self.storage.save_composite(&record).await {
            error!(subject_id = %record.subject_id, error = %e, "Failed to save failed record");
        }
        record
    }
}

impl From<&ProviderResult> for ProviderScore {
    fn from(result: &ProviderResult) -> Self {
        Self {
            score: result.overall_score,
            dimension_scores: result.dimension_scores,
            rationales: result.rationales.clone(),
            summary: result.summary.clone(),
        }
    }
}

/// Integer mean, truncated. `None` for an empty slice.
fn truncating_mean(values: &[i64]) -> Option<i64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<i64>() / values.len() as i64)
    }
}

/// Fold provider results into `record`, averaging successes only.
fn apply_results(record: &mut CompositeScoreRecord, results: &[ProviderResult]) {
    let successes: Vec<&ProviderResult> = results.iter().filter(|r| r.success).collect();

    if successes.is_empty() {
        let detail = if results.is_empty() {
            "no providers registered".to_string()
        } else {
            results
                .iter()
                .map(|r| {
                    format!(
                        "{}: {}",
                        r.provider,
                        r.error_message.as_deref().unwrap_or("unknown error")
                    )
                })
                .collect::<Vec<_>>()
                .join("; ")
        };
        record.mark_failed(format!("All providers failed ({})", detail));
        return;
    }

    let mut averages = DimensionScores::default();
    for dim in Dimension::ALL {
        let values: Vec<i64> = successes
            .iter()
            .filter_map(|r| r.dimension_scores.get(dim))
            .collect();
        averages.set(dim, truncating_mean(&values));
    }

    let dimension_values: Vec<i64> = Dimension::ALL
        .iter()
        .filter_map(|d| averages.get(*d))
        .collect();

    record.dimension_scores = averages;
    record.overall_score = truncating_mean(&dimension_values);
    record.provider_scores = successes
        .iter()
        .map(|r| (r.provider.clone(), ProviderScore::from(*r)))
        .collect();
    record.status = CompositeStatus::Completed;
    record.error_message = None;
    record.audit.touch();
}
