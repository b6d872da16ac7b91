//! Durable storage for analysis status, analysis results, composite scores and
//! the subjects known to the batch driver.
//!
//! Every entity embeds [`AuditFields`] instead of sharing a base type. The
//! [`Storage`] trait is a key-by-id upsert store; [`SqliteStorage`] is the
//! production implementation.

mod sqlite;

#[cfg(test)]
#[path = "types_tests.rs"]
mod types_tests;

pub use sqlite::SqliteStorage;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use uuid::Uuid;

use crate::error::StorageResult;
use crate::scoring::{DimensionRationales, DimensionScores};

/// Creation and modification timestamps carried by every durable entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditFields {
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AuditFields {
    /// Both timestamps set to now.
    pub fn now() -> Self {
        let now = Utc::now();
        Self {
            created_at: now,
            updated_at: now,
        }
    }

    /// Bump `updated_at`.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

impl Default for AuditFields {
    fn default() -> Self {
        Self::now()
    }
}

/// Lifecycle of a per-item analysis.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnalysisStatus {
    /// Created, waiting on the external call.
    #[default]
    Pending,
    /// Result received and stored.
    Completed,
    /// All attempts failed.
    Failed,
}

impl AnalysisStatus {
    /// Convert to the stored string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisStatus::Pending => "pending",
            AnalysisStatus::Completed => "completed",
            AnalysisStatus::Failed => "failed",
        }
    }

    /// Whether no further transition is allowed.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, AnalysisStatus::Pending)
    }
}

impl std::fmt::Display for AnalysisStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for AnalysisStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(AnalysisStatus::Pending),
            "completed" => Ok(AnalysisStatus::Completed),
            "failed" => Ok(AnalysisStatus::Failed),
            _ => Err(format!("Unknown analysis status: {}", s)),
        }
    }
}

/// Rejected status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Invalid status transition: {from} -> {to}")]
pub struct InvalidTransition {
    pub from: AnalysisStatus,
    pub to: AnalysisStatus,
}

/// Durable status of one item's external analysis.
///
/// Keyed by `item_id`, or by `(owner_id, item_id)` for user-owned analyses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisStatusRecord {
    /// Owning user, `None` for system-triggered analyses.
    pub owner_id: Option<String>,
    pub item_id: String,
    /// Generated id handed back to owners.
    pub analysis_id: String,
    pub status: AnalysisStatus,
    pub composite_score: Option<i64>,
    pub summary: Option<String>,
    pub raw_result_payload: Option<String>,
    pub error_message: Option<String>,
    pub audit: AuditFields,
}

impl AnalysisStatusRecord {
    /// New PENDING record for a system-owned item.
    pub fn pending(item_id: impl Into<String>) -> Self {
        Self {
            owner_id: None,
            item_id: item_id.into(),
            analysis_id: Uuid::new_v4().to_string(),
            status: AnalysisStatus::Pending,
            composite_score: None,
            summary: None,
            raw_result_payload: None,
            error_message: None,
            audit: AuditFields::now(),
        }
    }

    /// Set the owning user
    pub fn with_owner(mut self, owner_id: impl Into<String>) -> Self {
        self.owner_id = Some(owner_id.into());
        self
    }

    /// Put a terminal record back to PENDING for a fresh attempt.
    ///
    /// Clears the previous outcome and restarts `created_at`.
    pub fn reset_pending(&mut self) {
        self.status = AnalysisStatus::Pending;
        self.composite_score = None;
        self.summary = None;
        self.raw_result_payload = None;
        self.error_message = None;
        self.audit = AuditFields::now();
    }

    /// PENDING -> COMPLETED.
    pub fn mark_completed(
        &mut self,
        composite_score: Option<i64>,
        summary: Option<String>,
        raw_result_payload: impl Into<String>,
    ) -> Result<(), InvalidTransition> {
        self.check_transition(AnalysisStatus::Completed)?;
        self.status = AnalysisStatus::Completed;
        self.composite_score = composite_score;
        self.summary = summary;
        self.raw_result_payload = Some(raw_result_payload.into());
        self.error_message = None;
        self.audit.touch();
        Ok(())
    }

    /// PENDING -> FAILED, keeping `message` as the last error.
    pub fn mark_failed(&mut self, message: impl Into<String>) -> Result<(), InvalidTransition> {
        self.check_transition(AnalysisStatus::Failed)?;
        self.status = AnalysisStatus::Failed;
        self.error_message = Some(message.into());
        self.audit.touch();
        Ok(())
    }

    fn check_transition(&self, to: AnalysisStatus) -> Result<(), InvalidTransition> {
        if self.status == AnalysisStatus::Pending {
            Ok(())
        } else {
            Err(InvalidTransition {
                from: self.status,
                to,
            })
        }
    }
}

/// Parsed external analysis result, one per subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisResultRecord {
    pub subject_id: String,
    pub composite_score: Option<i64>,
    pub summary: Option<String>,
    pub category: Option<String>,
    pub category_reason: Option<String>,
    /// Opaque embedded-claims blob, stored as JSON text.
    pub claims: Option<String>,
    pub raw_payload: String,
    pub audit: AuditFields,
}

impl AnalysisResultRecord {
    /// Empty result for `subject_id`.
    pub fn new(subject_id: impl Into<String>) -> Self {
        Self {
            subject_id: subject_id.into(),
            composite_score: None,
            summary: None,
            category: None,
            category_reason: None,
            claims: None,
            raw_payload: String::new(),
            audit: AuditFields::now(),
        }
    }
}

/// Lifecycle of a multi-provider composite analysis.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CompositeStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl CompositeStatus {
    /// Convert to the stored string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            CompositeStatus::Pending => "pending",
            CompositeStatus::InProgress => "in_progress",
            CompositeStatus::Completed => "completed",
            CompositeStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for CompositeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for CompositeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(CompositeStatus::Pending),
            "in_progress" => Ok(CompositeStatus::InProgress),
            "completed" => Ok(CompositeStatus::Completed),
            "failed" => Ok(CompositeStatus::Failed),
            _ => Err(format!("Unknown composite status: {}", s)),
        }
    }
}

/// One provider's contribution to a composite record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderScore {
    pub score: Option<i64>,
    pub dimension_scores: DimensionScores,
    pub rationales: DimensionRationales,
    pub summary: Option<String>,
}

/// Composite score for one subject and analysis date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompositeScoreRecord {
    pub id: String,
    pub subject_id: String,
    pub analysis_date: NaiveDate,
    pub analysis_period: String,
    pub overall_score: Option<i64>,
    pub dimension_scores: DimensionScores,
    /// Keyed by provider name; a provider with no entry has a null score.
    pub provider_scores: BTreeMap<String, ProviderScore>,
    pub status: CompositeStatus,
    pub error_message: Option<String>,
    pub retry_count: u32,
    pub audit: AuditFields,
}

impl CompositeScoreRecord {
    /// Retries allowed by the failed-analysis sweep.
    pub const MAX_RETRIES: u32 = 3;

    /// New IN_PROGRESS record for `subject_id` on `analysis_date`.
    pub fn new(
        subject_id: impl Into<String>,
        analysis_date: NaiveDate,
        analysis_period: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            subject_id: subject_id.into(),
            analysis_date,
            analysis_period: analysis_period.into(),
            overall_score: None,
            dimension_scores: DimensionScores::default(),
            provider_scores: BTreeMap::new(),
            status: CompositeStatus::InProgress,
            error_message: None,
            retry_count: 0,
            audit: AuditFields::now(),
        }
    }

    /// Whether the sweep may retry this record again.
    pub fn can_retry(&self) -> bool {
        self.retry_count < Self::MAX_RETRIES
    }

    /// Score recorded for `provider`, if it succeeded.
    pub fn provider_score(&self, provider: &str) -> Option<i64> {
        self.provider_scores.get(provider).and_then(|p| p.score)
    }

    /// Mark FAILED with `message`, clearing all scores.
    pub fn mark_failed(&mut self, message: impl Into<String>) {
        self.status = CompositeStatus::Failed;
        self.error_message = Some(message.into());
        self.overall_score = None;
        self.dimension_scores = DimensionScores::default();
        self.provider_scores.clear();
        self.audit.touch();
    }
}

/// A subject the batch driver analyzes each period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    pub id: String,
    pub name: String,
    pub active: bool,
    pub audit: AuditFields,
}

impl Subject {
    /// New active subject.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            active: true,
            audit: AuditFields::now(),
        }
    }
}

/// Key-by-id upsert store for every durable entity.
#[async_trait]
pub trait Storage: Send + Sync {
    // ========================================================================
    // Analysis status
    // ========================================================================

    /// Insert or replace the status record for its `(owner, item)` key.
    async fn upsert_status(&self, record: &AnalysisStatusRecord) -> StorageResult<()>;
    /// Status record for `(owner, item)`.
    async fn get_status(
        &self,
        owner_id: Option<&str>,
        item_id: &str,
    ) -> StorageResult<Option<AnalysisStatusRecord>>;
    /// Every status record in `status`.
    async fn list_statuses(&self, status: AnalysisStatus) -> StorageResult<Vec<AnalysisStatusRecord>>;
    /// Remove the status record for `(owner, item)`.
    async fn delete_status(&self, owner_id: Option<&str>, item_id: &str) -> StorageResult<()>;

    // ========================================================================
    // Analysis results
    // ========================================================================

    /// Insert or replace the result for its subject.
    async fn upsert_result(&self, record: &AnalysisResultRecord) -> StorageResult<()>;
    /// Result for `subject_id`.
    async fn get_result(&self, subject_id: &str) -> StorageResult<Option<AnalysisResultRecord>>;
    /// Every stored result.
    async fn list_results(&self) -> StorageResult<Vec<AnalysisResultRecord>>;

    // ========================================================================
    // Composite scores
    // ========================================================================

    /// Insert or replace the record for its `(subject, date)`.
    async fn save_composite(&self, record: &CompositeScoreRecord) -> StorageResult<()>;
    /// Record for `(subject, date)`.
    async fn get_composite(
        &self,
        subject_id: &str,
        analysis_date: NaiveDate,
    ) -> StorageResult<Option<CompositeScoreRecord>>;
    /// Remove the record with `id`.
    async fn delete_composite(&self, id: &str) -> StorageResult<()>;
    /// Every record in `status`.
    async fn list_composites(&self, status: CompositeStatus) -> StorageResult<Vec<CompositeScoreRecord>>;

    // ========================================================================
    // Subjects
    // ========================================================================

    /// Insert or replace a subject.
    async fn upsert_subject(&self, subject: &Subject) -> StorageResult<()>;
    /// Subject with `id`.
    async fn get_subject(&self, id: &str) -> StorageResult<Option<Subject>>;
    /// Active subjects ordered by id.
    async fn list_active_subjects(&self) -> StorageResult<Vec<Subject>>;
}
