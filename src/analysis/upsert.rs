use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::storage::{AnalysisResultRecord, Storage};

/// What [`ResultUpsertService::upsert`] did with a payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// Stored under `subject_id`.
    Applied { subject_id: String },
    /// Not ours to store, e.g. no `subjectId`. Nothing was written.
    Skipped { reason: String },
    /// The payload was valid but could not be stored.
    Failed { subject_id: String, message: String },
}

/// Fields read from an analysis response. Absent or mistyped fields are `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedResult {
    pub subject_id: Option<String>,
    pub composite_score: Option<i64>,
    pub summary: Option<String>,
    pub category: Option<String>,
    pub category_reason: Option<String>,
    pub claims: Option<String>,
}

fn text_field(body: &Value, key: &str) -> Option<String> {
    body.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn score_field(body: &Value, key: &str) -> Option<i64> {
    match body.get(key)? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse::<f64>().ok().map(|f| f as i64),
        _ => None,
    }
}

impl ParsedResult {
    pub fn from_value(body: &Value) -> Self {
        Self {
            subject_id: text_field(body, "subjectId"),
            composite_score: score_field(body, "compositeScore"),
            summary: text_field(body, "summary"),
            category: text_field(body, "category"),
            category_reason: text_field(body, "categoryReason"),
            claims: body
                .get("claims")
                .filter(|v| !v.is_null())
                .map(Value::to_string),
        }
    }
}

/// Stores parsed analysis results, one per subject.
#[derive(Clone)]
pub struct ResultUpsertService {
    storage: Arc<dyn Storage>,
}

impl ResultUpsertService {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Parse `raw` and store it.
    pub async fn upsert(&self, raw: &str) -> UpsertOutcome {
        match serde_json::from_str::<Value>(raw) {
            Ok(body) => self.apply(&ParsedResult::from_value(&body), raw).await,
            Err(e) => {
                debug!(error = %e, "Ignoring non-JSON analysis payload");
                UpsertOutcome::Skipped {
                    reason: format!("payload is not JSON: {}", e),
                }
            }
        }
    }

    /// Store already parsed fields, keeping `created_at` of an existing row.
    pub async fn apply(&self, parsed: &ParsedResult, raw: &str) -> UpsertOutcome {
        let Some(subject_id) = parsed.subject_id.clone() else {
            debug!("Ignoring analysis payload without subjectId");
            return UpsertOutcome::Skipped {
                reason: "missing subjectId".to_string(),
            };
        };

        let existing = match self.storage.get_result(&subject_id).await {
            Ok(existing) => existing,
            Err(e) => return Self::failed(subject_id, e.to_string()),
        };

        let mut record = match existing {
            Some(mut record) => {
                record.audit.touch();
                record
            }
            None => AnalysisResultRecord::new(&subject_id),
        };
        record.composite_score = parsed.composite_score;
        record.summary = parsed.summary.clone();
        record.category = parsed.category.clone();
        record.category_reason = parsed.category_reason.clone();
        record.claims = parsed.claims.clone();
        record.raw_payload = raw.to_string();

        match self.storage.upsert_result(&record).await {
            Ok(()) => {
                info!(subject_id = %subject_id, score = ?record.composite_score, "Analysis result stored");
                UpsertOutcome::Applied { subject_id }
            }
            Err(e) => Self::failed(subject_id, e.to_string()),
        }
    }

    fn failed(subject_id: String, message: String) -> UpsertOutcome {
        error!(subject_id = %subject_id, error = %message, "Failed to store analysis result");
        UpsertOutcome::Failed {
            subject_id,
            message,
        }
    }
}
