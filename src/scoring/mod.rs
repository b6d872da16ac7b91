//! Multi-provider credibility scoring.
//!
//! Each [`ScoringProvider`] scores a subject on four [`Dimension`]s and returns
//! a [`ProviderResult`]; the [`MultiProviderAggregator`] fans a subject out to
//! every registered provider and folds the successes into one
//! composite record.

mod aggregator;
mod providers;

pub use aggregator::{AggregatorSettings, BatchSummary, MultiProviderAggregator};
pub use providers::{
    ChecklistScoringProvider, RubricScoringProvider, CHECKLIST_PROVIDER, RUBRIC_PROVIDER,
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::storage::Subject;

/// Scored dimension of a subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Accuracy,
    Objectivity,
    Reliability,
    Expertise,
}

impl Dimension {
    /// Every dimension, in storage order.
    pub const ALL: [Dimension; 4] = [
        Dimension::Accuracy,
        Dimension::Objectivity,
        Dimension::Reliability,
        Dimension::Expertise,
    ];

    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Dimension::Accuracy => "accuracy",
            Dimension::Objectivity => "objectivity",
            Dimension::Reliability => "reliability",
            Dimension::Expertise => "expertise",
        }
    }
}

impl std::fmt::Display for Dimension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One optional integer score per dimension.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DimensionScores {
    pub accuracy: Option<i64>,
    pub objectivity: Option<i64>,
    pub reliability: Option<i64>,
    pub expertise: Option<i64>,
}

impl DimensionScores {
    /// Score for `dimension`.
    pub fn get(&self, dimension: Dimension) -> Option<i64> {
        match dimension {
            Dimension::Accuracy => self.accuracy,
            Dimension::Objectivity => self.objectivity,
            Dimension::Reliability => self.reliability,
            Dimension::Expertise => self.expertise,
        }
    }

    /// Set the score for `dimension`.
    pub fn set(&mut self, dimension: Dimension, value: Option<i64>) {
        match dimension {
            Dimension::Accuracy => self.accuracy = value,
            Dimension::Objectivity => self.objectivity = value,
            Dimension::Reliability => self.reliability = value,
            Dimension::Expertise => self.expertise = value,
        }
    }

    /// All four scores, or `None` if any is missing.
    pub fn complete(&self) -> Option<[i64; 4]> {
        Some([self.accuracy?, self.objectivity?, self.reliability?, self.expertise?])
    }

    /// Same score on every dimension.
    pub fn uniform(value: i64) -> Self {
        Self {
            accuracy: Some(value),
            objectivity: Some(value),
            reliability: Some(value),
            expertise: Some(value),
        }
    }
}

/// Free-text rationale per dimension.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DimensionRationales {
    pub accuracy: Option<String>,
    pub objectivity: Option<String>,
    pub reliability: Option<String>,
    pub expertise: Option<String>,
}

impl DimensionRationales {
    /// Rationale for `dimension`.
    pub fn get(&self, dimension: Dimension) -> Option<&str> {
        match dimension {
            Dimension::Accuracy => self.accuracy.as_deref(),
            Dimension::Objectivity => self.objectivity.as_deref(),
            Dimension::Reliability => self.reliability.as_deref(),
            Dimension::Expertise => self.expertise.as_deref(),
        }
    }

    /// Set the rationale for `dimension`.
    pub fn set(&mut self, dimension: Dimension, value: Option<String>) {
        match dimension {
            Dimension::Accuracy => self.accuracy = value,
            Dimension::Objectivity => self.objectivity = value,
            Dimension::Reliability => self.reliability = value,
            Dimension::Expertise => self.expertise = value,
        }
    }
}

/// Outcome of one provider call. Failures are data, not errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderResult {
    pub provider: String,
    pub subject_id: String,
    pub overall_score: Option<i64>,
    pub dimension_scores: DimensionScores,
    pub rationales: DimensionRationales,
    pub summary: Option<String>,
    pub success: bool,
    pub error_message: Option<String>,
}

impl ProviderResult {
    /// Successful result.
    pub fn success(
        provider: impl Into<String>,
        subject_id: impl Into<String>,
        overall_score: Option<i64>,
        dimension_scores: DimensionScores,
        rationales: DimensionRationales,
        summary: Option<String>,
    ) -> Self {
        Self {
            provider: provider.into(),
            subject_id: subject_id.into(),
            overall_score,
            dimension_scores,
            rationales,
            summary,
            success: true,
            error_message: None,
        }
    }

    /// Failed result carrying `message`.
    pub fn failure(
        provider: impl Into<String>,
        subject_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            provider: provider.into(),
            subject_id: subject_id.into(),
            overall_score: None,
            dimension_scores: DimensionScores::default(),
            rationales: DimensionRationales::default(),
            summary: None,
            success: false,
            error_message: Some(message.into()),
        }
    }
}

/// A scoring backend queried alongside its peers.
///
/// Implementations own their prompt and response parsing and must report
/// every failure through [`ProviderResult::failure`] instead of erroring.
#[async_trait]
pub trait ScoringProvider: Send + Sync {
    /// Stable name, used as the key for this provider's stored fields.
    fn name(&self) -> &str;

    /// Score `subject` for `period`.
    async fn analyze(&self, subject: &Subject, period: &str) -> ProviderResult;
}
