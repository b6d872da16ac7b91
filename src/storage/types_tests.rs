//! Unit tests for storage record types.
//!
//! Covers status parsing, the PENDING-only transition rule, resets and the
//! composite retry cap.

use super::*;
use std::str::FromStr;

// ============================================================================
// AnalysisStatus tests
// ============================================================================

#[test]
fn test_analysis_status_round_trips_through_str() {
    for status in [
        AnalysisStatus::Pending,
        AnalysisStatus::Completed,
        AnalysisStatus::Failed,
    ] {
        assert_eq!(AnalysisStatus::from_str(status.as_str()).unwrap(), status);
    }
}

#[test]
fn test_analysis_status_parse_is_case_insensitive() {
    assert_eq!(AnalysisStatus::from_str("COMPLETED").unwrap(), AnalysisStatus::Completed);
    assert!(AnalysisStatus::from_str("running").is_err());
}

#[test]
fn test_analysis_status_terminal() {
    assert!(!AnalysisStatus::Pending.is_terminal());
    assert!(AnalysisStatus::Completed.is_terminal());
    assert!(AnalysisStatus::Failed.is_terminal());
}

#[test]
fn test_analysis_status_serializes_screaming_case() {
    let json = serde_json::to_string(&AnalysisStatus::Completed).unwrap();
    assert_eq!(json, "\"COMPLETED\"");
}

// ============================================================================
// AnalysisStatusRecord tests
// ============================================================================

#[test]
fn test_pending_record() {
    let record = AnalysisStatusRecord::pending("vid1");
    assert_eq!(record.status, AnalysisStatus::Pending);
    assert_eq!(record.item_id, "vid1");
    assert!(record.owner_id.is_none());
    assert!(!record.analysis_id.is_empty());
    assert_eq!(record.audit.created_at, record.audit.updated_at);
}

#[test]
fn test_with_owner() {
    let record = AnalysisStatusRecord::pending("vid1").with_owner("user-7");
    assert_eq!(record.owner_id.as_deref(), Some("user-7"));
}

#[test]
fn test_mark_completed_from_pending() {
    let mut record = AnalysisStatusRecord::pending("vid1");
    record
        .mark_completed(Some(71), Some("ok".to_string()), "{\"compositeScore\":71}")
        .unwrap();

    assert_eq!(record.status, AnalysisStatus::Completed);
    assert_eq!(record.composite_score, Some(71));
    assert_eq!(record.summary.as_deref(), Some("ok"));
    assert!(record.raw_result_payload.is_some());
    assert!(record.error_message.is_none());
}

#[test]
fn test_mark_failed_keeps_message() {
    let mut record = AnalysisStatusRecord::pending("vid1");
    record.mark_failed("timeout").unwrap();

    assert_eq!(record.status, AnalysisStatus::Failed);
    assert_eq!(record.error_message.as_deref(), Some("timeout"));
}

#[test]
fn test_terminal_record_rejects_transition() {
    let mut record = AnalysisStatusRecord::pending("vid1");
    record.mark_failed("first").unwrap();

    let err = record.mark_completed(Some(1), None, "{}").unwrap_err();
    assert_eq!(err.from, AnalysisStatus::Failed);
    assert_eq!(err.to, AnalysisStatus::Completed);
    assert_eq!(record.status, AnalysisStatus::Failed);
    assert!(record.mark_failed("second").is_err());
    assert_eq!(record.error_message.as_deref(), Some("first"));
}

#[test]
fn test_reset_pending_clears_outcome_and_keeps_ids() {
    let mut record = AnalysisStatusRecord::pending("vid1").with_owner("user-7");
    let analysis_id = record.analysis_id.clone();
    record.mark_completed(Some(50), Some("s".to_string()), "{}").unwrap();

    record.reset_pending();

    assert_eq!(record.status, AnalysisStatus::Pending);
    assert_eq!(record.analysis_id, analysis_id);
    assert_eq!(record.owner_id.as_deref(), Some("user-7"));
    assert!(record.composite_score.is_none());
    assert!(record.summary.is_none());
    assert!(record.raw_result_payload.is_none());
    assert!(record.mark_failed("again").is_ok());
}

// ============================================================================
// CompositeStatus tests
// ============================================================================

#[test]
fn test_composite_status_strings() {
    assert_eq!(CompositeStatus::InProgress.as_str(), "in_progress");
    assert_eq!(CompositeStatus::InProgress.to_string(), "in_progress");
    assert_eq!(
        CompositeStatus::from_str("IN_PROGRESS").unwrap(),
        CompositeStatus::InProgress
    );
    assert!(CompositeStatus::from_str("done").is_err());
}

// ============================================================================
// CompositeScoreRecord tests
// ============================================================================

fn date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
}

#[test]
fn test_composite_new_is_in_progress() {
    let record = CompositeScoreRecord::new("s1", date(), "monthly");
    assert_eq!(record.status, CompositeStatus::InProgress);
    assert_eq!(record.retry_count, 0);
    assert!(record.provider_scores.is_empty());
    assert!(record.can_retry());
}

#[test]
fn test_can_retry_stops_at_cap() {
    let mut record = CompositeScoreRecord::new("s1", date(), "monthly");
    record.retry_count = CompositeScoreRecord::MAX_RETRIES - 1;
    assert!(record.can_retry());
    record.retry_count = CompositeScoreRecord::MAX_RETRIES;
    assert!(!record.can_retry());
}

#[test]
fn test_provider_score_lookup() {
    let mut record = CompositeScoreRecord::new("s1", date(), "monthly");
    record.provider_scores.insert(
        "rubric".to_string(),
        ProviderScore {
            score: Some(80),
            ..ProviderScore::default()
        },
    );

    assert_eq!(record.provider_score("rubric"), Some(80));
    assert_eq!(record.provider_score("checklist"), None);
}

#[test]
fn test_composite_mark_failed_clears_scores() {
    let mut record = CompositeScoreRecord::new("s1", date(), "monthly");
    record.overall_score = Some(70);
    record.dimension_scores = DimensionScores::uniform(70);
    record
        .provider_scores
        .insert("rubric".to_string(), ProviderScore::default());

    record.mark_failed("All providers failed");

    assert_eq!(record.status, CompositeStatus::Failed);
    assert_eq!(record.error_message.as_deref(), Some("All providers failed"));
    assert!(record.overall_score.is_none());
    assert_eq!(record.dimension_scores, DimensionScores::default());
    assert!(record.provider_scores.is_empty());
}

#[test]
fn test_subject_new_is_active() {
    let subject = Subject::new("s1", "Daily Bulletin");
    assert!(subject.active);
    assert_eq!(subject.name, "Daily Bulletin");
}
