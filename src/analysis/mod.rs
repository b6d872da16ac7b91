//! External per-item analysis: HTTP client, result upsert and the bounded
//! dispatcher driving the PENDING -> COMPLETED | FAILED lifecycle.

mod client;
mod dispatcher;
mod upsert;

pub use client::{AnalysisReply, AnalysisService, HttpAnalysisClient, CALLER_HEADER, IDEMPOTENCY_HEADER};
#[cfg(test)]
pub use client::MockAnalysisService;
pub use dispatcher::{AnalysisDispatcher, AnalysisView, DispatchSummary, DispatcherSettings};
pub use upsert::{ParsedResult, ResultUpsertService, UpsertOutcome};

/// Turn a bare item id into the canonical subject URL. Full URLs pass through.
pub fn canonical_subject_url(prefix: &str, item_id: &str) -> String {
    let trimmed = item_id.trim();
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("{}{}", prefix, trimmed)
    }
}
