use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

use super::{Dimension, DimensionRationales, DimensionScores, ProviderResult, ScoringProvider};
use crate::llm::{extract_json_object, LlmClient, Message, PipeRequest};
use crate::prompts::{subject_message, CHECKLIST_SCORING_PROMPT, RUBRIC_SCORING_PROMPT};
use crate::storage::Subject;

/// Provider name of [`RubricScoringProvider`].
pub const RUBRIC_PROVIDER: &str = "rubric";
/// Provider name of [`ChecklistScoringProvider`].
pub const CHECKLIST_PROVIDER: &str = "checklist";

/// Parsed provider payload before it is stamped with provider and subject.
#[derive(Debug)]
struct ParsedScores {
    overall: Option<i64>,
    scores: DimensionScores,
    rationales: DimensionRationales,
    summary: Option<String>,
}

/// Read a 0-100 score from a JSON number or numeric string.
fn score_value(value: &Value) -> Option<i64> {
    let raw = match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse::<f64>().ok().map(|f| f as i64),
        _ => None,
    }?;
    Some(raw.clamp(0, 100))
}

fn text_value(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn finish(mut parsed: ParsedScores) -> Result<ParsedScores, String> {
    let complete = parsed.scores.complete().ok_or_else(|| {
        let missing: Vec<&str> = Dimension::ALL
            .iter()
            .filter(|d| parsed.scores.get(**d).is_none())
            .map(Dimension::as_str)
            .collect();
        format!("missing scores for {}", missing.join(", "))
    })?;

    if parsed.overall.is_none() {
        parsed.overall = Some(complete.iter().sum::<i64>() / complete.len() as i64);
    }
    Ok(parsed)
}

/// `{"dimensions": {"accuracy": {"score": 80, "reason": "..."}, ...}}`
fn parse_rubric(completion: &str) -> Result<ParsedScores, String> {
    let json = extract_json_object(completion).ok_or("completion is not a JSON object")?;
    let dimensions = json
        .get("dimensions")
        .and_then(Value::as_object)
        .ok_or("missing dimensions object")?;

    let mut scores = DimensionScores::default();
    let mut rationales = DimensionRationales::default();
    for dim in Dimension::ALL {
        if let Some(entry) = dimensions.get(dim.as_str()) {
            scores.set(dim, entry.get("score").and_then(score_value));
            rationales.set(dim, text_value(entry.get("reason")));
        }
    }

    finish(ParsedScores {
        overall: json.get("overall_score").and_then(score_value),
        scores,
        rationales,
        summary: text_value(json.get("summary")),
    })
}

/// `{"accuracy_score": 80, "accuracy_reason": "...", ...}`
fn parse_checklist(completion: &str) -> Result<ParsedScores, String> {
    let json = extract_json_object(completion).ok_or("completion is not a JSON object")?;

    let mut scores = DimensionScores::default();
    let mut rationales = DimensionRationales::default();
    for dim in Dimension::ALL {
        let key = dim.as_str();
        scores.set(dim, json.get(format!("{}_score", key)).and_then(score_value));
        rationales.set(dim, text_value(json.get(format!("{}_reason", key))));
    }

    finish(ParsedScores {
        overall: json.get("overall_score").and_then(score_value),
        scores,
        rationales,
        summary: text_value(json.get("summary")),
    })
}

async fn run_pipe(
    llm: &LlmClient,
    provider: &str,
    pipe: &str,
    system_prompt: &str,
    subject: &Subject,
    period: &str,
    parse: fn(&str) -> Result<ParsedScores, String>,
) -> ProviderResult {
    let request = PipeRequest::new(
        pipe,
        vec![
            Message::system(system_prompt),
            Message::user(subject_message(&subject.name, &subject.id, period)),
        ],
    )
    .with_variable("period", period);

    let response = match llm.call_pipe(request).await {
        Ok(r) => r,
        Err(e) => {
            warn!(provider, subject_id = %subject.id, error = %e, "Provider call failed");
            return ProviderResult::failure(provider, &subject.id, e.to_string());
        }
    };

    match parse(&response.completion) {
        Ok(parsed) => {
            info!(provider, subject_id = %subject.id, overall = ?parsed.overall, "Provider scored subject");
            ProviderResult::success(
                provider,
                &subject.id,
                parsed.overall,
                parsed.scores,
                parsed.rationales,
                parsed.summary,
            )
        }
        Err(message) => {
            warn!(provider, subject_id = %subject.id, error = %message, "Provider response unusable");
            ProviderResult::failure(provider, &subject.id, format!("invalid response: {}", message))
        }
    }
}

/// Scores with a rubric pipe returning nested per-dimension objects.
#[derive(Debug, Clone)]
pub struct RubricScoringProvider {
    llm: Arc<LlmClient>,
    pipe: String,
}

impl RubricScoringProvider {
    pub fn new(llm: Arc<LlmClient>, pipe: impl Into<String>) -> Self {
        Self {
            llm,
            pipe: pipe.into(),
        }
    }
}

#[async_trait]
impl ScoringProvider for RubricScoringProvider {
    fn name(&self) -> &str {
        RUBRIC_PROVIDER
    }

    async fn analyze(&self, subject: &Subject, period: &str) -> ProviderResult {
        run_pipe(
            &self.llm,
            RUBRIC_PROVIDER,
            &self.pipe,
            RUBRIC_SCORING_PROMPT,
            subject,
            period,
            parse_rubric,
        )
        .await
    }
}

/// Scores with a checklist pipe returning flat `<dimension>_score` keys.
#[derive(Debug, Clone)]
pub struct ChecklistScoringProvider {
    llm: Arc<LlmClient>,
    pipe: String,
}

impl ChecklistScoringProvider {
    pub fn new(llm: Arc<LlmClient>, pipe: impl Into<String>) -> Self {
        Self {
            llm,
            pipe: pipe.into(),
        }
    }
}

#[async_trait]
impl ScoringProvider for ChecklistScoringProvider {
    fn name(&self) -> &str {
        CHECKLIST_PROVIDER
    }

    async fn analyze(&self, subject: &Subject, period: &str) -> ProviderResult {
        run_pipe(
            &self.llm,
            CHECKLIST_PROVIDER,
            &self.pipe,
            CHECKLIST_SCORING_PROMPT,
            subject,
            period,
            parse_checklist,
        )
        .await
    }
}
