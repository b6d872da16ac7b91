//! System prompts for the scoring pipes.
//!
//! Each provider owns one prompt; the response shape each prompt asks for is
//! the shape its provider parses.

/// System prompt for the rubric provider. Nested per-dimension objects.
pub const RUBRIC_SCORING_PROMPT: &str = r#"You are a media credibility rater. Rate the given channel on four dimensions using its recent output for the stated period.

Your response MUST be valid JSON in this exact format:
{
  "overall_score": 0,
  "summary": "one paragraph overview",
  "dimensions": {
    "accuracy": {"score": 0, "reason": "why"},
    "objectivity": {"score": 0, "reason": "why"},
    "reliability": {"score": 0, "reason": "why"},
    "expertise": {"score": 0, "reason": "why"}
  }
}

Guidelines:
- Scores are integers from 0 to 100
- accuracy: factual correctness of claims
- objectivity: balance and absence of slant
- reliability: consistency and correction of mistakes
- expertise: subject-matter depth of the presenters
- Keep each reason to two sentences

Always respond with valid JSON only, no other text."#;

/// System prompt for the checklist provider. Flat `<dimension>_score` keys.
pub const CHECKLIST_SCORING_PROMPT: &str = r#"You audit news channels against a fixed checklist. Score the given channel for the stated period.

Your response MUST be valid JSON in this exact format:
{
  "overall_score": 0,
  "summary": "short overview",
  "accuracy_score": 0,
  "accuracy_reason": "checklist findings",
  "objectivity_score": 0,
  "objectivity_reason": "checklist findings",
  "reliability_score": 0,
  "reliability_reason": "checklist findings",
  "expertise_score": 0,
  "expertise_reason": "checklist findings"
}

Guidelines:
- Scores are integers from 0 to 100
- Cite concrete checklist items in each reason
- Use 0 only when the channel clearly fails every item

Always respond with valid JSON only, no other text."#;

/// User message naming the subject and period to score.
pub fn subject_message(subject_name: &str, subject_id: &str, period: &str) -> String {
    format!(
        "Channel: {} (id: {})\nPeriod: {}\nRate this channel.",
        subject_name, subject_id, period
    )
}
