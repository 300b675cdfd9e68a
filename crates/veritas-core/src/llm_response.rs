//! Parsing of LLM verification responses.
//!
//! The model is asked for a JSON object with `classification`, `confidence`
//! and `reasoning`. Responses are often wrapped in prose or code fences, so
//! the outermost object is extracted first, checked against the assessment
//! schema, and only then read.
//!
//! Confidence precedence: `confidence` when present, else `score` (values in
//! (1, 100] are read as percentages), else 0.5. Out-of-range values are
//! clamped. The truth score leans from 0.5 toward the label's truth value in
//! proportion to confidence.

use serde::Deserialize;
use thiserror::Error;

use crate::schema::validate_llm_assessment;
use crate::types::Classification;

const DEFAULT_CONFIDENCE: f64 = 0.5;

#[derive(Debug, Clone, PartialEq)]
pub struct LlmAssessment {
    pub classification: Classification,
    pub confidence: f64,
    /// Truth score in [0, 1]
    pub truth_score: f64,
    pub reasoning: Option<String>,
    pub key_points: Vec<String>,
}

#[derive(Error, Debug)]
pub enum LlmResponseError {
    #[error("response contains no JSON object")]
    NoJson,

    #[error("response JSON is invalid: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("response does not match assessment schema: {}", .0.join("; "))]
    Schema(Vec<String>),

    #[error("unknown classification label '{0}'")]
    UnknownClassification(String),
}

#[derive(Debug, Deserialize)]
struct RawAssessment {
    classification: String,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    score: Option<f64>,
    #[serde(default)]
    reasoning: Option<String>,
    #[serde(default)]
    key_points: Option<Vec<String>>,
}

/// Slice from the first `{` to the last `}`.
fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&text[start..=end])
}

fn resolve_confidence(confidence: Option<f64>, score: Option<f64>) -> f64 {
    if let Some(c) = confidence.filter(|c| c.is_finite()) {
        return c.clamp(0.0, 1.0);
    }
    match score.filter(|s| s.is_finite()) {
        Some(s) if s > 1.0 && s <= 100.0 => s / 100.0,
        Some(s) => s.clamp(0.0, 1.0),
        None => DEFAULT_CONFIDENCE,
    }
}

/// Truth score implied by a graded label held with `confidence`.
pub fn truth_score(classification: Classification, confidence: f64) -> f64 {
    let truth = classification.truth_value().unwrap_or(0.5);
    (0.5 + (truth - 0.5) * confidence.clamp(0.0, 1.0)).clamp(0.0, 1.0)
}

pub fn parse_llm_response(text: &str) -> Result<LlmAssessment, LlmResponseError> {
    let json = extract_json_object(text).ok_or(LlmResponseError::NoJson)?;
    let value: serde_json::Value = serde_json::from_str(json)?;
    validate_llm_assessment(&value).map_err(LlmResponseError::Schema)?;

    let raw: RawAssessment = serde_json::from_value(value)?;
    let classification = Classification::from_label(&raw.classification)
        .ok_or_else(|| LlmResponseError::UnknownClassification(raw.classification.clone()))?;
    let confidence = resolve_confidence(raw.confidence, raw.score);

    Ok(LlmAssessment {
        classification,
        confidence,
        truth_score: truth_score(classification, confidence),
        reasoning: raw.reasoning.filter(|r| !r.trim().is_empty()),
        key_points: raw.key_points.unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_json() {
        let assessment = parse_llm_response(
            r#"{"classification": "verified", "confidence": 0.9, "reasoning": "Matches census data"}"#,
        )
        .unwrap();
        assert_eq!(assessment.classification, Classification::Verified);
        assert_eq!(assessment.confidence, 0.9);
        assert!((assessment.truth_score - 0.95).abs() < 1e-9);
        assert_eq!(assessment.reasoning.as_deref(), Some("Matches census data"));
    }

    #[test]
    fn test_fenced_json_with_prose() {
        let text = "Here is my analysis:\n```json\n{\"classification\": \"FAKE\", \"confidence\": 1.0}\n```\nThanks.";
        let assessment = parse_llm_response(text).unwrap();
        assert_eq!(assessment.classification, Classification::Disputed);
        assert_eq!(assessment.truth_score, 0.0);
    }

    #[test]
    fn test_confidence_wins_over_score() {
        let assessment =
            parse_llm_response(r#"{"classification": "likely_true", "confidence": 0.4, "score": 90}"#)
                .unwrap();
        assert_eq!(assessment.confidence, 0.4);
    }

    #[test]
    fn test_percentage_score_fallback() {
        let assessment =
            parse_llm_response(r#"{"classification": "likely_false", "score": 80}"#).unwrap();
        assert_eq!(assessment.confidence, 0.8);
        assert!((assessment.truth_score - 0.3).abs() < 1e-9);
    }

    #[test]
    fn test_default_and_clamped_confidence() {
        let default = parse_llm_response(r#"{"classification": "uncertain"}"#).unwrap();
        assert_eq!(default.confidence, DEFAULT_CONFIDENCE);
        assert_eq!(default.truth_score, 0.5);

        let clamped =
            parse_llm_response(r#"{"classification": "verified", "confidence": 3.5}"#).unwrap();
        assert_eq!(clamped.confidence, 1.0);

        let huge = parse_llm_response(r#"{"classification": "verified", "score": 250}"#).unwrap();
        assert_eq!(huge.confidence, 1.0);
    }

    #[test]
    fn test_rejections() {
        assert!(matches!(
            parse_llm_response("I cannot determine this."),
            Err(LlmResponseError::NoJson)
        ));
        assert!(matches!(
            parse_llm_response("{not json}"),
            Err(LlmResponseError::InvalidJson(_))
        ));
        assert!(matches!(
            parse_llm_response(r#"{"confidence": 0.7}"#),
            Err(LlmResponseError::Schema(_))
        ));
        assert!(matches!(
            parse_llm_response(r#"{"classification": "maybe"}"#),
            Err(LlmResponseError::UnknownClassification(_))
        ));
    }
}
