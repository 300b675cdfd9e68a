//! JSON Schema validation for verdict output and LLM assessments.
//!
//! Both schemas are embedded at compile time and compiled once.

use std::sync::OnceLock;
use thiserror::Error;

use crate::types::Verdict;

const VERDICT_SCHEMA_JSON: &str = include_str!("../schema/verdict.schema.json");
const LLM_ASSESSMENT_SCHEMA_JSON: &str = include_str!("../schema/llm_assessment.schema.json");

static VERDICT_SCHEMA: OnceLock<Result<jsonschema::Validator, String>> = OnceLock::new();
static LLM_ASSESSMENT_SCHEMA: OnceLock<Result<jsonschema::Validator, String>> = OnceLock::new();

#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("Failed to load schema: {0}")]
    LoadError(String),
}

fn compile(source: &str) -> Result<jsonschema::Validator, String> {
    let schema_value: serde_json::Value = match serde_json::from_str(source) {
        Ok(v) => v,
        Err(e) => return Err(format!("Invalid schema JSON: {}", e)),
    };

    match jsonschema::options().build(&schema_value) {
        Ok(v) => Ok(v),
        Err(e) => Err(format!("Failed to compile schema: {}", e)),
    }
}

fn validator(
    cell: &'static OnceLock<Result<jsonschema::Validator, String>>,
    source: &str,
) -> Result<&'static jsonschema::Validator, SchemaError> {
    match cell.get_or_init(|| compile(source)) {
        Ok(v) => Ok(v),
        Err(e) => Err(SchemaError::LoadError(e.clone())),
    }
}

fn collect_errors(
    validator: &jsonschema::Validator,
    value: &serde_json::Value,
) -> Result<(), Vec<String>> {
    let errors: Vec<String> = validator
        .iter_errors(value)
        .map(|e| format!("{} at {}", e, e.instance_path))
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Validate verdict JSON against the output schema.
pub fn validate_verdict_json(value: &serde_json::Value) -> Result<(), Vec<String>> {
    let validator =
        validator(&VERDICT_SCHEMA, VERDICT_SCHEMA_JSON).map_err(|e| vec![e.to_string()])?;
    collect_errors(validator, value)
}

/// Serialize a verdict and validate it against the output schema.
pub fn validate_verdict(verdict: &Verdict) -> Result<(), Vec<String>> {
    let value = serde_json::to_value(verdict).map_err(|e| vec![e.to_string()])?;
    validate_verdict_json(&value)
}

/// Validate a parsed LLM response before its fields are read.
pub fn validate_llm_assessment(value: &serde_json::Value) -> Result<(), Vec<String>> {
    let validator = validator(&LLM_ASSESSMENT_SCHEMA, LLM_ASSESSMENT_SCHEMA_JSON)
        .map_err(|e| vec![e.to_string()])?;
    collect_errors(validator, value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scoring::ScoreCombiner;
    use crate::types::{EvidenceResult, ErrorKind, ProviderId};
    use serde_json::json;

    #[test]
    fn test_combined_verdict_passes_schema() {
        let verdict = ScoreCombiner::default().verdict(
            vec![
                EvidenceResult::scored(ProviderId::FactCheck, 1.0, 0.95, 120),
                EvidenceResult::failed(ProviderId::Llm, ErrorKind::Timeout, "timed out", 20_000),
                EvidenceResult::empty(ProviderId::Embedding, 40),
            ],
            20_150,
        );
        assert!(validate_verdict(&verdict).is_ok());
    }

    #[test]
    fn test_error_verdict_passes_schema() {
        assert!(validate_verdict(&Verdict::error("claim text is empty", 0)).is_ok());
    }

    #[test]
    fn test_out_of_range_score_fails() {
        let mut value = serde_json::to_value(Verdict::error("x", 0)).unwrap();
        value["overallScore"] = json!(140.0);
        let errors = validate_verdict_json(&value).unwrap_err();
        assert!(!errors.is_empty());
    }

    #[test]
    fn test_unknown_classification_fails() {
        let mut value = serde_json::to_value(Verdict::error("x", 0)).unwrap();
        value["classification"] = json!("probably");
        assert!(validate_verdict_json(&value).is_err());
    }

    #[test]
    fn test_evidence_requires_score_fields() {
        let mut value = serde_json::to_value(Verdict::error("x", 0)).unwrap();
        value["evidences"] = json!([{ "providerId": "llm", "success": true }]);
        assert!(validate_verdict_json(&value).is_err());
    }

    #[test]
    fn test_llm_assessment_schema() {
        assert!(validate_llm_assessment(&json!({
            "classification": "likely_true",
            "confidence": 0.8,
            "reasoning": "consistent with official data"
        }))
        .is_ok());
        assert!(validate_llm_assessment(&json!({ "confidence": 0.8 })).is_err());
        assert!(validate_llm_assessment(&json!({
            "classification": "verified",
            "confidence": "high"
        }))
        .is_err());
    }
}
