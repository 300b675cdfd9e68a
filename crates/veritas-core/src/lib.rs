//! # veritas-core
//!
//! Deterministic building blocks for claim verification.
//!
//! This crate holds everything that does not touch the network:
//! - the domain model (`ProviderId`, `Strategy`, `EvidenceResult`, `Verdict`)
//! - claim validation and normalization
//! - structured cache keys
//! - weighted score combination
//! - the regex fallback rules
//! - LLM response parsing and JSON Schema validation
//!
//! ## Key Guarantees
//!
//! 1. **Deterministic**: the same evidence always combines to the same verdict
//! 2. **Order-independent**: provider completion order never changes a score
//! 3. **Bounded**: scores stay in [0, 100], confidences in [0, 1]
//!
//! ## Example
//!
//! ```rust,ignore
//! use veritas_core::{assess_offline, Classification};
//!
//! let verdict = assess_offline("URGENTE!!! Compartilhe antes que apaguem")?;
//! assert_eq!(verdict.classification, Classification::Disputed);
//! ```

pub mod key;
pub mod llm_response;
pub mod patterns;
pub mod schema;
pub mod scoring;
pub mod text;
pub mod types;

pub use key::VerdictKey;
pub use llm_response::{parse_llm_response, LlmAssessment, LlmResponseError};
pub use patterns::{PatternAssessment, PatternSignal, SignalKind};
pub use schema::{validate_verdict, SchemaError};
pub use scoring::{CombinedScore, ScoreCombiner, ScoreWeights};
pub use text::{KeywordExtractor, StopwordKeywordExtractor, ValidationError};
pub use types::{
    Classification, ErrorKind, EvidenceResult, ProviderId, ProviderToggleSet, Strategy,
    Verdict, VerificationRequest,
};

use std::time::Instant;

/// Turn a pattern assessment into a provider result.
///
/// A claim with no signal yields a successful result with nothing to score.
pub fn pattern_evidence(assessment: &PatternAssessment, latency_ms: u64) -> EvidenceResult {
    match (assessment.score, assessment.confidence) {
        (Some(score), Some(confidence)) => {
            EvidenceResult::scored(ProviderId::Pattern, score, confidence, latency_ms)
                .with_message(assessment.signal_names().join(", "))
        }
        _ => EvidenceResult::empty(ProviderId::Pattern, latency_ms),
    }
}

/// Verify a claim with the pattern rules alone.
///
/// No network, no cache. Useful as a smoke check and for the CLI
/// `patterns` command.
pub fn assess_offline(claim: &str) -> Result<Verdict, ValidationError> {
    let started = Instant::now();
    let request = VerificationRequest::new(claim, Strategy::Fast)?;
    let assessment = patterns::assess(request.normalized_text());
    let elapsed = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

    let evidence = pattern_evidence(&assessment, elapsed);
    Ok(ScoreCombiner::default().verdict(vec![evidence], elapsed))
}
