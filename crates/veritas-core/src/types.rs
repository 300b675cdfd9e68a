//! Domain types shared by the core and the runtime.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::key::VerdictKey;
use crate::text::{self, ValidationError};

/// Identifies an evidence source.
///
/// The derived ordering is the canonical order used when combining scores,
/// so the combined result never depends on completion order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderId {
    /// Fact-check database lookup
    FactCheck,
    /// LLM reasoning pass
    Llm,
    /// Keyword-derived embedding generation (never scored)
    Embedding,
    /// Similarity search against previously stored verdicts
    Vector,
    /// Deterministic regex fallback
    Pattern,
}

impl ProviderId {
    pub const ALL: [ProviderId; 5] = [
        ProviderId::FactCheck,
        ProviderId::Llm,
        ProviderId::Embedding,
        ProviderId::Vector,
        ProviderId::Pattern,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderId::FactCheck => "factcheck",
            ProviderId::Llm => "llm",
            ProviderId::Embedding => "embedding",
            ProviderId::Vector => "vector",
            ProviderId::Pattern => "pattern",
        }
    }

    /// Whether this source needs the network (everything except the pattern fallback).
    pub fn is_remote(&self) -> bool {
        !matches!(self, ProviderId::Pattern)
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ProviderId::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown provider '{}'", s))
    }
}

/// Which evidence sources to consult, and how.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Fact-check lookup only
    Fast,
    /// Fact-check + LLM + embedding, concurrently
    #[default]
    Comprehensive,
    /// Comprehensive + vector similarity
    Deep,
    /// Caller-selected providers
    Custom,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Fast => "fast",
            Strategy::Comprehensive => "comprehensive",
            Strategy::Deep => "deep",
            Strategy::Custom => "custom",
        }
    }

    /// Providers selected by this strategy, in canonical order.
    ///
    /// `custom` uses the toggle set; without one it selects nothing.
    pub fn providers(&self, custom: Option<&ProviderToggleSet>) -> Vec<ProviderId> {
        match self {
            Strategy::Fast => vec![ProviderId::FactCheck],
            Strategy::Comprehensive => {
                vec![ProviderId::FactCheck, ProviderId::Llm, ProviderId::Embedding]
            }
            Strategy::Deep => vec![
                ProviderId::FactCheck,
                ProviderId::Llm,
                ProviderId::Embedding,
                ProviderId::Vector,
            ],
            Strategy::Custom => custom.map(|t| t.enabled()).unwrap_or_default(),
        }
    }

    /// Whether selected providers are fanned out concurrently.
    pub fn is_concurrent(&self) -> bool {
        !matches!(self, Strategy::Fast)
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fast" => Ok(Strategy::Fast),
            "comprehensive" => Ok(Strategy::Comprehensive),
            "deep" => Ok(Strategy::Deep),
            "custom" => Ok(Strategy::Custom),
            other => Err(format!(
                "unknown strategy '{}': expected fast, comprehensive, deep or custom",
                other
            )),
        }
    }
}

/// Provider switches for the `custom` strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProviderToggleSet {
    pub use_fact_check: bool,
    pub use_llm: bool,
    pub use_embedding: bool,
    pub use_vector_search: bool,
}

impl ProviderToggleSet {
    /// Enabled providers in canonical order.
    pub fn enabled(&self) -> Vec<ProviderId> {
        let mut providers = Vec::with_capacity(4);
        if self.use_fact_check {
            providers.push(ProviderId::FactCheck);
        }
        if self.use_llm {
            providers.push(ProviderId::Llm);
        }
        if self.use_embedding {
            providers.push(ProviderId::Embedding);
        }
        if self.use_vector_search {
            providers.push(ProviderId::Vector);
        }
        providers
    }
}

/// Final or per-provider classification of a claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Verified,
    LikelyTrue,
    Uncertain,
    LikelyFalse,
    Disputed,
    NoData,
    Error,
}

impl Classification {
    /// Map a 0-100 score onto the fixed thresholds (first match wins).
    pub fn from_score(score: f64) -> Self {
        if score >= 80.0 {
            Classification::Verified
        } else if score >= 65.0 {
            Classification::LikelyTrue
        } else if score >= 45.0 {
            Classification::Uncertain
        } else if score >= 25.0 {
            Classification::LikelyFalse
        } else {
            Classification::Disputed
        }
    }

    /// Truth value of a graded label, used when a source reports a label
    /// instead of a score. `None` for `no_data` and `error`.
    pub fn truth_value(&self) -> Option<f64> {
        match self {
            Classification::Verified => Some(1.0),
            Classification::LikelyTrue => Some(0.75),
            Classification::Uncertain => Some(0.5),
            Classification::LikelyFalse => Some(0.25),
            Classification::Disputed => Some(0.0),
            Classification::NoData | Classification::Error => None,
        }
    }

    /// Parse a graded label, accepting the legacy reliability vocabulary
    /// (RELIABLE / INCONCLUSIVE / UNFOUNDED / FAKE) and plain true/false.
    pub fn from_label(label: &str) -> Option<Self> {
        let normalized = label.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "verified" | "reliable" | "true" => Some(Classification::Verified),
            "likely_true" | "mostly_true" => Some(Classification::LikelyTrue),
            "uncertain" | "inconclusive" | "mixed" | "unverified" => {
                Some(Classification::Uncertain)
            }
            "likely_false" | "unfounded" | "mostly_false" | "misleading" => {
                Some(Classification::LikelyFalse)
            }
            "disputed" | "fake" | "false" => Some(Classification::Disputed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Classification::Verified => "verified",
            Classification::LikelyTrue => "likely_true",
            Classification::Uncertain => "uncertain",
            Classification::LikelyFalse => "likely_false",
            Classification::Disputed => "disputed",
            Classification::NoData => "no_data",
            Classification::Error => "error",
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a provider result failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ServerError,
    Timeout,
    RateLimited,
    Unauthorized,
    BadRequest,
    Network,
    Parse,
    NotConfigured,
    CollectionNotFound,
    CircuitOpen,
    RateLimitExceeded,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ServerError => "server_error",
            ErrorKind::Timeout => "timeout",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::BadRequest => "bad_request",
            ErrorKind::Network => "network",
            ErrorKind::Parse => "parse",
            ErrorKind::NotConfigured => "not_configured",
            ErrorKind::CollectionNotFound => "collection_not_found",
            ErrorKind::CircuitOpen => "circuit_open",
            ErrorKind::RateLimitExceeded => "rate_limit_exceeded",
            ErrorKind::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output of one provider call for one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvidenceResult {
    pub provider_id: ProviderId,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classification: Option<Classification>,
    /// Confidence in [0, 1]
    #[serde(default)]
    pub confidence: Option<f64>,
    /// Truth score in [0, 1] (1 = true)
    #[serde(default)]
    pub raw_score: Option<f64>,
    pub latency_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl EvidenceResult {
    /// A successful result carrying a score and confidence.
    pub fn scored(provider_id: ProviderId, raw_score: f64, confidence: f64, latency_ms: u64) -> Self {
        let raw_score = raw_score.clamp(0.0, 1.0);
        Self {
            provider_id,
            success: true,
            classification: Some(Classification::from_score(raw_score * 100.0)),
            confidence: Some(confidence.clamp(0.0, 1.0)),
            raw_score: Some(raw_score),
            latency_ms,
            error: None,
            message: None,
        }
    }

    /// A successful call that produced nothing to score.
    pub fn empty(provider_id: ProviderId, latency_ms: u64) -> Self {
        Self {
            provider_id,
            success: true,
            classification: None,
            confidence: None,
            raw_score: None,
            latency_ms,
            error: None,
            message: None,
        }
    }

    pub fn failed(
        provider_id: ProviderId,
        error: ErrorKind,
        message: impl Into<String>,
        latency_ms: u64,
    ) -> Self {
        Self {
            provider_id,
            success: false,
            classification: None,
            confidence: None,
            raw_score: None,
            latency_ms,
            error: Some(error),
            message: Some(message.into()),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// `raw_score` clamped to [0, 1].
    pub fn normalized_score(&self) -> Option<f64> {
        self.raw_score
            .filter(|s| s.is_finite())
            .map(|s| s.clamp(0.0, 1.0))
    }

    /// Usable results take part in score combination.
    pub fn is_usable(&self) -> bool {
        self.success
            && self.normalized_score().is_some()
            && self.confidence.map(|c| c.is_finite()).unwrap_or(false)
    }
}

/// Combined verdict for one claim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Verdict {
    pub request_id: Uuid,
    pub classification: Classification,
    pub overall_confidence: f64,
    pub overall_score: f64,
    pub sources: Vec<ProviderId>,
    pub evidences: Vec<EvidenceResult>,
    pub cached: bool,
    pub processing_time_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Verdict {
    /// Verdict for a request that could not be processed.
    pub fn error(message: impl Into<String>, processing_time_ms: u64) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            classification: Classification::Error,
            overall_confidence: 0.0,
            overall_score: 0.0,
            sources: Vec::new(),
            evidences: Vec::new(),
            cached: false,
            processing_time_ms,
            message: Some(message.into()),
            created_at: Utc::now(),
        }
    }

    /// Copy served from cache: new request id, same outcome.
    pub fn into_cached(self, processing_time_ms: u64) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            cached: true,
            processing_time_ms,
            ..self
        }
    }

    /// Whether any source produced a usable result.
    pub fn has_evidence(&self) -> bool {
        !self.sources.is_empty()
    }
}

/// A validated claim plus the strategy used to verify it.
#[derive(Debug, Clone, PartialEq)]
pub struct VerificationRequest {
    claim_text: String,
    normalized_text: String,
    strategy: Strategy,
    custom_config: Option<ProviderToggleSet>,
}

impl VerificationRequest {
    /// Validate and normalize a claim.
    pub fn new(claim_text: impl Into<String>, strategy: Strategy) -> Result<Self, ValidationError> {
        if strategy == Strategy::Custom {
            return Err(ValidationError::MissingCustomConfig);
        }
        Self::build(claim_text.into(), strategy, None)
    }

    /// Validate a claim for the `custom` strategy.
    pub fn custom(
        claim_text: impl Into<String>,
        toggles: ProviderToggleSet,
    ) -> Result<Self, ValidationError> {
        Self::build(claim_text.into(), Strategy::Custom, Some(toggles))
    }

    fn build(
        claim_text: String,
        strategy: Strategy,
        custom_config: Option<ProviderToggleSet>,
    ) -> Result<Self, ValidationError> {
        let trimmed = text::validate_claim(&claim_text)?.to_string();
        let normalized_text = text::normalize(&trimmed);
        Ok(Self {
            claim_text: trimmed,
            normalized_text,
            strategy,
            custom_config,
        })
    }

    pub fn claim_text(&self) -> &str {
        &self.claim_text
    }

    pub fn normalized_text(&self) -> &str {
        &self.normalized_text
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    pub fn custom_config(&self) -> Option<&ProviderToggleSet> {
        self.custom_config.as_ref()
    }

    /// Providers this request consults.
    pub fn providers(&self) -> Vec<ProviderId> {
        self.strategy.providers(self.custom_config.as_ref())
    }

    /// Structured cache key for this request.
    pub fn key(&self) -> VerdictKey {
        VerdictKey::new(&self.claim_text, self.strategy, &self.providers())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification_thresholds() {
        assert_eq!(Classification::from_score(100.0), Classification::Verified);
        assert_eq!(Classification::from_score(80.0), Classification::Verified);
        assert_eq!(Classification::from_score(79.99), Classification::LikelyTrue);
        assert_eq!(Classification::from_score(65.0), Classification::LikelyTrue);
        assert_eq!(Classification::from_score(45.0), Classification::Uncertain);
        assert_eq!(Classification::from_score(25.0), Classification::LikelyFalse);
        assert_eq!(Classification::from_score(24.9), Classification::Disputed);
        assert_eq!(Classification::from_score(0.0), Classification::Disputed);
    }

    #[test]
    fn test_legacy_labels() {
        assert_eq!(Classification::from_label("RELIABLE"), Some(Classification::Verified));
        assert_eq!(Classification::from_label("Likely True"), Some(Classification::LikelyTrue));
        assert_eq!(Classification::from_label("FAKE"), Some(Classification::Disputed));
        assert_eq!(Classification::from_label("unfounded"), Some(Classification::LikelyFalse));
        assert_eq!(Classification::from_label("no_data"), None);
    }

    #[test]
    fn test_strategy_selection() {
        assert_eq!(Strategy::Fast.providers(None), vec![ProviderId::FactCheck]);
        assert_eq!(Strategy::Deep.providers(None).len(), 4);
        assert!(Strategy::Custom.providers(None).is_empty());

        let toggles = ProviderToggleSet {
            use_llm: true,
            use_vector_search: true,
            ..Default::default()
        };
        assert_eq!(
            Strategy::Custom.providers(Some(&toggles)),
            vec![ProviderId::Llm, ProviderId::Vector]
        );
        assert!(!Strategy::Fast.is_concurrent());
        assert!(Strategy::Comprehensive.is_concurrent());
    }

    #[test]
    fn test_strategy_from_str() {
        assert_eq!("FAST".parse::<Strategy>(), Ok(Strategy::Fast));
        assert!("slow".parse::<Strategy>().is_err());
        assert_eq!("vector".parse::<ProviderId>(), Ok(ProviderId::Vector));
    }

    #[test]
    fn test_request_validation() {
        assert!(VerificationRequest::new("short", Strategy::Fast).is_err());
        assert!(matches!(
            VerificationRequest::new("A valid claim text here", Strategy::Custom),
            Err(ValidationError::MissingCustomConfig)
        ));

        let request =
            VerificationRequest::new("  The sky   is blue today.  ", Strategy::Fast).unwrap();
        assert_eq!(request.claim_text(), "The sky   is blue today.");
        assert_eq!(request.normalized_text(), "The sky is blue today.");
    }

    #[test]
    fn test_usable_requires_score_and_confidence() {
        assert!(EvidenceResult::scored(ProviderId::Llm, 0.7, 0.8, 5).is_usable());
        assert!(!EvidenceResult::empty(ProviderId::FactCheck, 5).is_usable());
        assert!(!EvidenceResult::failed(ProviderId::Llm, ErrorKind::Timeout, "t", 5).is_usable());
    }

    #[test]
    fn test_evidence_serializes_camel_case() {
        let evidence = EvidenceResult::scored(ProviderId::FactCheck, 1.0, 0.95, 12);
        let json = serde_json::to_value(&evidence).unwrap();
        assert_eq!(json["providerId"], "factcheck");
        assert_eq!(json["rawScore"], 1.0);
        assert_eq!(json["latencyMs"], 12);
    }
}
