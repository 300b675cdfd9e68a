//! Evidence providers and the collaborator traits they are built on.
//!
//! Every evidence source implements [`EvidenceProvider`]. The orchestrator
//! never talks to an HTTP client directly. Concrete clients for the
//! fact-check API, the LLM, the embedding model and the vector store are
//! supplied by the caller through the traits defined here.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;
use veritas_core::{Classification, ErrorKind, EvidenceResult, ProviderId, Strategy};

mod embedding;
mod fact_check;
mod llm;
mod pattern;
mod vector;

pub use embedding::EmbeddingGenerator;
pub use fact_check::{rating_truth_score, FactCheckLookup};
pub use llm::LlmReasoner;
pub use pattern::PatternFallback;
pub use vector::{cosine_similarity, InMemoryVectorIndex, VectorSimilarity};

/// Errors from provider calls.
#[derive(Error, Debug, Clone)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    HttpError(String),

    #[error("Rate limit exceeded, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    #[error("API error: {status} - {message}")]
    ApiError { status: u16, message: String },

    #[error("JSON parse error: {0}")]
    ParseError(String),

    #[error("Authentication failed")]
    AuthError,

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Vector collection not found: {0}")]
    CollectionNotFound(String),
}

impl ProviderError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProviderError::HttpError(_) => ErrorKind::Network,
            ProviderError::RateLimited { .. } => ErrorKind::RateLimited,
            ProviderError::ApiError { status, .. } => match *status {
                429 => ErrorKind::RateLimited,
                401 | 403 => ErrorKind::Unauthorized,
                s if s >= 500 => ErrorKind::ServerError,
                s if (400..500).contains(&s) => ErrorKind::BadRequest,
                _ => ErrorKind::Internal,
            },
            ProviderError::ParseError(_) => ErrorKind::Parse,
            ProviderError::AuthError => ErrorKind::Unauthorized,
            ProviderError::Timeout(_) => ErrorKind::Timeout,
            ProviderError::NotConfigured(_) => ErrorKind::NotConfigured,
            ProviderError::CollectionNotFound(_) => ErrorKind::CollectionNotFound,
        }
    }

    /// Transient failures: 5xx, timeouts, 429 and transport errors.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::ServerError | ErrorKind::Timeout | ErrorKind::RateLimited | ErrorKind::Network
        )
    }

    /// A missing vector collection is a deployment state, not provider ill health.
    pub fn counts_as_breaker_failure(&self) -> bool {
        !matches!(self, ProviderError::CollectionNotFound(_))
    }
}

/// Metered consumption reported by a paid provider call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageReport {
    pub model: String,
    pub input_units: u64,
    pub output_units: u64,
}

/// Per-request information passed to every provider.
#[derive(Debug, Clone)]
pub struct ProviderContext {
    pub request_id: Uuid,
    pub strategy: Strategy,
    pub keywords: Vec<String>,
}

impl ProviderContext {
    pub fn new(strategy: Strategy, keywords: Vec<String>) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            strategy,
            keywords,
        }
    }
}

/// What a provider returns on a completed call.
#[derive(Debug, Clone, Default)]
pub struct ProviderOutput {
    pub success: bool,
    pub classification: Option<Classification>,
    pub confidence: Option<f64>,
    pub raw_score: Option<f64>,
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub usage: Option<UsageReport>,
    pub embedding: Option<Vec<f32>>,
}

impl ProviderOutput {
    pub fn scored(raw_score: f64, confidence: f64) -> Self {
        let raw_score = raw_score.clamp(0.0, 1.0);
        Self {
            success: true,
            classification: Some(Classification::from_score(raw_score * 100.0)),
            confidence: Some(confidence.clamp(0.0, 1.0)),
            raw_score: Some(raw_score),
            ..Default::default()
        }
    }

    /// Successful call with nothing to score.
    pub fn empty() -> Self {
        Self {
            success: true,
            ..Default::default()
        }
    }

    pub fn with_classification(mut self, classification: Classification) -> Self {
        self.classification = Some(classification);
        self
    }

    pub fn with_usage(mut self, usage: UsageReport) -> Self {
        self.usage = Some(usage);
        self
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    pub fn into_evidence(self, provider_id: ProviderId, latency_ms: u64) -> EvidenceResult {
        let message = self
            .metadata
            .get("summary")
            .and_then(|v| v.as_str())
            .map(str::to_string);
        EvidenceResult {
            provider_id,
            success: self.success,
            classification: self.classification,
            confidence: self.confidence.map(|c| c.clamp(0.0, 1.0)),
            raw_score: self.raw_score,
            latency_ms,
            error: None,
            message,
        }
    }
}

/// One evidence source.
#[async_trait]
pub trait EvidenceProvider: Send + Sync {
    fn id(&self) -> ProviderId;

    async fn call(&self, claim: &str, ctx: &ProviderContext)
        -> Result<ProviderOutput, ProviderError>;
}

// =============================================================================
// Fact-check database
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FactCheckReview {
    /// Publisher's textual rating, e.g. "Falso" or "Mostly True"
    pub rating: String,
    #[serde(default)]
    pub publisher: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FactCheckResponse {
    pub found: bool,
    #[serde(default)]
    pub reviews: Vec<FactCheckReview>,
}

#[async_trait]
pub trait FactCheckClient: Send + Sync {
    async fn search(
        &self,
        keywords: &[String],
        claim: &str,
    ) -> Result<FactCheckResponse, ProviderError>;
}

// =============================================================================
// LLM
// =============================================================================

/// Configuration for a completion request.
#[derive(Debug, Clone)]
pub struct CompletionConfig {
    pub model: String,

    pub max_tokens: u32,

    /// 0.0 for deterministic output
    pub temperature: f32,

    pub timeout: Duration,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            model: "llama-3.1-8b-instant".to_string(),
            max_tokens: 500,
            temperature: 0.0,
            timeout: Duration::from_secs(15),
        }
    }
}

/// A chat message for LLM completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// "system", "user" or "assistant"
    pub role: String,

    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub content: String,

    pub usage: TokenUsage,

    /// Model that actually served the request
    pub model: String,
}

#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub prompt_tokens: u32,

    pub completion_tokens: u32,
}

#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        config: &CompletionConfig,
    ) -> Result<CompletionResponse, ProviderError>;

    /// Provider name for logs.
    fn name(&self) -> &str;
}

// =============================================================================
// Embeddings and vector store
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    pub vector: Vec<f32>,
    pub model: String,
    /// Billable input units (tokens)
    pub units: u64,
}

#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Embedding, ProviderError>;
}

/// A stored verdict returned by similarity search.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorMatch {
    pub id: String,
    /// Cosine similarity in [0, 1]
    pub similarity: f64,
    /// Stored verdict score, 0-100
    pub overall_score: f64,
    pub confidence: f64,
    pub classification: Classification,
}

/// A verdict written to the vector store.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorRecord {
    pub id: String,
    pub vector: Vec<f32>,
    pub claim: String,
    pub classification: Classification,
    pub overall_score: f64,
    pub confidence: f64,
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn collection_exists(&self, collection: &str) -> Result<bool, ProviderError>;

    /// Nearest neighbours, most similar first.
    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
    ) -> Result<Vec<VectorMatch>, ProviderError>;

    async fn upsert(&self, collection: &str, record: VectorRecord) -> Result<(), ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        let server = ProviderError::ApiError {
            status: 503,
            message: "unavailable".into(),
        };
        assert_eq!(server.kind(), ErrorKind::ServerError);
        assert!(server.is_retryable());

        let throttled = ProviderError::ApiError {
            status: 429,
            message: "slow down".into(),
        };
        assert_eq!(throttled.kind(), ErrorKind::RateLimited);
        assert!(throttled.is_retryable());

        for status in [401, 403] {
            let err = ProviderError::ApiError {
                status,
                message: String::new(),
            };
            assert_eq!(err.kind(), ErrorKind::Unauthorized);
            assert!(!err.is_retryable());
        }
        for status in [400, 422] {
            let err = ProviderError::ApiError {
                status,
                message: String::new(),
            };
            assert_eq!(err.kind(), ErrorKind::BadRequest);
            assert!(!err.is_retryable());
        }

        assert!(ProviderError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(ProviderError::HttpError("reset".into()).is_retryable());
        assert!(!ProviderError::ParseError("bad".into()).is_retryable());
        assert!(!ProviderError::NotConfigured("llm".into()).is_retryable());
    }

    #[test]
    fn test_collection_not_found_is_not_breaker_failure() {
        assert!(!ProviderError::CollectionNotFound("verdicts".into()).counts_as_breaker_failure());
        assert!(ProviderError::Timeout(Duration::from_secs(1)).counts_as_breaker_failure());
    }

    #[test]
    fn test_output_into_evidence() {
        let evidence = ProviderOutput::scored(0.8, 1.4)
            .with_metadata("summary", "2 reviews")
            .into_evidence(ProviderId::FactCheck, 33);
        assert!(evidence.is_usable());
        assert_eq!(evidence.confidence, Some(1.0));
        assert_eq!(evidence.message.as_deref(), Some("2 reviews"));
        assert_eq!(evidence.latency_ms, 33);
    }
}
