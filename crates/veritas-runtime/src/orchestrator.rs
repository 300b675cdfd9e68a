//! Request orchestration.
//!
//! The orchestrator turns a claim into a verdict:
//! - validation (the only error that aborts a request)
//! - cache lookup by structured key
//! - provider selection by strategy, sequential or fanned out via `join_all`
//! - rate limit, circuit breaker, retry and timeout around every remote call
//! - pattern fallback when no remote source produced anything usable
//! - weighted score combination
//! - cache write, cost tracking and queued background writes

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

use veritas_core::{
    ErrorKind, EvidenceResult, KeywordExtractor, ProviderId, ProviderToggleSet, ScoreCombiner,
    ScoreWeights, StopwordKeywordExtractor, Strategy, Verdict, VerificationRequest,
};

use crate::config::duration_str;
use crate::engine::Engine;
use crate::providers::{
    CompletionConfig, EmbeddingClient, EmbeddingGenerator, EvidenceProvider, FactCheckClient,
    FactCheckLookup, LlmProvider, LlmReasoner, PatternFallback, ProviderContext, ProviderError,
    VectorIndex, VectorRecord, VectorSimilarity,
};
use crate::queue::{IndexVerdictJob, PersistCacheJob};
use crate::resilience::RateLimitExceeded;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Upper bound for one provider call, retries included
    #[serde(with = "duration_str")]
    pub call_timeout: Duration,

    /// Longest rate-limit wait before the call is reported as rejected
    #[serde(with = "duration_str")]
    pub max_rate_wait: Duration,

    /// Run the local pattern rules when no remote source is usable
    pub pattern_fallback: bool,

    /// Serve cache misses from similar keys
    pub approximate_cache: bool,

    pub vector_collection: String,

    #[serde(with = "duration_str")]
    pub collection_check_ttl: Duration,

    pub min_similarity: f64,
    pub llm_model: String,
    pub llm_max_tokens: u32,
    pub weights: ScoreWeights,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(20),
            max_rate_wait: Duration::from_secs(2),
            pattern_fallback: true,
            approximate_cache: false,
            vector_collection: "verified_claims".to_string(),
            collection_check_ttl: Duration::from_secs(300),
            min_similarity: 0.85,
            llm_model: CompletionConfig::default().model,
            llm_max_tokens: 500,
            weights: ScoreWeights::default(),
        }
    }
}

/// Per-call options for [`Orchestrator::analyze`].
#[derive(Debug, Clone, Default)]
pub struct AnalyzeOptions {
    pub strategy: Strategy,
    /// Required for [`Strategy::Custom`]
    pub custom: Option<ProviderToggleSet>,
    /// Skip the cache lookup (the result is still cached)
    pub skip_cache: bool,
}

impl AnalyzeOptions {
    pub fn with_strategy(strategy: Strategy) -> Self {
        Self {
            strategy,
            ..Default::default()
        }
    }

    pub fn custom(toggles: ProviderToggleSet) -> Self {
        Self {
            strategy: Strategy::Custom,
            custom: Some(toggles),
            skip_cache: false,
        }
    }

    pub fn skip_cache(mut self) -> Self {
        self.skip_cache = true;
        self
    }
}

/// Errors from assembling an orchestrator.
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("provider {0} registered more than once")]
    DuplicateProvider(ProviderId),

    #[error("invalid orchestrator config: {0}")]
    InvalidConfig(String),
}

/// One provider's contribution to a request.
struct ProviderOutcome {
    evidence: EvidenceResult,
    embedding: Option<Vec<f32>>,
}

impl ProviderOutcome {
    fn failed(
        provider: ProviderId,
        kind: ErrorKind,
        message: impl Into<String>,
        latency_ms: u64,
    ) -> Self {
        Self {
            evidence: EvidenceResult::failed(provider, kind, message, latency_ms),
            embedding: None,
        }
    }
}

pub struct Orchestrator {
    engine: Arc<Engine>,
    config: OrchestratorConfig,
    providers: BTreeMap<ProviderId, Arc<dyn EvidenceProvider>>,
    pattern: Arc<dyn EvidenceProvider>,
    keywords: Arc<dyn KeywordExtractor>,
    combiner: ScoreCombiner,
    vector_index: Option<Arc<dyn VectorIndex>>,
}

impl Orchestrator {
    pub fn builder(engine: Arc<Engine>) -> OrchestratorBuilder {
        OrchestratorBuilder::new(engine)
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Providers with a registered adapter.
    pub fn registered(&self) -> Vec<ProviderId> {
        self.providers.keys().copied().collect()
    }

    /// Verify a claim. Always returns a well-formed verdict; invalid input
    /// yields an `error` verdict without calling any provider.
    pub async fn analyze(&self, claim: &str, options: AnalyzeOptions) -> Verdict {
        let started = Instant::now();
        let request = match (options.strategy, options.custom) {
            (Strategy::Custom, Some(toggles)) => VerificationRequest::custom(claim, toggles),
            (strategy, _) => VerificationRequest::new(claim, strategy),
        };

        match request {
            Ok(request) => self.run(&request, options.skip_cache, started).await,
            Err(e) => {
                tracing::warn!(error = %e, strategy = %options.strategy, "claim rejected");
                Verdict::error(e.to_string(), elapsed_ms(started))
            }
        }
    }

    /// Verify an already validated request.
    pub async fn analyze_request(&self, request: &VerificationRequest) -> Verdict {
        self.run(request, false, Instant::now()).await
    }

    async fn run(&self, request: &VerificationRequest, skip_cache: bool, started: Instant) -> Verdict {
        let strategy = request.strategy();
        let key = request.key();
        let cache_key = key.render();

        if !skip_cache {
            let cached = if self.config.approximate_cache {
                self.engine.cache().get(&cache_key)
            } else {
                self.engine.cache().get_exact(&cache_key)
            };
            if let Some(verdict) = cached {
                tracing::info!(
                    strategy = %strategy,
                    classification = %verdict.classification,
                    "verdict served from cache"
                );
                return verdict.into_cached(elapsed_ms(started));
            }
        }

        let claim = request.normalized_text();
        let keywords = self.keywords.extract_for_fact_check(claim);
        let ctx = ProviderContext::new(strategy, keywords);
        let selected = request.providers();

        let outcomes: Vec<ProviderOutcome> = if strategy.is_concurrent() {
            join_all(
                selected
                    .iter()
                    .map(|p| self.call_provider(*p, claim, &ctx, key.digest())),
            )
            .await
        } else {
            let mut outcomes = Vec::with_capacity(selected.len());
            for provider in &selected {
                outcomes.push(self.call_provider(*provider, claim, &ctx, key.digest()).await);
            }
            outcomes
        };

        let embedding = [ProviderId::Embedding, ProviderId::Vector]
            .iter()
            .find_map(|id| {
                outcomes
                    .iter()
                    .find(|o| o.evidence.provider_id == *id)
                    .and_then(|o| o.embedding.clone())
            });
        let mut evidences: Vec<EvidenceResult> = outcomes.into_iter().map(|o| o.evidence).collect();

        let remote_usable = evidences
            .iter()
            .any(|e| e.provider_id.is_remote() && e.is_usable());
        if !remote_usable && self.config.pattern_fallback {
            if let Some(fallback) = self.run_pattern_fallback(claim, &ctx).await {
                evidences.push(fallback);
            }
        }

        let verdict = self.combiner.verdict(evidences, elapsed_ms(started));
        tracing::info!(
            request_id = %ctx.request_id,
            strategy = %strategy,
            classification = %verdict.classification,
            score = verdict.overall_score,
            confidence = verdict.overall_confidence,
            latency_ms = verdict.processing_time_ms,
            "verdict"
        );

        if verdict.has_evidence() {
            self.engine.cache().set(cache_key, verdict.clone(), None);
            self.queue_writes(request, key.digest(), &verdict, embedding);
        }

        verdict
    }

    /// Call one provider behind the rate limiter, breaker, retry and timeout.
    async fn call_provider(
        &self,
        provider_id: ProviderId,
        claim: &str,
        ctx: &ProviderContext,
        fingerprint: &str,
    ) -> ProviderOutcome {
        let started = Instant::now();

        let Some(provider) = self.providers.get(&provider_id) else {
            return ProviderOutcome::failed(
                provider_id,
                ErrorKind::NotConfigured,
                format!("no adapter registered for {}", provider_id),
                0,
            );
        };

        let breaker = self.engine.circuit_breaker();
        if let Err(open) = breaker.try_acquire(provider_id) {
            tracing::warn!(provider = %provider_id, "circuit open, skipping provider");
            return ProviderOutcome::failed(
                provider_id,
                ErrorKind::CircuitOpen,
                open.to_string(),
                elapsed_ms(started),
            );
        }

        let limiter = self.engine.rate_limiter();
        let decision = limiter.check_limit(provider_id);
        if !decision.allowed {
            if decision.wait <= self.config.max_rate_wait {
                limiter.wait_for_slot(provider_id).await;
            } else {
                breaker.release(provider_id);
                let rejected = RateLimitExceeded {
                    provider: provider_id,
                    wait: decision.wait,
                };
                tracing::warn!(
                    provider = %provider_id,
                    wait_ms = u64::try_from(decision.wait.as_millis()).unwrap_or(u64::MAX),
                    "rate limit wait too long"
                );
                return ProviderOutcome::failed(
                    provider_id,
                    ErrorKind::RateLimitExceeded,
                    rejected.to_string(),
                    elapsed_ms(started),
                );
            }
        }

        let timeout = self.config.call_timeout;
        let attempt = self.engine.retry().run(|| provider.call(claim, ctx));
        let result = match tokio::time::timeout(timeout, attempt).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout(timeout)),
        };
        let latency_ms = elapsed_ms(started);

        match result {
            Ok(output) => {
                breaker.record_success(provider_id);
                if let Some(usage) = &output.usage {
                    let operation = format!("verify:{}", ctx.strategy);
                    self.engine
                        .cost()
                        .track_request(usage, provider_id, &operation, fingerprint);
                }
                tracing::debug!(provider = %provider_id, latency_ms, "provider call succeeded");

                let embedding = output.embedding.clone();
                ProviderOutcome {
                    evidence: output.into_evidence(provider_id, latency_ms),
                    embedding,
                }
            }
            Err(e) => {
                if e.counts_as_breaker_failure() {
                    breaker.record_failure(provider_id);
                } else {
                    breaker.release(provider_id);
                }
                tracing::warn!(provider = %provider_id, error = %e, latency_ms, "provider call failed");
                ProviderOutcome::failed(provider_id, e.kind(), e.to_string(), latency_ms)
            }
        }
    }

    /// Local rules; kept only when a rule fired.
    async fn run_pattern_fallback(&self, claim: &str, ctx: &ProviderContext) -> Option<EvidenceResult> {
        let started = Instant::now();
        match self.pattern.call(claim, ctx).await {
            Ok(output) => {
                let evidence = output.into_evidence(ProviderId::Pattern, elapsed_ms(started));
                if evidence.is_usable() {
                    tracing::warn!(strategy = %ctx.strategy, "no remote evidence, using pattern fallback");
                    Some(evidence)
                } else {
                    None
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "pattern fallback failed");
                None
            }
        }
    }

    fn queue_writes(
        &self,
        request: &VerificationRequest,
        digest: &str,
        verdict: &Verdict,
        embedding: Option<Vec<f32>>,
    ) {
        let Some(queue) = self.engine.queue() else {
            return;
        };

        if let Some(store) = self.engine.store() {
            queue.enqueue(Box::new(PersistCacheJob::new(
                Arc::clone(self.engine.cache()),
                Arc::clone(store),
            )));
        }

        if let (Some(index), Some(vector)) = (&self.vector_index, embedding) {
            let record = VectorRecord {
                id: digest.to_string(),
                vector,
                claim: request.normalized_text().to_string(),
                classification: verdict.classification,
                overall_score: verdict.overall_score,
                confidence: verdict.overall_confidence,
            };
            queue.enqueue(Box::new(IndexVerdictJob::new(
                Arc::clone(index),
                self.config.vector_collection.clone(),
                record,
            )));
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Assembles an [`Orchestrator`] from an engine and adapters.
///
/// Adapters can be registered directly or built from collaborator clients;
/// client-built adapters pick up the orchestrator config at `build` time.
pub struct OrchestratorBuilder {
    engine: Arc<Engine>,
    config: Option<OrchestratorConfig>,
    providers: Vec<Arc<dyn EvidenceProvider>>,
    keywords: Option<Arc<dyn KeywordExtractor>>,
    fact_check: Option<Arc<dyn FactCheckClient>>,
    llm: Option<Arc<dyn LlmProvider>>,
    embedding: Option<Arc<dyn EmbeddingClient>>,
    vector: Option<(Arc<dyn VectorIndex>, Arc<dyn EmbeddingClient>)>,
}

impl OrchestratorBuilder {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            config: None,
            providers: Vec::new(),
            keywords: None,
            fact_check: None,
            llm: None,
            embedding: None,
            vector: None,
        }
    }

    /// Defaults to the engine config's `orchestrator` section.
    pub fn config(mut self, config: OrchestratorConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Register a ready-made adapter. A `pattern` adapter replaces the
    /// built-in fallback.
    pub fn provider(mut self, provider: Arc<dyn EvidenceProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    pub fn keyword_extractor(mut self, extractor: Arc<dyn KeywordExtractor>) -> Self {
        self.keywords = Some(extractor);
        self
    }

    pub fn fact_check_client(mut self, client: Arc<dyn FactCheckClient>) -> Self {
        self.fact_check = Some(client);
        self
    }

    pub fn llm_client(mut self, client: Arc<dyn LlmProvider>) -> Self {
        self.llm = Some(client);
        self
    }

    pub fn embedding_client(mut self, client: Arc<dyn EmbeddingClient>) -> Self {
        self.embedding = Some(client);
        self
    }

    /// Similarity search over `index`; verdicts with an embedding are also
    /// indexed there in the background.
    pub fn vector_search(
        mut self,
        index: Arc<dyn VectorIndex>,
        embedder: Arc<dyn EmbeddingClient>,
    ) -> Self {
        self.vector = Some((index, embedder));
        self
    }

    pub fn build(self) -> Result<Orchestrator, OrchestratorError> {
        let config = self
            .config
            .unwrap_or_else(|| self.engine.config().orchestrator.clone());

        let weights = config.weights;
        let all = [weights.factcheck, weights.llm, weights.vector, weights.pattern];
        if all.iter().any(|w| !w.is_finite() || *w < 0.0) || all.iter().sum::<f64>() <= 0.0 {
            return Err(OrchestratorError::InvalidConfig(
                "score weights must be non-negative with a positive sum".to_string(),
            ));
        }

        let mut adapters = self.providers;
        if let Some(client) = self.fact_check {
            adapters.push(Arc::new(FactCheckLookup::new(client)));
        }
        if let Some(client) = self.llm {
            let completion = CompletionConfig {
                model: config.llm_model.clone(),
                max_tokens: config.llm_max_tokens,
                ..Default::default()
            };
            adapters.push(Arc::new(LlmReasoner::new(client, completion)));
        }
        if let Some(client) = self.embedding {
            adapters.push(Arc::new(EmbeddingGenerator::new(client)));
        }
        let mut vector_index = None;
        if let Some((index, embedder)) = self.vector {
            let similarity = VectorSimilarity::new(
                Arc::clone(&index),
                embedder,
                config.vector_collection.clone(),
            )
            .with_min_similarity(config.min_similarity)
            .with_collection_check_ttl(config.collection_check_ttl);
            adapters.push(Arc::new(similarity));
            vector_index = Some(index);
        }

        let mut providers = BTreeMap::new();
        let mut pattern: Option<Arc<dyn EvidenceProvider>> = None;
        for adapter in adapters {
            let id = adapter.id();
            if id == ProviderId::Pattern {
                if pattern.replace(adapter).is_some() {
                    return Err(OrchestratorError::DuplicateProvider(id));
                }
            } else if providers.insert(id, adapter).is_some() {
                return Err(OrchestratorError::DuplicateProvider(id));
            }
        }

        tracing::debug!(providers = ?providers.keys().collect::<Vec<_>>(), "orchestrator built");

        Ok(Orchestrator {
            engine: self.engine,
            combiner: ScoreCombiner::new(config.weights),
            config,
            providers,
            pattern: pattern.unwrap_or_else(|| Arc::new(PatternFallback::new())),
            keywords: self
                .keywords
                .unwrap_or_else(|| Arc::new(StopwordKeywordExtractor::new())),
            vector_index,
        })
    }
}
