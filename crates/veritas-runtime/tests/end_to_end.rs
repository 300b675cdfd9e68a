//! Full request flows through the orchestrator with scripted collaborators.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use veritas_core::{Classification, ErrorKind, ProviderId, ProviderToggleSet, Strategy};
use veritas_runtime::providers::{
    ChatMessage, CompletionConfig, CompletionResponse, Embedding, FactCheckResponse,
    FactCheckReview, InMemoryVectorIndex, TokenUsage,
};
use veritas_runtime::{
    AnalyzeOptions, Engine, EngineConfig, EmbeddingClient, FactCheckClient, LlmProvider,
    Orchestrator, ProviderError, VectorIndex,
};

const CLAIM: &str = "The national census counted 203 million residents in 2022";

// =============================================================================
// Scripted collaborators
// =============================================================================

struct ScriptedFactCheck {
    rating: &'static str,
    delay: Duration,
    calls: AtomicUsize,
}

impl ScriptedFactCheck {
    fn rating(rating: &'static str) -> Arc<Self> {
        Arc::new(Self {
            rating,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        })
    }

    fn hanging() -> Arc<Self> {
        Arc::new(Self {
            rating: "True",
            delay: Duration::from_secs(120),
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl FactCheckClient for ScriptedFactCheck {
    async fn search(
        &self,
        _keywords: &[String],
        _claim: &str,
    ) -> Result<FactCheckResponse, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        Ok(FactCheckResponse {
            found: true,
            reviews: vec![FactCheckReview {
                rating: self.rating.to_string(),
                publisher: Some("Agência Lupa".to_string()),
                url: None,
            }],
        })
    }
}

struct ScriptedLlm {
    content: &'static str,
    delay: Duration,
    calls: AtomicUsize,
}

impl ScriptedLlm {
    fn answering(content: &'static str) -> Arc<Self> {
        Arc::new(Self {
            content,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        })
    }

    fn hanging() -> Arc<Self> {
        Arc::new(Self {
            content: "{}",
            delay: Duration::from_secs(120),
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl LlmProvider for ScriptedLlm {
    async fn complete(
        &self,
        _messages: Vec<ChatMessage>,
        config: &CompletionConfig,
    ) -> Result<CompletionResponse, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        Ok(CompletionResponse {
            content: self.content.to_string(),
            usage: TokenUsage {
                prompt_tokens: 320,
                completion_tokens: 80,
            },
            model: config.model.clone(),
        })
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

struct ScriptedEmbedder {
    delay: Duration,
    calls: AtomicUsize,
}

impl ScriptedEmbedder {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        })
    }

    fn hanging() -> Arc<Self> {
        Arc::new(Self {
            delay: Duration::from_secs(120),
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl EmbeddingClient for ScriptedEmbedder {
    async fn embed(&self, _text: &str) -> Result<Embedding, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        Ok(Embedding {
            vector: vec![0.6, 0.8, 0.0],
            model: "text-embedding-3-small".to_string(),
            units: 12,
        })
    }
}

fn engine() -> Arc<Engine> {
    Arc::new(Engine::new(EngineConfig::default()).unwrap())
}

const LLM_TRUE: &str =
    r#"{"classification": "verified", "confidence": 0.85, "reasoning": "Matches the census release"}"#;

// =============================================================================
// Scenarios
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_fast_strategy_with_true_rating() {
    let fact_check = ScriptedFactCheck::rating("true");
    let orchestrator = Orchestrator::builder(engine())
        .fact_check_client(fact_check.clone())
        .build()
        .unwrap();

    let verdict = orchestrator
        .analyze(
            "Segundo pesquisa da universidade, a taxa é de 5%",
            AnalyzeOptions::with_strategy(Strategy::Fast),
        )
        .await;

    assert!(matches!(
        verdict.classification,
        Classification::Verified | Classification::LikelyTrue
    ));
    assert_eq!(verdict.sources, vec![ProviderId::FactCheck]);
    assert_eq!(verdict.evidences.len(), 1);
    assert!(!verdict.cached);
    assert_eq!(fact_check.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_every_provider_timing_out_gives_no_data() {
    let orchestrator = Orchestrator::builder(engine())
        .fact_check_client(ScriptedFactCheck::hanging())
        .llm_client(ScriptedLlm::hanging())
        .embedding_client(ScriptedEmbedder::hanging())
        .build()
        .unwrap();

    let verdict = orchestrator.analyze(CLAIM, AnalyzeOptions::default()).await;

    assert_eq!(verdict.classification, Classification::NoData);
    assert_eq!(verdict.overall_confidence, 0.0);
    assert_eq!(verdict.evidences.len(), 3);
    assert!(verdict.evidences.iter().all(|e| !e.success));
    assert!(verdict
        .evidences
        .iter()
        .all(|e| e.error == Some(ErrorKind::Timeout)));
    assert!(verdict.message.is_some());
    // nothing usable, so nothing cached
    assert!(orchestrator.engine().cache().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_repeated_request_is_served_from_cache() {
    let fact_check = ScriptedFactCheck::rating("Verdadeiro");
    let llm = ScriptedLlm::answering(LLM_TRUE);
    let embedder = ScriptedEmbedder::new();
    let orchestrator = Orchestrator::builder(engine())
        .fact_check_client(fact_check.clone())
        .llm_client(llm.clone())
        .embedding_client(embedder.clone())
        .build()
        .unwrap();

    let first = orchestrator.analyze(CLAIM, AnalyzeOptions::default()).await;
    let second = orchestrator.analyze(CLAIM, AnalyzeOptions::default()).await;

    assert!(!first.cached);
    assert!(second.cached);
    assert_eq!(first.classification, second.classification);
    assert_eq!(first.overall_score, second.overall_score);
    assert_ne!(first.request_id, second.request_id);

    assert_eq!(fact_check.calls.load(Ordering::SeqCst), 1);
    assert_eq!(llm.calls.load(Ordering::SeqCst), 1);
    assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);
    assert_eq!(orchestrator.engine().cache().stats().hits, 1);
}

#[tokio::test(start_paused = true)]
async fn test_cache_key_ignores_case_and_spacing() {
    let fact_check = ScriptedFactCheck::rating("True");
    let orchestrator = Orchestrator::builder(engine())
        .fact_check_client(fact_check.clone())
        .build()
        .unwrap();
    let options = AnalyzeOptions::with_strategy(Strategy::Fast);

    orchestrator.analyze(CLAIM, options.clone()).await;
    let again = orchestrator
        .analyze(&format!("  {}  ", CLAIM.to_uppercase()), options)
        .await;

    assert!(again.cached);
    assert_eq!(fact_check.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_strategies_do_not_share_cache_entries() {
    let fact_check = ScriptedFactCheck::rating("True");
    let orchestrator = Orchestrator::builder(engine())
        .fact_check_client(fact_check.clone())
        .build()
        .unwrap();

    orchestrator
        .analyze(CLAIM, AnalyzeOptions::with_strategy(Strategy::Fast))
        .await;
    let custom = orchestrator
        .analyze(
            CLAIM,
            AnalyzeOptions::custom(ProviderToggleSet {
                use_fact_check: true,
                ..Default::default()
            }),
        )
        .await;

    assert!(!custom.cached);
    assert_eq!(fact_check.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_invalid_claims_never_reach_providers() {
    let fact_check = ScriptedFactCheck::rating("True");
    let orchestrator = Orchestrator::builder(engine())
        .fact_check_client(fact_check.clone())
        .build()
        .unwrap();

    let too_long = "a".repeat(10_001);
    for claim in ["", "   ", "too short", too_long.as_str()] {
        let verdict = orchestrator.analyze(claim, AnalyzeOptions::default()).await;
        assert_eq!(verdict.classification, Classification::Error);
        assert_eq!(verdict.overall_score, 0.0);
        assert!(verdict.evidences.is_empty());
    }
    assert_eq!(fact_check.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_custom_strategy_runs_only_enabled_providers() {
    let fact_check = ScriptedFactCheck::rating("True");
    let llm = ScriptedLlm::answering(LLM_TRUE);
    let orchestrator = Orchestrator::builder(engine())
        .fact_check_client(fact_check.clone())
        .llm_client(llm.clone())
        .build()
        .unwrap();

    let verdict = orchestrator
        .analyze(
            CLAIM,
            AnalyzeOptions::custom(ProviderToggleSet {
                use_llm: true,
                ..Default::default()
            }),
        )
        .await;

    assert_eq!(verdict.sources, vec![ProviderId::Llm]);
    assert_eq!(fact_check.calls.load(Ordering::SeqCst), 0);
    assert_eq!(llm.calls.load(Ordering::SeqCst), 1);

    let cost = orchestrator.engine().cost();
    assert!(cost.total_cost() > 0.0);
    assert_eq!(
        cost.totals_by_provider()[&ProviderId::Llm].total_requests,
        1
    );
}

#[tokio::test(start_paused = true)]
async fn test_deep_strategy_without_collection() {
    let index = Arc::new(InMemoryVectorIndex::new());
    let embedder = ScriptedEmbedder::new();
    let mut config = EngineConfig::default();
    config.circuit_breaker.failure_threshold = 2;
    let engine = Arc::new(Engine::new(config).unwrap());
    let orchestrator = Orchestrator::builder(Arc::clone(&engine))
        .fact_check_client(ScriptedFactCheck::rating("True"))
        .llm_client(ScriptedLlm::answering(LLM_TRUE))
        .embedding_client(embedder.clone())
        .vector_search(index, embedder)
        .build()
        .unwrap();

    for _ in 0..3 {
        let verdict = orchestrator
            .analyze(CLAIM, AnalyzeOptions::with_strategy(Strategy::Deep).skip_cache())
            .await;
        let vector = verdict
            .evidences
            .iter()
            .find(|e| e.provider_id == ProviderId::Vector)
            .unwrap();
        assert_eq!(vector.error, Some(ErrorKind::CollectionNotFound));
        assert!(verdict.sources.contains(&ProviderId::FactCheck));
    }
    assert!(!engine.circuit_breaker().is_open(ProviderId::Vector));
}

#[tokio::test(start_paused = true)]
async fn test_offline_orchestrator_reports_not_configured() {
    let orchestrator = Orchestrator::builder(engine()).build().unwrap();

    let verdict = orchestrator
        .analyze(
            "URGENTE!!! Compartilhe antes que apaguem, a mídia não mostra",
            AnalyzeOptions::with_strategy(Strategy::Deep),
        )
        .await;

    let failed: Vec<_> = verdict.evidences.iter().filter(|e| !e.success).collect();
    assert_eq!(failed.len(), 4);
    assert!(failed
        .iter()
        .all(|e| e.error == Some(ErrorKind::NotConfigured)));
    assert_eq!(verdict.sources, vec![ProviderId::Pattern]);
    assert_eq!(verdict.classification, Classification::Disputed);
}

#[tokio::test]
async fn test_verdicts_are_persisted_and_indexed_in_background() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("verdicts.json");
    let mut config = EngineConfig::default();
    config.cache.store_path = Some(path.clone());
    let (engine, tasks) = Engine::start(config).await.unwrap();

    let index = Arc::new(InMemoryVectorIndex::new());
    index.create_collection("verified_claims");
    let embedder = ScriptedEmbedder::new();
    let orchestrator = Orchestrator::builder(Arc::clone(&engine))
        .fact_check_client(ScriptedFactCheck::rating("True"))
        .llm_client(ScriptedLlm::answering(LLM_TRUE))
        .embedding_client(embedder.clone())
        .vector_search(index.clone() as Arc<dyn VectorIndex>, embedder)
        .build()
        .unwrap();

    let verdict = orchestrator.analyze(CLAIM, AnalyzeOptions::default()).await;
    assert!(verdict.has_evidence());

    let queue = engine.queue().unwrap();
    for _ in 0..200 {
        if queue.stats().completed >= 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(queue.stats().completed, 2);
    assert_eq!(index.record_count("verified_claims"), Some(1));
    assert!(path.exists());

    tasks.abort();

    // a fresh engine over the same file starts warm
    let mut config = EngineConfig::default();
    config.cache.store_path = Some(path);
    let (restored, tasks) = Engine::start(config).await.unwrap();
    assert_eq!(restored.cache().len(), 1);
    tasks.abort();
}
