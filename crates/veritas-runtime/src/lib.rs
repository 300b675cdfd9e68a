//! # veritas-runtime
//!
//! Async verification engine for Veritas.
//!
//! This crate wraps the deterministic pieces of `veritas-core` with
//! everything that talks to the outside world or keeps state over time:
//! - provider adapters behind one [`EvidenceProvider`] trait
//! - per-provider rate limits, retries and circuit breakers
//! - an adaptive verdict cache with optional persistence
//! - usage cost tracking against a budget
//! - a background write queue
//!
//! ## Important
//!
//! Concrete HTTP clients are not part of this crate. Callers supply them
//! through [`FactCheckClient`], [`LlmProvider`], [`EmbeddingClient`] and
//! [`VectorIndex`]. Anything left unregistered reports `not_configured`.
//!
//! ## Example
//!
//! ```rust,ignore
//! use veritas_runtime::{AnalyzeOptions, Engine, EngineConfig, Orchestrator};
//! use veritas_core::Strategy;
//!
//! let (engine, _tasks) = Engine::start(EngineConfig::from_env()?).await?;
//! let orchestrator = Orchestrator::builder(engine)
//!     .fact_check_client(my_fact_check_client)
//!     .llm_client(my_llm_client)
//!     .build()?;
//!
//! let verdict = orchestrator
//!     .analyze("Vaccines cause autism", AnalyzeOptions::with_strategy(Strategy::Comprehensive))
//!     .await;
//! println!("{} ({:.1})", verdict.classification, verdict.overall_score);
//! ```

pub mod cache;
pub mod config;
pub mod engine;
pub mod orchestrator;
pub mod prompts;
pub mod providers;
pub mod queue;
pub mod resilience;

pub use cache::{
    AdaptiveCache, CacheConfig, CacheError, CacheStats, CacheStore, JsonFileStore, MemoryStore,
    PersistedEntry,
};
pub use config::{ConfigError, EngineConfig, RateLimitsConfig};
pub use engine::{Engine, EngineTasks};
pub use orchestrator::{
    AnalyzeOptions, Orchestrator, OrchestratorBuilder, OrchestratorConfig, OrchestratorError,
};
pub use providers::{
    EmbeddingClient, EvidenceProvider, FactCheckClient, LlmProvider, ProviderContext,
    ProviderError, ProviderOutput, UsageReport, VectorIndex,
};
pub use queue::{BackgroundJob, JobError, QueueConfig, QueueStats, WriteQueue};
pub use resilience::{
    CircuitBreaker, CircuitBreakerConfig, CostConfig, CostTracker, RateLimitConfig,
    RateLimitStrategy, RateLimiter, RetryExecutor, RetryPolicy,
};
