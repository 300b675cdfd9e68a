//! Long-lived services shared by every verification request.

use std::sync::Arc;
use tokio::task::JoinHandle;
use veritas_core::Verdict;

use crate::cache::{AdaptiveCache, CacheStore, JsonFileStore};
use crate::config::{ConfigError, EngineConfig};
use crate::queue::WriteQueue;
use crate::resilience::{CircuitBreaker, CostTracker, RateLimiter, RetryExecutor};

/// The verification engine: cache, limiter, breaker table, retry policy,
/// cost tracker and the optional persistence pieces.
///
/// Built once and shared behind an `Arc`; there is no global state.
pub struct Engine {
    config: EngineConfig,
    cache: Arc<AdaptiveCache<Verdict>>,
    rate_limiter: Arc<RateLimiter>,
    circuit_breaker: Arc<CircuitBreaker>,
    retry: Arc<RetryExecutor>,
    cost: Arc<CostTracker>,
    store: Option<Arc<dyn CacheStore<Verdict>>>,
    queue: Option<WriteQueue>,
}

/// Background tasks started by [`Engine::start`].
pub struct EngineTasks {
    pub queue: JoinHandle<()>,
    pub sweeper: JoinHandle<()>,
}

impl EngineTasks {
    pub fn abort(&self) {
        self.queue.abort();
        self.sweeper.abort();
    }
}

impl Engine {
    /// Build the engine without spawning anything.
    ///
    /// A `cache.store_path` in the config gets a [`JsonFileStore`].
    pub fn new(config: EngineConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let rate_limiter = RateLimiter::with_limits(
            config.rate_limits.default.clone(),
            config
                .rate_limits
                .providers
                .iter()
                .map(|(provider, limit)| (*provider, limit.clone())),
        );
        let store = config
            .cache
            .store_path
            .as_ref()
            .map(|path| Arc::new(JsonFileStore::new(path)) as Arc<dyn CacheStore<Verdict>>);

        Ok(Self {
            cache: Arc::new(AdaptiveCache::new(config.cache.clone())),
            rate_limiter: Arc::new(rate_limiter),
            circuit_breaker: Arc::new(CircuitBreaker::new(config.circuit_breaker.clone())),
            retry: Arc::new(RetryExecutor::new(config.retry.clone())),
            cost: Arc::new(CostTracker::new(config.cost.clone())),
            store,
            queue: None,
            config,
        })
    }

    /// Build the engine, restore the cache from its store and start the
    /// write queue and cache sweeper.
    pub async fn start(config: EngineConfig) -> Result<(Arc<Self>, EngineTasks), ConfigError> {
        let (queue, queue_task) = WriteQueue::spawn(config.queue.clone());
        let engine = Self::new(config)?.with_queue(queue);

        if let Some(store) = &engine.store {
            let restored = engine.cache.load_from(store.as_ref()).await;
            tracing::info!(restored, "cache restored from store");
        }

        let sweeper = engine
            .cache
            .spawn_sweeper(engine.config.cache.sweep_interval);

        Ok((
            Arc::new(engine),
            EngineTasks {
                queue: queue_task,
                sweeper,
            },
        ))
    }

    pub fn with_store(mut self, store: Arc<dyn CacheStore<Verdict>>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_queue(mut self, queue: WriteQueue) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<AdaptiveCache<Verdict>> {
        &self.cache
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.rate_limiter
    }

    pub fn circuit_breaker(&self) -> &Arc<CircuitBreaker> {
        &self.circuit_breaker
    }

    pub fn retry(&self) -> &Arc<RetryExecutor> {
        &self.retry
    }

    pub fn cost(&self) -> &Arc<CostTracker> {
        &self.cost
    }

    pub fn store(&self) -> Option<&Arc<dyn CacheStore<Verdict>>> {
        self.store.as_ref()
    }

    pub fn queue(&self) -> Option<&WriteQueue> {
        self.queue.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryStore;
    use veritas_core::ProviderId;

    #[test]
    fn test_engine_from_default_config() {
        let engine = Engine::new(EngineConfig::default()).unwrap();
        assert_eq!(engine.cache().capacity(), 1000);
        assert_eq!(engine.retry().policy().max_retries, 3);
        assert!(engine.store().is_none());
        assert!(engine.queue().is_none());
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = EngineConfig::default();
        config.cache.capacity = 0;
        assert!(Engine::new(config).is_err());
    }

    #[test]
    fn test_per_provider_limits_are_applied() {
        let yaml = "rate_limits:\n  providers:\n    llm:\n      max_requests: 3\n      window: 10s\n";
        let engine = Engine::new(EngineConfig::from_yaml(yaml).unwrap()).unwrap();
        assert_eq!(engine.rate_limiter().config_for(ProviderId::Llm).max_requests, 3);
        assert_eq!(
            engine.rate_limiter().config_for(ProviderId::FactCheck).max_requests,
            60
        );
    }

    #[tokio::test]
    async fn test_start_restores_cache() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("verdicts.json");

        let seed: AdaptiveCache<Verdict> = AdaptiveCache::default();
        seed.set("verdict:fast:factcheck:abc", Verdict::error("placeholder", 1), None);
        let store = JsonFileStore::new(&path);
        store.save(&seed.snapshot()).await.unwrap();

        let mut config = EngineConfig::default();
        config.cache.store_path = Some(path);
        let (engine, tasks) = Engine::start(config).await.unwrap();

        assert_eq!(engine.cache().len(), 1);
        assert!(engine.queue().is_some());
        tasks.abort();
    }

    #[test]
    fn test_with_store() {
        let engine = Engine::new(EngineConfig::default())
            .unwrap()
            .with_store(Arc::new(MemoryStore::new()));
        assert!(engine.store().is_some());
    }
}
