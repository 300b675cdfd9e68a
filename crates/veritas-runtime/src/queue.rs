//! Background write queue.
//!
//! Side effects that should not delay a verdict (persisting the cache,
//! indexing a verdict for similarity search) are queued here and run by a
//! single worker task. Enqueueing never blocks: when the queue is full the
//! job is dropped and counted.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;

use crate::cache::{AdaptiveCache, CacheError, CacheStore};
use crate::config::duration_str;
use crate::providers::{ProviderError, VectorIndex, VectorRecord};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub capacity: usize,

    /// Runs per job before it is reported as failed
    pub max_attempts: u32,

    #[serde(with = "duration_str")]
    pub retry_delay: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 256,
            max_attempts: 3,
            retry_delay: Duration::from_millis(500),
        }
    }
}

#[derive(Error, Debug)]
pub enum JobError {
    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("{0}")]
    Other(String),
}

#[async_trait]
pub trait BackgroundJob: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self) -> Result<(), JobError>;
}

#[derive(Debug, Default)]
struct Counters {
    completed: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct QueueStats {
    pub completed: u64,
    pub failed: u64,
    pub dropped: u64,
}

/// Handle for submitting jobs. Cheap to clone; the worker stops once every
/// handle is dropped and the queue has drained.
#[derive(Clone)]
pub struct WriteQueue {
    sender: mpsc::Sender<Box<dyn BackgroundJob>>,
    counters: Arc<Counters>,
}

impl WriteQueue {
    pub fn spawn(config: QueueConfig) -> (Self, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(config.capacity.max(1));
        let counters = Arc::new(Counters::default());
        let handle = tokio::spawn(run_worker(receiver, config, Arc::clone(&counters)));
        (Self { sender, counters }, handle)
    }

    /// Submit a job without waiting. Returns `false` if it was dropped.
    pub fn enqueue(&self, job: Box<dyn BackgroundJob>) -> bool {
        match self.sender.try_send(job) {
            Ok(()) => true,
            Err(TrySendError::Full(job)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(job = job.name(), "write queue full, job dropped");
                false
            }
            Err(TrySendError::Closed(job)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(job = job.name(), "write queue closed, job dropped");
                false
            }
        }
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            completed: self.counters.completed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }
}

async fn run_worker(
    mut receiver: mpsc::Receiver<Box<dyn BackgroundJob>>,
    config: QueueConfig,
    counters: Arc<Counters>,
) {
    while let Some(job) = receiver.recv().await {
        run_job(job.as_ref(), &config, &counters).await;
    }
    tracing::debug!("write queue closed");
}

async fn run_job(job: &dyn BackgroundJob, config: &QueueConfig, counters: &Counters) {
    let max_attempts = config.max_attempts.max(1);
    for attempt in 1..=max_attempts {
        match job.run().await {
            Ok(()) => {
                counters.completed.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(job = job.name(), attempt, "background job completed");
                return;
            }
            Err(e) if attempt < max_attempts => {
                tracing::debug!(job = job.name(), attempt, error = %e, "background job failed, retrying");
                tokio::time::sleep(config.retry_delay).await;
            }
            Err(e) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                tracing::error!(
                    job = job.name(),
                    attempts = max_attempts,
                    error = %e,
                    "background job failed"
                );
            }
        }
    }
}

/// Writes the cache snapshot to its store.
pub struct PersistCacheJob<V> {
    cache: Arc<AdaptiveCache<V>>,
    store: Arc<dyn CacheStore<V>>,
}

impl<V> PersistCacheJob<V> {
    pub fn new(cache: Arc<AdaptiveCache<V>>, store: Arc<dyn CacheStore<V>>) -> Self {
        Self { cache, store }
    }
}

#[async_trait]
impl<V> BackgroundJob for PersistCacheJob<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        "persist_cache"
    }

    async fn run(&self) -> Result<(), JobError> {
        let snapshot = self.cache.snapshot();
        self.store.save(&snapshot).await?;
        Ok(())
    }
}

/// Upserts a verdict into the vector index.
pub struct IndexVerdictJob {
    index: Arc<dyn VectorIndex>,
    collection: String,
    record: VectorRecord,
}

impl IndexVerdictJob {
    pub fn new(index: Arc<dyn VectorIndex>, collection: impl Into<String>, record: VectorRecord) -> Self {
        Self {
            index,
            collection: collection.into(),
            record,
        }
    }
}

#[async_trait]
impl BackgroundJob for IndexVerdictJob {
    fn name(&self) -> &str {
        "index_verdict"
    }

    async fn run(&self) -> Result<(), JobError> {
        self.index
            .upsert(&self.collection, self.record.clone())
            .await?;
        Ok(())
    }
}
