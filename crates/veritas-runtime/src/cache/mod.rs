//! Adaptive in-memory cache for verdicts.
//!
//! Entries live for a TTL that grows with use, eviction removes the least
//! accessed entry, and a miss can optionally be served by a key whose
//! colon-delimited segments mostly match. Snapshots can be persisted
//! through a [`CacheStore`].

pub mod store;

pub use store::{CacheError, CacheStore, JsonFileStore, MemoryStore};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::duration_str;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of entries
    pub capacity: usize,

    #[serde(with = "duration_str")]
    pub default_ttl: Duration,

    /// Grow an entry's TTL on every hit
    pub adaptive_ttl: bool,

    /// Cap for adaptive TTL, as a multiple of the entry's base TTL
    pub max_ttl_multiplier: f64,

    /// Serve misses from a similar key
    pub predictive: bool,

    /// Minimum fraction of matching key segments for a predictive hit
    pub similarity_threshold: f64,

    pub target_hit_rate: f64,
    pub min_samples_for_tuning: u64,

    /// Upper bound for capacity growth from tuning
    pub max_capacity: usize,

    /// Upper bound for default TTL growth from tuning
    #[serde(with = "duration_str")]
    pub max_default_ttl: Duration,

    #[serde(with = "duration_str")]
    pub sweep_interval: Duration,

    /// Where cache snapshots are persisted, if anywhere
    pub store_path: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 1000,
            default_ttl: Duration::from_secs(3600),
            adaptive_ttl: true,
            max_ttl_multiplier: 4.0,
            predictive: true,
            similarity_threshold: 0.7,
            target_hit_rate: 0.6,
            min_samples_for_tuning: 100,
            max_capacity: 10_000,
            max_default_ttl: Duration::from_secs(24 * 3600),
            sweep_interval: Duration::from_secs(60),
            store_path: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub key: String,
    pub value: V,
    pub created_at: Instant,
    pub ttl: Duration,
    pub base_ttl: Duration,
    pub last_accessed_at: Instant,
    pub access_count: u64,
}

impl<V> CacheEntry<V> {
    fn new(key: String, value: V, ttl: Duration, now: Instant) -> Self {
        Self {
            key,
            value,
            created_at: now,
            ttl,
            base_ttl: ttl,
            last_accessed_at: now,
            access_count: 0,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.created_at) > self.ttl
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct CacheStats {
    /// Lookups served, predictive ones included
    pub hits: u64,
    pub misses: u64,
    pub predictive_hits: u64,
    pub evictions: u64,
    pub expirations: u64,
}

impl CacheStats {
    pub fn lookups(&self) -> u64 {
        self.hits + self.misses
    }

    pub fn hit_rate(&self) -> f64 {
        match self.lookups() {
            0 => 0.0,
            n => self.hits as f64 / n as f64,
        }
    }
}

/// Cache entry as written to a [`CacheStore`], with wall-clock times.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedEntry<V> {
    pub key: String,
    pub value: V,
    pub created_at: DateTime<Utc>,
    pub ttl_ms: u64,
    pub base_ttl_ms: u64,
    pub access_count: u64,
}

struct CacheInner<V> {
    entries: HashMap<String, CacheEntry<V>>,
    capacity: usize,
    default_ttl: Duration,
    stats: CacheStats,
}

pub struct AdaptiveCache<V> {
    config: CacheConfig,
    inner: Mutex<CacheInner<V>>,
}

/// Fraction of positions at which two colon-delimited keys agree.
/// Keys with a different number of segments never match.
fn segment_similarity(a: &str, b: &str) -> f64 {
    let left: Vec<&str> = a.split(':').collect();
    let right: Vec<&str> = b.split(':').collect();
    if left.len() != right.len() {
        return 0.0;
    }
    let matching = left.iter().zip(&right).filter(|(x, y)| x == y).count();
    matching as f64 / left.len() as f64
}

impl<V: Clone> AdaptiveCache<V> {
    pub fn new(config: CacheConfig) -> Self {
        let inner = CacheInner {
            entries: HashMap::new(),
            capacity: config.capacity,
            default_ttl: config.default_ttl,
            stats: CacheStats::default(),
        };
        Self {
            config,
            inner: Mutex::new(inner),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Look up `key`, falling back to a predictive match when enabled.
    pub fn get(&self, key: &str) -> Option<V> {
        self.lookup(key, self.config.predictive)
    }

    /// Look up `key` with exact matching only.
    pub fn get_exact(&self, key: &str) -> Option<V> {
        self.lookup(key, false)
    }

    fn lookup(&self, key: &str, predictive: bool) -> Option<V> {
        let now = Instant::now();
        let mut inner = self.inner.lock();

        if let Some(value) = self.hit_exact(&mut inner, key, now) {
            inner.stats.hits += 1;
            return Some(value);
        }

        if predictive {
            if let Some(value) = self.hit_predictive(&mut inner, key, now) {
                inner.stats.hits += 1;
                inner.stats.predictive_hits += 1;
                return Some(value);
            }
        }

        inner.stats.misses += 1;
        tracing::debug!(key, "cache miss");
        None
    }

    fn hit_exact(&self, inner: &mut CacheInner<V>, key: &str, now: Instant) -> Option<V> {
        let expired = inner.entries.get(key)?.is_expired(now);
        if expired {
            inner.entries.remove(key);
            inner.stats.expirations += 1;
            return None;
        }

        let entry = inner.entries.get_mut(key)?;
        entry.access_count += 1;
        entry.last_accessed_at = now;
        if self.config.adaptive_ttl {
            self.extend_ttl(entry, now);
        }
        Some(entry.value.clone())
    }

    /// `base * (1 + ln(1 + accesses + accesses_per_minute))`, capped and
    /// never shorter than the current TTL.
    fn extend_ttl(&self, entry: &mut CacheEntry<V>, now: Instant) {
        let minutes = (now.duration_since(entry.created_at).as_secs_f64() / 60.0).max(1.0);
        let popularity = entry.access_count as f64 / minutes;
        let factor = 1.0 + (1.0 + entry.access_count as f64 + popularity).ln();
        let cap = self.config.max_ttl_multiplier.max(1.0);
        let proposed = entry.base_ttl.mul_f64(factor.min(cap));
        if proposed > entry.ttl {
            entry.ttl = proposed;
        }
    }

    fn hit_predictive(&self, inner: &mut CacheInner<V>, key: &str, now: Instant) -> Option<V> {
        let threshold = self.config.similarity_threshold;
        let (source_key, _) = inner
            .entries
            .values()
            .filter(|e| !e.is_expired(now))
            .map(|e| (e.key.as_str(), segment_similarity(key, &e.key)))
            .filter(|(_, ratio)| *ratio >= threshold)
            // highest ratio, then smallest key
            .max_by(|a, b| a.1.total_cmp(&b.1).then_with(|| b.0.cmp(a.0)))
            .map(|(k, ratio)| (k.to_string(), ratio))?;

        let source = inner.entries.get(&source_key)?;
        let value = source.value.clone();
        let ttl = source.ttl;

        tracing::debug!(key, source = %source_key, "predictive cache hit");
        self.insert_entry(inner, CacheEntry::new(key.to_string(), value.clone(), ttl, now));
        Some(value)
    }

    /// Store `value` under `key`; `None` uses the default TTL.
    ///
    /// Returns `false` when nothing can be stored (zero TTL or capacity).
    pub fn set(&self, key: impl Into<String>, value: V, ttl: Option<Duration>) -> bool {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        let ttl = ttl.unwrap_or(inner.default_ttl);
        if ttl.is_zero() || inner.capacity == 0 {
            return false;
        }
        self.insert_entry(&mut inner, CacheEntry::new(key.into(), value, ttl, now));
        true
    }

    fn insert_entry(&self, inner: &mut CacheInner<V>, entry: CacheEntry<V>) {
        if !inner.entries.contains_key(&entry.key) && inner.entries.len() >= inner.capacity {
            let removed = Self::purge_expired(inner, entry.created_at);
            if removed == 0 {
                Self::evict_one(inner);
            }
        }
        inner.entries.insert(entry.key.clone(), entry);
    }

    fn purge_expired(inner: &mut CacheInner<V>, now: Instant) -> usize {
        let before = inner.entries.len();
        inner.entries.retain(|_, e| !e.is_expired(now));
        let removed = before - inner.entries.len();
        inner.stats.expirations += removed as u64;
        removed
    }

    /// Remove the least accessed entry; ties go to the least recently
    /// accessed, then to the smallest key.
    fn evict_one(inner: &mut CacheInner<V>) {
        let victim = inner
            .entries
            .values()
            .min_by(|a, b| {
                a.access_count
                    .cmp(&b.access_count)
                    .then(a.last_accessed_at.cmp(&b.last_accessed_at))
                    .then_with(|| a.key.cmp(&b.key))
            })
            .map(|e| e.key.clone());

        if let Some(key) = victim {
            inner.entries.remove(&key);
            inner.stats.evictions += 1;
            tracing::debug!(key = %key, "cache eviction");
        }
    }

    pub fn delete(&self, key: &str) -> bool {
        self.inner.lock().entries.remove(key).is_some()
    }

    /// Remove expired entries, returning how many were removed.
    pub fn cleanup(&self) -> usize {
        let mut inner = self.inner.lock();
        Self::purge_expired(&mut inner, Instant::now())
    }

    pub fn clear(&self) {
        self.inner.lock().entries.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.lock().stats
    }

    pub fn hit_rate(&self) -> f64 {
        self.stats().hit_rate()
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().capacity
    }

    pub fn default_ttl(&self) -> Duration {
        self.inner.lock().default_ttl
    }

    /// Remaining TTL of a live entry.
    pub fn ttl_of(&self, key: &str) -> Option<Duration> {
        self.inner.lock().entries.get(key).map(|e| e.ttl)
    }

    /// Grow capacity and default TTL by a quarter when the hit rate is
    /// below target. Returns whether anything changed.
    pub fn tune(&self) -> bool {
        let mut inner = self.inner.lock();
        let stats = inner.stats;
        if stats.lookups() < self.config.min_samples_for_tuning
            || stats.hit_rate() >= self.config.target_hit_rate
        {
            return false;
        }

        let capacity = ((inner.capacity as f64 * 1.25).ceil() as usize)
            .min(self.config.max_capacity)
            .max(inner.capacity);
        let default_ttl = inner
            .default_ttl
            .mul_f64(1.25)
            .min(self.config.max_default_ttl)
            .max(inner.default_ttl);

        let changed = capacity != inner.capacity || default_ttl != inner.default_ttl;
        if changed {
            tracing::info!(
                hit_rate = stats.hit_rate(),
                capacity,
                default_ttl_secs = default_ttl.as_secs(),
                "Cache tuned"
            );
        }
        inner.capacity = capacity;
        inner.default_ttl = default_ttl;
        changed
    }

    /// Live entries with wall-clock timestamps, sorted by key.
    pub fn snapshot(&self) -> Vec<PersistedEntry<V>> {
        let now = Instant::now();
        let wall_now = Utc::now();
        let inner = self.inner.lock();

        let mut entries: Vec<PersistedEntry<V>> = inner
            .entries
            .values()
            .filter(|e| !e.is_expired(now))
            .map(|e| {
                let age = chrono::Duration::from_std(now.duration_since(e.created_at))
                    .unwrap_or_else(|_| chrono::Duration::zero());
                PersistedEntry {
                    key: e.key.clone(),
                    value: e.value.clone(),
                    created_at: wall_now - age,
                    ttl_ms: u64::try_from(e.ttl.as_millis()).unwrap_or(u64::MAX),
                    base_ttl_ms: u64::try_from(e.base_ttl.as_millis()).unwrap_or(u64::MAX),
                    access_count: e.access_count,
                }
            })
            .collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        entries
    }

    /// Load persisted entries, skipping expired ones. Returns how many
    /// were restored.
    pub fn restore(&self, entries: Vec<PersistedEntry<V>>) -> usize {
        let now = Instant::now();
        let wall_now = Utc::now();
        let mut inner = self.inner.lock();
        let mut restored = 0;

        for persisted in entries {
            let age = (wall_now - persisted.created_at)
                .to_std()
                .unwrap_or(Duration::ZERO);
            let ttl = Duration::from_millis(persisted.ttl_ms);
            if ttl.is_zero() || age > ttl || inner.capacity == 0 {
                continue;
            }

            let created_at = now.checked_sub(age).unwrap_or(now);
            let entry = CacheEntry {
                key: persisted.key,
                value: persisted.value,
                created_at,
                ttl,
                base_ttl: Duration::from_millis(persisted.base_ttl_ms).min(ttl),
                last_accessed_at: created_at,
                access_count: persisted.access_count,
            };
            self.insert_entry(&mut inner, entry);
            restored += 1;
        }
        restored
    }

    /// Restore from `store`; a failing store counts as empty.
    pub async fn load_from(&self, store: &dyn CacheStore<V>) -> usize {
        match store.load().await {
            Ok(entries) => self.restore(entries),
            Err(e) => {
                tracing::warn!(error = %e, "cache store load failed, starting empty");
                0
            }
        }
    }
}

impl<V: Clone + Send + 'static> AdaptiveCache<V> {
    /// Periodically remove expired entries and retune.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
            // first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let removed = cache.cleanup();
                let tuned = cache.tune();
                tracing::debug!(removed, tuned, "cache sweep");
            }
        })
    }
}

impl<V: Clone> Default for AdaptiveCache<V> {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}
