//! Per-provider rate limiting.
//!
//! Four strategies are available. Each provider picks one through its
//! [`RateLimitConfig`]; providers without an explicit config use the default.
//!
//! | Strategy | State | Rejects when |
//! |----------|-------|--------------|
//! | Sliding window | call timestamps | `max_requests` calls in the last `window` |
//! | Fixed window | slice start, count | `max_requests` calls in the current aligned slice |
//! | Token bucket | tokens, last refill | fewer than one token left |
//! | Leaky bucket | FIFO, last leak | the queue holds `max_requests` entries |
//!
//! Time comes from `tokio::time::Instant`, so paused-clock tests are exact.

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use veritas_core::ProviderId;

use crate::config::duration_str;

/// Shortest sleep used by `wait_for_slot`, so a zero wait cannot spin.
const MIN_WAIT: Duration = Duration::from_millis(1);

/// Float seconds to a `Duration`, saturating at `Duration::MAX`.
fn saturating_secs(secs: f64) -> Duration {
    if secs.is_nan() || secs <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitStrategy {
    #[default]
    SlidingWindow,
    FixedWindow,
    TokenBucket,
    LeakyBucket,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub strategy: RateLimitStrategy,

    /// Calls allowed per window (sliding, fixed) or queue depth (leaky)
    pub max_requests: u32,

    #[serde(with = "duration_str")]
    pub window: Duration,

    /// Tokens added per second (token bucket)
    pub refill_rate: f64,

    /// Bucket size (token bucket)
    pub max_tokens: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            strategy: RateLimitStrategy::SlidingWindow,
            max_requests: 60,
            window: Duration::from_secs(60),
            refill_rate: 1.0,
            max_tokens: 60,
        }
    }
}

impl RateLimitConfig {
    pub fn sliding(max_requests: u32, window: Duration) -> Self {
        Self {
            strategy: RateLimitStrategy::SlidingWindow,
            max_requests,
            window,
            ..Default::default()
        }
    }

    pub fn fixed(max_requests: u32, window: Duration) -> Self {
        Self {
            strategy: RateLimitStrategy::FixedWindow,
            max_requests,
            window,
            ..Default::default()
        }
    }

    pub fn token_bucket(max_tokens: u32, refill_rate: f64) -> Self {
        Self {
            strategy: RateLimitStrategy::TokenBucket,
            max_tokens,
            refill_rate,
            ..Default::default()
        }
    }

    pub fn leaky_bucket(max_requests: u32, window: Duration) -> Self {
        Self {
            strategy: RateLimitStrategy::LeakyBucket,
            max_requests,
            window,
            ..Default::default()
        }
    }

    /// Check the fields the chosen strategy reads.
    pub fn validate(&self) -> Result<(), InvalidRateLimit> {
        match self.strategy {
            RateLimitStrategy::TokenBucket => {
                if self.max_tokens == 0 {
                    return Err(InvalidRateLimit::new("max_tokens", "must be greater than 0"));
                }
                if !self.refill_rate.is_finite() || self.refill_rate <= 0.0 {
                    return Err(InvalidRateLimit::new("refill_rate", "must be positive"));
                }
            }
            _ => {
                if self.max_requests == 0 {
                    return Err(InvalidRateLimit::new("max_requests", "must be greater than 0"));
                }
                if self.window.is_zero() {
                    return Err(InvalidRateLimit::new("window", "must be positive"));
                }
            }
        }
        Ok(())
    }

    /// Leak rate in entries per second.
    fn leak_rate(&self) -> f64 {
        let secs = self.window.as_secs_f64();
        if secs > 0.0 {
            f64::from(self.max_requests) / secs
        } else {
            0.0
        }
    }
}

/// Outcome of `check_limit`. When `allowed`, the call has been recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    /// How long until a slot should be free; zero when allowed
    pub wait: Duration,
}

impl RateDecision {
    fn allow() -> Self {
        Self {
            allowed: true,
            wait: Duration::ZERO,
        }
    }

    fn reject(wait: Duration) -> Self {
        Self {
            allowed: false,
            wait: wait.max(MIN_WAIT),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitStatus {
    pub current: u32,
    pub limit: u32,
    pub remaining: u32,
    pub reset_in: Duration,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("rate limit exceeded for {provider}, next slot in {wait:?}")]
pub struct RateLimitExceeded {
    pub provider: ProviderId,
    pub wait: Duration,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{field} {reason}")]
pub struct InvalidRateLimit {
    pub field: &'static str,
    pub reason: &'static str,
}

impl InvalidRateLimit {
    fn new(field: &'static str, reason: &'static str) -> Self {
        Self { field, reason }
    }
}

#[derive(Debug)]
enum WindowState {
    Sliding { timestamps: VecDeque<Instant> },
    Fixed { window_start: Instant, count: u32 },
    TokenBucket { tokens: f64, last_refill: Instant },
    LeakyBucket { queue: VecDeque<Instant>, last_leak: Instant },
}

impl WindowState {
    fn new(config: &RateLimitConfig, epoch: Instant, now: Instant) -> Self {
        match config.strategy {
            RateLimitStrategy::SlidingWindow => WindowState::Sliding {
                timestamps: VecDeque::new(),
            },
            RateLimitStrategy::FixedWindow => WindowState::Fixed {
                window_start: aligned_start(epoch, now, config.window),
                count: 0,
            },
            RateLimitStrategy::TokenBucket => WindowState::TokenBucket {
                tokens: f64::from(config.max_tokens),
                last_refill: now,
            },
            RateLimitStrategy::LeakyBucket => WindowState::LeakyBucket {
                queue: VecDeque::new(),
                last_leak: now,
            },
        }
    }

    /// Bring the state up to `now` without recording a call.
    fn advance(&mut self, config: &RateLimitConfig, epoch: Instant, now: Instant) {
        match self {
            WindowState::Sliding { timestamps } => {
                while let Some(&oldest) = timestamps.front() {
                    if now.duration_since(oldest) >= config.window {
                        timestamps.pop_front();
                    } else {
                        break;
                    }
                }
            }
            WindowState::Fixed {
                window_start,
                count,
            } => {
                let start = aligned_start(epoch, now, config.window);
                if start != *window_start {
                    *window_start = start;
                    *count = 0;
                }
            }
            WindowState::TokenBucket {
                tokens,
                last_refill,
            } => {
                let elapsed = now.duration_since(*last_refill).as_secs_f64();
                *tokens = (*tokens + elapsed * config.refill_rate.max(0.0))
                    .min(f64::from(config.max_tokens));
                *last_refill = now;
            }
            WindowState::LeakyBucket { queue, last_leak } => {
                let rate = config.leak_rate();
                if queue.is_empty() || rate <= 0.0 {
                    if queue.is_empty() {
                        *last_leak = now;
                    }
                    return;
                }
                let elapsed = now.duration_since(*last_leak).as_secs_f64();
                let leaked = (elapsed * rate).floor() as usize;
                if leaked > 0 {
                    let n = leaked.min(queue.len());
                    queue.drain(..n);
                    if queue.is_empty() {
                        *last_leak = now;
                    } else {
                        *last_leak += Duration::from_secs_f64(leaked as f64 / rate);
                    }
                }
            }
        }
    }

    fn try_record(&mut self, config: &RateLimitConfig, now: Instant) -> RateDecision {
        match self {
            WindowState::Sliding { timestamps } => {
                if timestamps.len() as u32 >= config.max_requests {
                    let wait = timestamps
                        .front()
                        .map(|&oldest| config.window.saturating_sub(now.duration_since(oldest)))
                        .unwrap_or(config.window);
                    RateDecision::reject(wait)
                } else {
                    timestamps.push_back(now);
                    RateDecision::allow()
                }
            }
            WindowState::Fixed {
                window_start,
                count,
            } => {
                if *count >= config.max_requests {
                    let boundary = *window_start + config.window;
                    RateDecision::reject(boundary.saturating_duration_since(now))
                } else {
                    *count += 1;
                    RateDecision::allow()
                }
            }
            WindowState::TokenBucket { tokens, .. } => {
                if *tokens >= 1.0 {
                    *tokens -= 1.0;
                    RateDecision::allow()
                } else if config.refill_rate > 0.0 {
                    RateDecision::reject(saturating_secs((1.0 - *tokens) / config.refill_rate))
                } else {
                    RateDecision::reject(config.window)
                }
            }
            WindowState::LeakyBucket { queue, last_leak } => {
                if queue.len() as u32 >= config.max_requests {
                    let rate = config.leak_rate();
                    let wait = if rate > 0.0 {
                        saturating_secs(1.0 / rate)
                            .saturating_sub(now.duration_since(*last_leak))
                    } else {
                        config.window
                    };
                    RateDecision::reject(wait)
                } else {
                    if queue.is_empty() {
                        *last_leak = now;
                    }
                    queue.push_back(now);
                    RateDecision::allow()
                }
            }
        }
    }

    fn status(&self, config: &RateLimitConfig, now: Instant) -> RateLimitStatus {
        match self {
            WindowState::Sliding { timestamps } => {
                let current = timestamps.len() as u32;
                let reset_in = timestamps
                    .front()
                    .map(|&oldest| config.window.saturating_sub(now.duration_since(oldest)))
                    .unwrap_or(Duration::ZERO);
                RateLimitStatus {
                    current,
                    limit: config.max_requests,
                    remaining: config.max_requests.saturating_sub(current),
                    reset_in,
                }
            }
            WindowState::Fixed {
                window_start,
                count,
            } => RateLimitStatus {
                current: *count,
                limit: config.max_requests,
                remaining: config.max_requests.saturating_sub(*count),
                reset_in: (*window_start + config.window).saturating_duration_since(now),
            },
            WindowState::TokenBucket { tokens, .. } => {
                let available = tokens.floor().max(0.0) as u32;
                let missing = f64::from(config.max_tokens) - tokens;
                let reset_in = if missing > 0.0 && config.refill_rate > 0.0 {
                    saturating_secs(missing / config.refill_rate)
                } else {
                    Duration::ZERO
                };
                RateLimitStatus {
                    current: config.max_tokens.saturating_sub(available),
                    limit: config.max_tokens,
                    remaining: available,
                    reset_in,
                }
            }
            WindowState::LeakyBucket { queue, .. } => {
                let current = queue.len() as u32;
                let rate = config.leak_rate();
                let reset_in = if current > 0 && rate > 0.0 {
                    saturating_secs(f64::from(current) / rate)
                } else {
                    Duration::ZERO
                };
                RateLimitStatus {
                    current,
                    limit: config.max_requests,
                    remaining: config.max_requests.saturating_sub(current),
                    reset_in,
                }
            }
        }
    }
}

/// Start of the fixed-window slice containing `now`.
fn aligned_start(epoch: Instant, now: Instant, window: Duration) -> Instant {
    let window_nanos = window.as_nanos();
    if window_nanos == 0 {
        return now;
    }
    let since = now.duration_since(epoch).as_nanos();
    let offset = since - since % window_nanos;
    epoch + Duration::from_nanos(offset.min(u128::from(u64::MAX)) as u64)
}

/// Rate limiter shared by every provider call.
pub struct RateLimiter {
    default_config: RateLimitConfig,
    configs: RwLock<HashMap<ProviderId, RateLimitConfig>>,
    windows: Mutex<HashMap<ProviderId, WindowState>>,
    /// Fixed windows align to multiples of the window since this instant
    epoch: Instant,
}

impl RateLimiter {
    pub fn new(default_config: RateLimitConfig) -> Self {
        Self {
            default_config,
            configs: RwLock::new(HashMap::new()),
            windows: Mutex::new(HashMap::new()),
            epoch: Instant::now(),
        }
    }

    pub fn with_limits(
        default_config: RateLimitConfig,
        limits: impl IntoIterator<Item = (ProviderId, RateLimitConfig)>,
    ) -> Self {
        let limiter = Self::new(default_config);
        limiter.configs.write().extend(limits);
        limiter
    }

    pub fn config_for(&self, provider: ProviderId) -> RateLimitConfig {
        self.configs
            .read()
            .get(&provider)
            .cloned()
            .unwrap_or_else(|| self.default_config.clone())
    }

    /// Check for a slot and record the call when one is free.
    pub fn check_limit(&self, provider: ProviderId) -> RateDecision {
        let config = self.config_for(provider);
        let now = Instant::now();
        let mut windows = self.windows.lock();
        let state = windows
            .entry(provider)
            .or_insert_with(|| WindowState::new(&config, self.epoch, now));
        state.advance(&config, self.epoch, now);
        let decision = state.try_record(&config, now);

        if !decision.allowed {
            tracing::debug!(
                provider = %provider,
                wait_ms = u64::try_from(decision.wait.as_millis()).unwrap_or(u64::MAX),
                "rate limit reached"
            );
        }
        decision
    }

    /// Like `check_limit`, but as an error for callers using `?`.
    pub fn acquire(&self, provider: ProviderId) -> Result<(), RateLimitExceeded> {
        let decision = self.check_limit(provider);
        if decision.allowed {
            Ok(())
        } else {
            Err(RateLimitExceeded {
                provider,
                wait: decision.wait,
            })
        }
    }

    /// Suspend until a slot is granted.
    pub async fn wait_for_slot(&self, provider: ProviderId) {
        loop {
            let decision = self.check_limit(provider);
            if decision.allowed {
                return;
            }
            tokio::time::sleep(decision.wait.max(MIN_WAIT)).await;
        }
    }

    pub fn status(&self, provider: ProviderId) -> RateLimitStatus {
        let config = self.config_for(provider);
        let now = Instant::now();
        let mut windows = self.windows.lock();
        let state = windows
            .entry(provider)
            .or_insert_with(|| WindowState::new(&config, self.epoch, now));
        state.advance(&config, self.epoch, now);
        state.status(&config, now)
    }

    pub fn reset(&self, provider: ProviderId) {
        self.windows.lock().remove(&provider);
    }

    pub fn reset_all(&self) {
        self.windows.lock().clear();
    }

    /// Replace a provider's limit. Its window starts over.
    pub fn set_limit(
        &self,
        provider: ProviderId,
        config: RateLimitConfig,
    ) -> Result<(), InvalidRateLimit> {
        config.validate()?;
        self.configs.write().insert(provider, config);
        self.reset(provider);
        Ok(())
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}
