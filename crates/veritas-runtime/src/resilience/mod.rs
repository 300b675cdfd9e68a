//! Resilience patterns for provider calls.
//!
//! This module provides:
//! - Per-provider rate limiting with four strategies
//! - Retry with backoff for transient errors
//! - Circuit breaker to stop calling failing providers
//! - Cost tracking against a budget

mod circuit_breaker;
mod cost;
mod rate_limiter;
mod retry;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitOpenError, CircuitSnapshot, CircuitState,
};
pub use cost::{
    BudgetAlert, BudgetConfig, BudgetPeriod, CostConfig, CostProjection, CostReceipt, CostRecord,
    CostTracker, ModelPricing, PricingTable, Recommendation, UsageEvent,
};
pub use rate_limiter::{
    InvalidRateLimit, RateDecision, RateLimitConfig, RateLimitExceeded, RateLimitStatus,
    RateLimitStrategy, RateLimiter,
};
pub use retry::{BackoffKind, RetryExecutor, RetryPolicy};
