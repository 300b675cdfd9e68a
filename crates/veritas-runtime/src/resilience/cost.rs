//! Spend tracking for metered provider calls.
//!
//! Costs are computed from a [`PricingTable`] and accumulated per provider,
//! per operation, per day and per month. Budget alerts are advisory: they
//! are logged and returned to the caller but never block a call.

use chrono::{DateTime, Datelike, Duration as ChronoDuration, NaiveDate, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::fmt;
use veritas_core::ProviderId;

use crate::providers::UsageReport;

const MAX_RETAINED_ALERTS: usize = 100;
const DUPLICATE_WINDOW: usize = 100;

/// Price per 1000 units (tokens, characters, ...).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    pub input_per_1k: f64,
    pub output_per_1k: f64,
}

impl ModelPricing {
    pub const fn new(input_per_1k: f64, output_per_1k: f64) -> Self {
        Self {
            input_per_1k,
            output_per_1k,
        }
    }

    pub fn cost(&self, input_units: u64, output_units: u64) -> f64 {
        (input_units as f64 / 1000.0) * self.input_per_1k
            + (output_units as f64 / 1000.0) * self.output_per_1k
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PricingTable {
    models: BTreeMap<String, ModelPricing>,
    default_rate: ModelPricing,
}

impl Default for PricingTable {
    fn default() -> Self {
        let models = [
            ("llama-3.1-8b-instant", ModelPricing::new(0.00005, 0.00008)),
            ("llama-3.3-70b-versatile", ModelPricing::new(0.00059, 0.00079)),
            ("gpt-4o-mini", ModelPricing::new(0.00015, 0.0006)),
            ("text-embedding-3-small", ModelPricing::new(0.00002, 0.0)),
        ]
        .into_iter()
        .map(|(name, pricing)| (name.to_string(), pricing))
        .collect();

        Self {
            models,
            default_rate: ModelPricing::new(0.0005, 0.0015),
        }
    }
}

impl PricingTable {
    pub fn new(default_rate: ModelPricing) -> Self {
        Self {
            models: BTreeMap::new(),
            default_rate,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>, pricing: ModelPricing) -> Self {
        self.models.insert(model.into(), pricing);
        self
    }

    pub fn with_overrides(mut self, overrides: &BTreeMap<String, ModelPricing>) -> Self {
        for (model, pricing) in overrides {
            self.models.insert(model.clone(), *pricing);
        }
        self
    }

    /// Exact match, then the longest known name contained in `model`,
    /// then the default rate.
    pub fn rate_for(&self, model: &str) -> ModelPricing {
        if let Some(pricing) = self.models.get(model) {
            return *pricing;
        }
        self.models
            .iter()
            .filter(|(name, _)| model.contains(name.as_str()))
            .max_by_key(|(name, _)| name.len())
            .map(|(_, pricing)| *pricing)
            .unwrap_or(self.default_rate)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetPeriod {
    Daily,
    #[default]
    Monthly,
    Lifetime,
}

impl fmt::Display for BudgetPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BudgetPeriod::Daily => "daily",
            BudgetPeriod::Monthly => "monthly",
            BudgetPeriod::Lifetime => "lifetime",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    /// Spend limit in USD for one period; 0 disables alerts
    pub limit: f64,
    pub period: BudgetPeriod,
    /// Fractions of `limit` that raise an alert
    pub alert_thresholds: Vec<f64>,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            limit: 50.0,
            period: BudgetPeriod::Monthly,
            alert_thresholds: vec![0.5, 0.8, 0.95],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CostConfig {
    pub budget: BudgetConfig,
    /// Per-model prices merged over the built-in table
    pub pricing: BTreeMap<String, ModelPricing>,
    /// Size of the usage event ring buffer
    pub event_capacity: usize,
}

impl Default for CostConfig {
    fn default() -> Self {
        Self {
            budget: BudgetConfig::default(),
            pricing: BTreeMap::new(),
            event_capacity: 1000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct CostRecord {
    pub total_cost: f64,
    pub total_units: u64,
    pub total_requests: u64,
}

impl CostRecord {
    fn add(&mut self, cost: f64, units: u64) {
        self.total_cost += cost;
        self.total_units += units;
        self.total_requests += 1;
    }

    pub fn cost_per_unit(&self) -> Option<f64> {
        (self.total_units > 0).then(|| self.total_cost / self.total_units as f64)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageEvent {
    pub provider: ProviderId,
    pub operation: String,
    pub model: String,
    pub input_units: u64,
    pub output_units: u64,
    pub cost: f64,
    pub fingerprint: Option<String>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BudgetAlert {
    pub threshold: f64,
    pub spent: f64,
    pub limit: f64,
    pub period: BudgetPeriod,
    /// Spend reached or passed the limit
    pub exceeded: bool,
    pub raised_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CostReceipt {
    pub cost: f64,
    pub total_cost: f64,
    pub alerts: Vec<BudgetAlert>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CostProjection {
    pub month_to_date: f64,
    pub daily_average: f64,
    pub projected_month_total: f64,
    pub average_cost_per_request: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Recommendation {
    /// One provider costs much more per unit than another
    Reweight {
        expensive: ProviderId,
        cheaper: ProviderId,
        ratio: f64,
    },
    /// Identical requests were paid for more than once
    ExtendCacheTtl { duplicate_requests: usize },
    BudgetOverrun { projected: f64, limit: f64 },
}

impl fmt::Display for Recommendation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Recommendation::Reweight {
                expensive,
                cheaper,
                ratio,
            } => write!(
                f,
                "{} costs {:.1}x more per unit than {}; consider lowering its weight",
                expensive, ratio, cheaper
            ),
            Recommendation::ExtendCacheTtl { duplicate_requests } => write!(
                f,
                "{} repeated requests were paid for; consider a longer cache TTL",
                duplicate_requests
            ),
            Recommendation::BudgetOverrun { projected, limit } => write!(
                f,
                "projected spend ${:.4} is above the ${:.2} budget",
                projected, limit
            ),
        }
    }
}

#[derive(Default)]
struct CostState {
    total_cost: f64,
    by_provider: BTreeMap<ProviderId, CostRecord>,
    by_operation: BTreeMap<String, CostRecord>,
    daily: BTreeMap<NaiveDate, f64>,
    monthly: BTreeMap<String, f64>,
    events: VecDeque<UsageEvent>,
    alerts: VecDeque<BudgetAlert>,
    /// Last alert time per threshold index
    last_alert: BTreeMap<usize, DateTime<Utc>>,
    exceeded: bool,
}

pub struct CostTracker {
    pricing: PricingTable,
    budget: BudgetConfig,
    event_capacity: usize,
    state: Mutex<CostState>,
}

fn month_key(year: i32, month: u32) -> String {
    format!("{:04}-{:02}", year, month)
}

fn days_in_month(date: NaiveDate) -> u32 {
    let (year, month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1)
        .and_then(|next| next.pred_opt())
        .map(|last| last.day())
        .unwrap_or(30)
}

impl CostTracker {
    pub fn new(config: CostConfig) -> Self {
        Self {
            pricing: PricingTable::default().with_overrides(&config.pricing),
            budget: config.budget,
            event_capacity: config.event_capacity.max(1),
            state: Mutex::new(CostState::default()),
        }
    }

    pub fn with_pricing(mut self, pricing: PricingTable) -> Self {
        self.pricing = pricing;
        self
    }

    pub fn pricing(&self) -> &PricingTable {
        &self.pricing
    }

    pub fn budget(&self) -> &BudgetConfig {
        &self.budget
    }

    pub fn track_usage(
        &self,
        usage: &UsageReport,
        provider: ProviderId,
        operation: &str,
    ) -> CostReceipt {
        self.record(usage, provider, operation, None, Utc::now())
    }

    pub fn track_usage_at(
        &self,
        usage: &UsageReport,
        provider: ProviderId,
        operation: &str,
        at: DateTime<Utc>,
    ) -> CostReceipt {
        self.record(usage, provider, operation, None, at)
    }

    /// Track usage tagged with a request fingerprint, used to spot
    /// repeated paid requests.
    pub fn track_request(
        &self,
        usage: &UsageReport,
        provider: ProviderId,
        operation: &str,
        fingerprint: &str,
    ) -> CostReceipt {
        self.record(
            usage,
            provider,
            operation,
            Some(fingerprint.to_string()),
            Utc::now(),
        )
    }

    fn record(
        &self,
        usage: &UsageReport,
        provider: ProviderId,
        operation: &str,
        fingerprint: Option<String>,
        at: DateTime<Utc>,
    ) -> CostReceipt {
        let cost = self
            .pricing
            .rate_for(&usage.model)
            .cost(usage.input_units, usage.output_units);
        let units = usage.input_units + usage.output_units;

        let mut state = self.state.lock();
        state.total_cost += cost;
        state.by_provider.entry(provider).or_default().add(cost, units);
        state
            .by_operation
            .entry(operation.to_string())
            .or_default()
            .add(cost, units);
        *state.daily.entry(at.date_naive()).or_default() += cost;
        *state
            .monthly
            .entry(month_key(at.year(), at.month()))
            .or_default() += cost;

        if state.events.len() >= self.event_capacity {
            state.events.pop_front();
        }
        state.events.push_back(UsageEvent {
            provider,
            operation: operation.to_string(),
            model: usage.model.clone(),
            input_units: usage.input_units,
            output_units: usage.output_units,
            cost,
            fingerprint,
            at,
        });

        let alerts = self.check_budget(&mut state, at);

        tracing::debug!(
            provider = %provider,
            operation,
            model = %usage.model,
            cost,
            "usage tracked"
        );

        CostReceipt {
            cost,
            total_cost: state.total_cost,
            alerts,
        }
    }

    fn period_spend(&self, state: &CostState, at: DateTime<Utc>) -> f64 {
        match self.budget.period {
            BudgetPeriod::Daily => state.daily.get(&at.date_naive()).copied().unwrap_or(0.0),
            BudgetPeriod::Monthly => state
                .monthly
                .get(&month_key(at.year(), at.month()))
                .copied()
                .unwrap_or(0.0),
            BudgetPeriod::Lifetime => state.total_cost,
        }
    }

    /// Configured thresholds plus the limit itself.
    fn thresholds(&self) -> Vec<f64> {
        let mut thresholds: Vec<f64> = self
            .budget
            .alert_thresholds
            .iter()
            .copied()
            .filter(|t| *t > 0.0 && *t < 1.0)
            .collect();
        thresholds.push(1.0);
        thresholds.sort_by(f64::total_cmp);
        thresholds.dedup();
        thresholds
    }

    fn check_budget(&self, state: &mut CostState, at: DateTime<Utc>) -> Vec<BudgetAlert> {
        if self.budget.limit <= 0.0 {
            return Vec::new();
        }
        let spent = self.period_spend(state, at);
        let fraction = spent / self.budget.limit;
        let mut raised = Vec::new();

        for (idx, threshold) in self.thresholds().into_iter().enumerate() {
            if fraction < threshold {
                break;
            }
            let recently_alerted = state
                .last_alert
                .get(&idx)
                .is_some_and(|last| at - *last < ChronoDuration::hours(1));
            if recently_alerted {
                continue;
            }

            let alert = BudgetAlert {
                threshold,
                spent,
                limit: self.budget.limit,
                period: self.budget.period,
                exceeded: threshold >= 1.0,
                raised_at: at,
            };
            if alert.exceeded {
                state.exceeded = true;
                tracing::warn!(
                    spent,
                    limit = self.budget.limit,
                    period = %self.budget.period,
                    "Budget exceeded"
                );
            } else {
                tracing::warn!(
                    spent,
                    limit = self.budget.limit,
                    threshold,
                    period = %self.budget.period,
                    "Budget threshold crossed"
                );
            }

            state.last_alert.insert(idx, at);
            if state.alerts.len() >= MAX_RETAINED_ALERTS {
                state.alerts.pop_front();
            }
            state.alerts.push_back(alert.clone());
            raised.push(alert);
        }
        raised
    }

    pub fn total_cost(&self) -> f64 {
        self.state.lock().total_cost
    }

    /// Whether spend has reached the limit. Advisory only.
    pub fn is_exceeded(&self) -> bool {
        self.state.lock().exceeded
    }

    pub fn totals_by_provider(&self) -> BTreeMap<ProviderId, CostRecord> {
        self.state.lock().by_provider.clone()
    }

    pub fn totals_by_operation(&self) -> BTreeMap<String, CostRecord> {
        self.state.lock().by_operation.clone()
    }

    pub fn daily_total(&self, date: NaiveDate) -> f64 {
        self.state.lock().daily.get(&date).copied().unwrap_or(0.0)
    }

    pub fn monthly_total(&self, year: i32, month: u32) -> f64 {
        self.state
            .lock()
            .monthly
            .get(&month_key(year, month))
            .copied()
            .unwrap_or(0.0)
    }

    pub fn alerts(&self) -> Vec<BudgetAlert> {
        self.state.lock().alerts.iter().cloned().collect()
    }

    pub fn recent_events(&self) -> Vec<UsageEvent> {
        self.state.lock().events.iter().cloned().collect()
    }

    pub fn reset(&self) {
        *self.state.lock() = CostState::default();
    }

    pub fn projection(&self, now: DateTime<Utc>) -> CostProjection {
        let state = self.state.lock();
        let month_to_date = state
            .monthly
            .get(&month_key(now.year(), now.month()))
            .copied()
            .unwrap_or(0.0);
        let daily_average = month_to_date / f64::from(now.day().max(1));
        let projected_month_total = daily_average * f64::from(days_in_month(now.date_naive()));

        let average_cost_per_request = if state.events.is_empty() {
            0.0
        } else {
            state.events.iter().map(|e| e.cost).sum::<f64>() / state.events.len() as f64
        };

        CostProjection {
            month_to_date,
            daily_average,
            projected_month_total,
            average_cost_per_request,
        }
    }

    pub fn optimization_recommendations(&self) -> Vec<Recommendation> {
        self.optimization_recommendations_at(Utc::now())
    }

    pub fn optimization_recommendations_at(&self, now: DateTime<Utc>) -> Vec<Recommendation> {
        let mut recommendations = Vec::new();

        {
            let state = self.state.lock();

            let per_unit: Vec<(ProviderId, f64)> = state
                .by_provider
                .iter()
                .filter_map(|(p, r)| r.cost_per_unit().map(|c| (*p, c)))
                .filter(|(_, c)| *c > 0.0)
                .collect();
            let most = per_unit.iter().max_by(|a, b| a.1.total_cmp(&b.1));
            let least = per_unit.iter().min_by(|a, b| a.1.total_cmp(&b.1));
            if let (Some(&(expensive, high)), Some(&(cheaper, low))) = (most, least) {
                if high > 2.0 * low {
                    recommendations.push(Recommendation::Reweight {
                        expensive,
                        cheaper,
                        ratio: high / low,
                    });
                }
            }

            let recent: Vec<&str> = state
                .events
                .iter()
                .rev()
                .take(DUPLICATE_WINDOW)
                .filter_map(|e| e.fingerprint.as_deref())
                .collect();
            let unique: HashSet<&str> = recent.iter().copied().collect();
            let duplicate_requests = recent.len() - unique.len();
            if duplicate_requests > 0 {
                recommendations.push(Recommendation::ExtendCacheTtl { duplicate_requests });
            }
        }

        if self.budget.limit > 0.0 {
            let projection = self.projection(now);
            let projected = match self.budget.period {
                BudgetPeriod::Daily => projection.daily_average,
                BudgetPeriod::Monthly => projection.projected_month_total,
                BudgetPeriod::Lifetime => self.total_cost(),
            };
            if projected > self.budget.limit {
                recommendations.push(Recommendation::BudgetOverrun {
                    projected,
                    limit: self.budget.limit,
                });
            }
        }

        recommendations
    }
}

impl Default for CostTracker {
    fn default() -> Self {
        Self::new(CostConfig::default())
    }
}
