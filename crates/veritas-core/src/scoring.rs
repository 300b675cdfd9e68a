//! Weighted combination of provider results into a verdict.
//!
//! Only usable results take part: successful, with a score and a
//! confidence. Weights are re-normalized over those results, so a missing
//! source never drags the score toward zero. Contributions are summed in
//! canonical provider order, so the same set of results always yields the
//! same numbers whatever order the providers finished in.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{Classification, EvidenceResult, ProviderId, Verdict};

/// Per-provider weights.
///
/// Embedding output never carries a truth score, so it has no weight.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreWeights {
    pub factcheck: f64,
    pub llm: f64,
    pub vector: f64,
    pub pattern: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            factcheck: 0.40,
            llm: 0.35,
            vector: 0.25,
            pattern: 0.25,
        }
    }
}

impl ScoreWeights {
    pub fn weight(&self, provider: ProviderId) -> f64 {
        let w = match provider {
            ProviderId::FactCheck => self.factcheck,
            ProviderId::Llm => self.llm,
            ProviderId::Vector => self.vector,
            ProviderId::Pattern => self.pattern,
            ProviderId::Embedding => 0.0,
        };
        if w.is_finite() {
            w.max(0.0)
        } else {
            0.0
        }
    }
}

/// Combined outcome before it is wrapped in a `Verdict`.
#[derive(Debug, Clone, PartialEq)]
pub struct CombinedScore {
    /// 0-100
    pub score: f64,
    /// 0-1
    pub confidence: f64,
    pub classification: Classification,
    pub sources: Vec<ProviderId>,
}

impl CombinedScore {
    fn no_data() -> Self {
        Self {
            score: 0.0,
            confidence: 0.0,
            classification: Classification::NoData,
            sources: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScoreCombiner {
    weights: ScoreWeights,
}

impl ScoreCombiner {
    pub fn new(weights: ScoreWeights) -> Self {
        Self { weights }
    }

    pub fn weights(&self) -> &ScoreWeights {
        &self.weights
    }

    pub fn combine(&self, evidences: &[EvidenceResult]) -> CombinedScore {
        let mut usable: Vec<(ProviderId, f64, f64, f64)> = evidences
            .iter()
            .filter(|e| e.is_usable())
            .filter_map(|e| {
                let weight = self.weights.weight(e.provider_id);
                if weight <= 0.0 {
                    return None;
                }
                let score = e.normalized_score()?;
                let confidence = e.confidence?.clamp(0.0, 1.0);
                Some((e.provider_id, weight, score, confidence))
            })
            .collect();

        if usable.is_empty() {
            return CombinedScore::no_data();
        }

        usable.sort_by(|a, b| {
            a.0.cmp(&b.0)
                .then(a.2.total_cmp(&b.2))
                .then(a.3.total_cmp(&b.3))
        });

        let total_weight: f64 = usable.iter().map(|u| u.1).sum();
        let weighted_score: f64 = usable.iter().map(|u| u.1 * u.2).sum();
        let weighted_confidence: f64 = usable.iter().map(|u| u.1 * u.3).sum();

        let score = round_to(100.0 * (weighted_score / total_weight).clamp(0.0, 1.0), 2);
        let confidence = round_to((weighted_confidence / total_weight).clamp(0.0, 1.0), 4);

        let mut sources: Vec<ProviderId> = usable.iter().map(|u| u.0).collect();
        sources.dedup();

        CombinedScore {
            score,
            confidence,
            classification: Classification::from_score(score),
            sources,
        }
    }

    /// Combine results and build the verdict that carries them.
    pub fn verdict(&self, evidences: Vec<EvidenceResult>, processing_time_ms: u64) -> Verdict {
        let combined = self.combine(&evidences);
        let message = if combined.classification == Classification::NoData {
            let failed = evidences.iter().filter(|e| !e.success).count();
            Some(format!(
                "no evidence source produced a usable result ({} of {} failed)",
                failed,
                evidences.len()
            ))
        } else {
            None
        };

        Verdict {
            request_id: Uuid::new_v4(),
            classification: combined.classification,
            overall_confidence: combined.confidence,
            overall_score: combined.score,
            sources: combined.sources,
            evidences,
            cached: false,
            processing_time_ms,
            message,
            created_at: Utc::now(),
        }
    }
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}
