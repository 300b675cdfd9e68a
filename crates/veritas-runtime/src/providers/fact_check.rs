//! Fact-check database lookup.
//!
//! Publisher ratings are free text in Portuguese or English. Each rating is
//! mapped to a truth score; the reviews found are averaged, and disagreement
//! between them lowers the confidence.

use async_trait::async_trait;
use std::sync::Arc;
use veritas_core::ProviderId;

use super::{EvidenceProvider, FactCheckClient, ProviderContext, ProviderError, ProviderOutput};

/// Confidence when every review agrees.
const DEFAULT_RELIABILITY: f64 = 0.95;

/// Ordered: the first needle contained in the rating wins, so negations
/// and longer phrases come before the words they contain.
const RATING_SCORES: &[(&str, f64)] = &[
    ("not true", 0.0),
    ("not correct", 0.0),
    ("not accurate", 0.0),
    ("incorrect", 0.0),
    ("inaccurate", 0.2),
    ("não é verdade", 0.0),
    ("não é verdadeiro", 0.0),
    ("não é correto", 0.0),
    ("incorreto", 0.0),
    ("pants on fire", 0.0),
    ("mostly false", 0.2),
    ("mostly true", 0.8),
    ("half true", 0.5),
    ("meia verdade", 0.5),
    ("half", 0.5),
    ("mixed", 0.5),
    ("misto", 0.5),
    ("impreciso", 0.4),
    ("distorcido", 0.3),
    ("exagerado", 0.4),
    ("enganoso", 0.25),
    ("misleading", 0.25),
    ("untrue", 0.0),
    ("falso", 0.0),
    ("false", 0.0),
    ("fake", 0.0),
    ("verdadeiro", 1.0),
    ("verdade", 1.0),
    ("correto", 1.0),
    ("accurate", 1.0),
    ("correct", 1.0),
    ("true", 1.0),
];

/// Truth score for a publisher rating, or `None` when it is not recognized.
pub fn rating_truth_score(rating: &str) -> Option<f64> {
    let rating = rating.trim().to_lowercase();
    RATING_SCORES
        .iter()
        .find(|(needle, _)| rating.contains(needle))
        .map(|(_, score)| *score)
}

pub struct FactCheckLookup {
    client: Arc<dyn FactCheckClient>,
    reliability: f64,
}

impl FactCheckLookup {
    pub fn new(client: Arc<dyn FactCheckClient>) -> Self {
        Self {
            client,
            reliability: DEFAULT_RELIABILITY,
        }
    }

    pub fn with_reliability(mut self, reliability: f64) -> Self {
        self.reliability = reliability.clamp(0.0, 1.0);
        self
    }
}

#[async_trait]
impl EvidenceProvider for FactCheckLookup {
    fn id(&self) -> ProviderId {
        ProviderId::FactCheck
    }

    async fn call(
        &self,
        claim: &str,
        ctx: &ProviderContext,
    ) -> Result<ProviderOutput, ProviderError> {
        let response = self.client.search(&ctx.keywords, claim).await?;
        if !response.found {
            return Ok(ProviderOutput::empty().with_metadata("summary", "no fact-check found"));
        }

        let scores: Vec<f64> = response
            .reviews
            .iter()
            .filter_map(|r| rating_truth_score(&r.rating))
            .collect();
        if scores.is_empty() {
            tracing::debug!(
                reviews = response.reviews.len(),
                "fact-check reviews carried no recognized rating"
            );
            return Ok(ProviderOutput::empty()
                .with_metadata("summary", "fact-check ratings not recognized")
                .with_metadata("reviews", response.reviews.len()));
        }

        let n = scores.len() as f64;
        let mean = scores.iter().sum::<f64>() / n;
        let variance = scores.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / n;
        let confidence = self.reliability * (1.0 - variance.sqrt());

        let publishers: Vec<String> = response
            .reviews
            .iter()
            .filter_map(|r| r.publisher.clone())
            .collect();
        let summary = response
            .reviews
            .iter()
            .map(|r| match &r.publisher {
                Some(p) => format!("{} ({})", r.rating, p),
                None => r.rating.clone(),
            })
            .collect::<Vec<_>>()
            .join("; ");

        Ok(ProviderOutput::scored(mean, confidence)
            .with_metadata("summary", summary)
            .with_metadata("reviews", scores.len())
            .with_metadata("publishers", publishers))
    }
}
