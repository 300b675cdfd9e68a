//! Regex fallback source.

use async_trait::async_trait;
use veritas_core::{patterns, ProviderId};

use super::{EvidenceProvider, ProviderContext, ProviderError, ProviderOutput};

/// Local, free and always available. Produces no score when no rule fires.
#[derive(Debug, Clone, Copy, Default)]
pub struct PatternFallback;

impl PatternFallback {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl EvidenceProvider for PatternFallback {
    fn id(&self) -> ProviderId {
        ProviderId::Pattern
    }

    async fn call(
        &self,
        claim: &str,
        _ctx: &ProviderContext,
    ) -> Result<ProviderOutput, ProviderError> {
        let assessment = patterns::assess(claim);
        let signals = assessment.signal_names().join(", ");

        let output = match (assessment.score, assessment.confidence) {
            (Some(score), Some(confidence)) => ProviderOutput::scored(score, confidence)
                .with_metadata("summary", format!("pattern signals: {}", signals)),
            _ => ProviderOutput::empty(),
        };
        Ok(output.with_metadata("signals", assessment.signals.len()))
    }
}
