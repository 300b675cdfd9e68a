//! Keyword embedding generation.
//!
//! The embedding is carried on the output for indexing the verdict later.
//! It never contributes to the score.

use async_trait::async_trait;
use std::sync::Arc;
use veritas_core::ProviderId;

use super::{
    EmbeddingClient, EvidenceProvider, ProviderContext, ProviderError, ProviderOutput, UsageReport,
};

/// Text embedded for a claim: its keywords when there are any, else the claim.
///
/// Verdicts are indexed and searched with the same text so both sides live
/// in one vector space.
pub(crate) fn embedding_text(claim: &str, ctx: &ProviderContext) -> String {
    if ctx.keywords.is_empty() {
        claim.to_string()
    } else {
        ctx.keywords.join(" ")
    }
}

pub struct EmbeddingGenerator {
    client: Arc<dyn EmbeddingClient>,
}

impl EmbeddingGenerator {
    pub fn new(client: Arc<dyn EmbeddingClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl EvidenceProvider for EmbeddingGenerator {
    fn id(&self) -> ProviderId {
        ProviderId::Embedding
    }

    async fn call(
        &self,
        claim: &str,
        ctx: &ProviderContext,
    ) -> Result<ProviderOutput, ProviderError> {
        let embedding = self.client.embed(&embedding_text(claim, ctx)).await?;
        if embedding.vector.is_empty() {
            return Err(ProviderError::ParseError(
                "embedding client returned an empty vector".to_string(),
            ));
        }

        let dimensions = embedding.vector.len();
        Ok(ProviderOutput::empty()
            .with_metadata("dimensions", dimensions)
            .with_usage(UsageReport {
                model: embedding.model,
                input_units: embedding.units,
                output_units: 0,
            })
            .with_embedding(embedding.vector))
    }
}
