//! LLM reasoning pass.

use async_trait::async_trait;
use std::sync::Arc;
use veritas_core::{parse_llm_response, ProviderId};

use super::{
    CompletionConfig, EvidenceProvider, LlmProvider, ProviderContext, ProviderError,
    ProviderOutput, UsageReport,
};
use crate::prompts::verification_messages;

pub struct LlmReasoner {
    provider: Arc<dyn LlmProvider>,
    config: CompletionConfig,
}

impl LlmReasoner {
    pub fn new(provider: Arc<dyn LlmProvider>, config: CompletionConfig) -> Self {
        Self { provider, config }
    }

    pub fn config(&self) -> &CompletionConfig {
        &self.config
    }
}

#[async_trait]
impl EvidenceProvider for LlmReasoner {
    fn id(&self) -> ProviderId {
        ProviderId::Llm
    }

    async fn call(
        &self,
        claim: &str,
        ctx: &ProviderContext,
    ) -> Result<ProviderOutput, ProviderError> {
        let messages = verification_messages(claim, &ctx.keywords);
        let response = self.provider.complete(messages, &self.config).await?;

        let model = if response.model.is_empty() {
            self.config.model.clone()
        } else {
            response.model.clone()
        };

        let assessment = parse_llm_response(&response.content).map_err(|e| {
            tracing::warn!(
                provider = self.provider.name(),
                model = %model,
                error = %e,
                "LLM response could not be parsed"
            );
            ProviderError::ParseError(e.to_string())
        })?;

        let mut output = ProviderOutput::scored(assessment.truth_score, assessment.confidence)
            .with_classification(assessment.classification)
            .with_usage(UsageReport {
                model,
                input_units: u64::from(response.usage.prompt_tokens),
                output_units: u64::from(response.usage.completion_tokens),
            });
        if let Some(reasoning) = assessment.reasoning {
            output = output.with_metadata("summary", reasoning);
        }
        if !assessment.key_points.is_empty() {
            output = output.with_metadata("key_points", assessment.key_points);
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{ChatMessage, CompletionResponse, TokenUsage};
    use veritas_core::{Classification, Strategy};

    struct CannedLlm {
        content: String,
    }

    #[async_trait]
    impl LlmProvider for CannedLlm {
        async fn complete(
            &self,
            messages: Vec<ChatMessage>,
            config: &CompletionConfig,
        ) -> Result<CompletionResponse, ProviderError> {
            assert_eq!(messages.len(), 2);
            Ok(CompletionResponse {
                content: self.content.clone(),
                usage: TokenUsage {
                    prompt_tokens: 420,
                    completion_tokens: 80,
                },
                model: config.model.clone(),
            })
        }

        fn name(&self) -> &str {
            "canned"
        }
    }

    fn reasoner(content: &str) -> LlmReasoner {
        LlmReasoner::new(
            Arc::new(CannedLlm {
                content: content.to_string(),
            }),
            CompletionConfig::default(),
        )
    }

    fn ctx() -> ProviderContext {
        ProviderContext::new(Strategy::Comprehensive, vec![])
    }

    #[tokio::test]
    async fn test_assessment_becomes_scored_output() {
        let output = reasoner(
            r#"{"classification": "likely_false", "confidence": 0.8, "reasoning": "No such study exists"}"#,
        )
        .call("Some claim to verify", &ctx())
        .await
        .unwrap();

        assert_eq!(output.classification, Some(Classification::LikelyFalse));
        assert_eq!(output.confidence, Some(0.8));
        assert!((output.raw_score.unwrap() - 0.3).abs() < 1e-9);

        let usage = output.usage.unwrap();
        assert_eq!(usage.model, "llama-3.1-8b-instant");
        assert_eq!(usage.input_units, 420);
        assert_eq!(usage.output_units, 80);
    }

    #[tokio::test]
    async fn test_unparseable_reply_is_parse_error() {
        let err = reasoner("I'd rather not say.")
            .call("Some claim to verify", &ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::ParseError(_)));
        assert!(!err.is_retryable());
    }
}
