//! Similarity search against previously stored verdicts.

use async_trait::async_trait;
use moka::future::Cache;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use veritas_core::ProviderId;

use super::embedding::embedding_text;
use super::{
    EmbeddingClient, EvidenceProvider, ProviderContext, ProviderError, ProviderOutput,
    UsageReport, VectorIndex, VectorMatch, VectorRecord,
};

pub const DEFAULT_MIN_SIMILARITY: f64 = 0.85;
pub const DEFAULT_COLLECTION_CHECK_TTL: Duration = Duration::from_secs(300);

pub struct VectorSimilarity {
    index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn EmbeddingClient>,
    collection: String,
    min_similarity: f64,
    /// Collection existence, cached per collection name
    collection_checks: Cache<String, bool>,
}

impl VectorSimilarity {
    pub fn new(
        index: Arc<dyn VectorIndex>,
        embedder: Arc<dyn EmbeddingClient>,
        collection: impl Into<String>,
    ) -> Self {
        Self {
            index,
            embedder,
            collection: collection.into(),
            min_similarity: DEFAULT_MIN_SIMILARITY,
            collection_checks: Self::check_cache(DEFAULT_COLLECTION_CHECK_TTL),
        }
    }

    pub fn with_min_similarity(mut self, min_similarity: f64) -> Self {
        self.min_similarity = min_similarity.clamp(0.0, 1.0);
        self
    }

    pub fn with_collection_check_ttl(mut self, ttl: Duration) -> Self {
        self.collection_checks = Self::check_cache(ttl);
        self
    }

    fn check_cache(ttl: Duration) -> Cache<String, bool> {
        Cache::builder().max_capacity(64).time_to_live(ttl).build()
    }

    async fn collection_exists(&self) -> Result<bool, ProviderError> {
        if let Some(exists) = self.collection_checks.get(&self.collection).await {
            return Ok(exists);
        }
        let exists = self.index.collection_exists(&self.collection).await?;
        self.collection_checks
            .insert(self.collection.clone(), exists)
            .await;
        tracing::debug!(collection = %self.collection, exists, "vector collection checked");
        Ok(exists)
    }
}

#[async_trait]
impl EvidenceProvider for VectorSimilarity {
    fn id(&self) -> ProviderId {
        ProviderId::Vector
    }

    async fn call(
        &self,
        claim: &str,
        ctx: &ProviderContext,
    ) -> Result<ProviderOutput, ProviderError> {
        if !self.collection_exists().await? {
            return Err(ProviderError::CollectionNotFound(self.collection.clone()));
        }

        let embedding = self.embedder.embed(&embedding_text(claim, ctx)).await?;
        let usage = UsageReport {
            model: embedding.model.clone(),
            input_units: embedding.units,
            output_units: 0,
        };
        let matches = self
            .index
            .search(&self.collection, &embedding.vector, 1)
            .await?;

        let output = match matches.into_iter().next() {
            Some(best) if best.similarity >= self.min_similarity => {
                let score = (best.overall_score / 100.0).clamp(0.0, 1.0);
                let confidence = best.similarity.clamp(0.0, 1.0) * best.confidence.clamp(0.0, 1.0);
                ProviderOutput::scored(score, confidence)
                    .with_classification(best.classification)
                    .with_metadata("summary", format!("similar to verified claim {}", best.id))
                    .with_metadata("match_id", best.id)
                    .with_metadata("similarity", best.similarity)
            }
            Some(best) => ProviderOutput::empty()
                .with_metadata("nearest_similarity", best.similarity),
            None => ProviderOutput::empty(),
        };

        Ok(output.with_usage(usage).with_embedding(embedding.vector))
    }
}

/// Cosine similarity; 0.0 for mismatched or zero-length vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot_product / (norm_a * norm_b)
    }
}

/// Process-local vector index with exact cosine search.
#[derive(Default)]
pub struct InMemoryVectorIndex {
    collections: RwLock<HashMap<String, Vec<VectorRecord>>>,
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_collection(&self, name: &str) {
        self.collections
            .write()
            .entry(name.to_string())
            .or_default();
    }

    pub fn record_count(&self, collection: &str) -> Option<usize> {
        self.collections.read().get(collection).map(Vec::len)
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn collection_exists(&self, collection: &str) -> Result<bool, ProviderError> {
        Ok(self.collections.read().contains_key(collection))
    }

    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
    ) -> Result<Vec<VectorMatch>, ProviderError> {
        let collections = self.collections.read();
        let records = collections
            .get(collection)
            .ok_or_else(|| ProviderError::CollectionNotFound(collection.to_string()))?;

        let mut matches: Vec<VectorMatch> = records
            .iter()
            .map(|r| VectorMatch {
                id: r.id.clone(),
                similarity: f64::from(cosine_similarity(vector, &r.vector)).clamp(0.0, 1.0),
                overall_score: r.overall_score,
                confidence: r.confidence,
                classification: r.classification,
            })
            .collect();
        matches.sort_by(|a, b| b.similarity.total_cmp(&a.similarity).then(a.id.cmp(&b.id)));
        matches.truncate(limit);
        Ok(matches)
    }

    async fn upsert(&self, collection: &str, record: VectorRecord) -> Result<(), ProviderError> {
        let mut collections = self.collections.write();
        let records = collections
            .get_mut(collection)
            .ok_or_else(|| ProviderError::CollectionNotFound(collection.to_string()))?;

        match records.iter_mut().find(|r| r.id == record.id) {
            Some(existing) => *existing = record,
            None => records.push(record),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::Embedding;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use veritas_core::{Classification, Strategy};

    struct FixedEmbedder(Vec<f32>);

    #[async_trait]
    impl EmbeddingClient for FixedEmbedder {
        async fn embed(&self, _text: &str) -> Result<Embedding, ProviderError> {
            Ok(Embedding {
                vector: self.0.clone(),
                model: "text-embedding-3-small".to_string(),
                units: 6,
            })
        }
    }

    /// Counts existence checks.
    struct CountingIndex {
        inner: InMemoryVectorIndex,
        checks: AtomicUsize,
    }

    #[async_trait]
    impl VectorIndex for CountingIndex {
        async fn collection_exists(&self, collection: &str) -> Result<bool, ProviderError> {
            self.checks.fetch_add(1, Ordering::SeqCst);
            self.inner.collection_exists(collection).await
        }

        async fn search(
            &self,
            collection: &str,
            vector: &[f32],
            limit: usize,
        ) -> Result<Vec<VectorMatch>, ProviderError> {
            self.inner.search(collection, vector, limit).await
        }

        async fn upsert(&self, collection: &str, record: VectorRecord) -> Result<(), ProviderError> {
            self.inner.upsert(collection, record).await
        }
    }

    fn record(id: &str, vector: Vec<f32>, score: f64) -> VectorRecord {
        VectorRecord {
            id: id.to_string(),
            vector,
            claim: "stored claim".to_string(),
            classification: Classification::from_score(score),
            overall_score: score,
            confidence: 0.9,
        }
    }

    fn ctx() -> ProviderContext {
        ProviderContext::new(Strategy::Deep, vec!["vacina".to_string()])
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[tokio::test]
    async fn test_close_match_is_scored() {
        let index = Arc::new(InMemoryVectorIndex::new());
        index.create_collection("verdicts");
        index
            .upsert("verdicts", record("v1", vec![1.0, 0.0, 0.0], 90.0))
            .await
            .unwrap();

        let provider = VectorSimilarity::new(
            index,
            Arc::new(FixedEmbedder(vec![1.0, 0.0, 0.0])),
            "verdicts",
        );
        let output = provider.call("claim", &ctx()).await.unwrap();

        assert_eq!(output.raw_score, Some(0.9));
        assert!((output.confidence.unwrap() - 0.9).abs() < 1e-6);
        assert_eq!(output.metadata["match_id"], "v1");
        assert_eq!(output.usage.unwrap().input_units, 6);
    }

    #[tokio::test]
    async fn test_distant_match_has_no_score() {
        let index = Arc::new(InMemoryVectorIndex::new());
        index.create_collection("verdicts");
        index
            .upsert("verdicts", record("v1", vec![0.0, 1.0, 0.0], 90.0))
            .await
            .unwrap();

        let provider = VectorSimilarity::new(
            index,
            Arc::new(FixedEmbedder(vec![1.0, 0.2, 0.0])),
            "verdicts",
        );
        let output = provider.call("claim", &ctx()).await.unwrap();
        assert!(output.success);
        assert_eq!(output.raw_score, None);
    }

    #[tokio::test]
    async fn test_missing_collection_is_cached() {
        let index = Arc::new(CountingIndex {
            inner: InMemoryVectorIndex::new(),
            checks: AtomicUsize::new(0),
        });
        let provider = VectorSimilarity::new(
            index.clone(),
            Arc::new(FixedEmbedder(vec![1.0])),
            "verdicts",
        );

        for _ in 0..3 {
            let err = provider.call("claim", &ctx()).await.unwrap_err();
            assert!(matches!(err, ProviderError::CollectionNotFound(_)));
            assert!(!err.counts_as_breaker_failure());
        }
        assert_eq!(index.checks.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_upsert_replaces_by_id() {
        let index = InMemoryVectorIndex::new();
        index.create_collection("verdicts");
        index.upsert("verdicts", record("v1", vec![1.0], 10.0)).await.unwrap();
        index.upsert("verdicts", record("v1", vec![1.0], 70.0)).await.unwrap();
        assert_eq!(index.record_count("verdicts"), Some(1));

        let found = index.search("verdicts", &[1.0], 5).await.unwrap();
        assert_eq!(found[0].overall_score, 70.0);
        assert!(index.upsert("missing", record("x", vec![1.0], 1.0)).await.is_err());
    }
}
