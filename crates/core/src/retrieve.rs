use crate::error::BackendError;
use crate::models::{ScopeFilter, VectorMatch};
use crate::traits::{Embedder, VectorIndex};

pub const CONTEXT_SEPARATOR: &str = "\n---\n";

#[derive(Debug, Clone, Copy)]
pub struct RetrievalOptions {
    pub top_k: usize,
    pub min_score: f64,
}

impl Default for RetrievalOptions {
    fn default() -> Self {
        Self {
            top_k: 4,
            min_score: 0.68,
        }
    }
}

pub struct KnowledgeRetriever<V, E>
where
    V: VectorIndex,
    E: Embedder,
{
    index: V,
    embedder: E,
    options: RetrievalOptions,
}

impl<V, E> KnowledgeRetriever<V, E>
where
    V: VectorIndex + Send + Sync,
    E: Embedder + Send + Sync,
{
    pub fn new(index: V, embedder: E) -> Self {
        Self {
            index,
            embedder,
            options: RetrievalOptions::default(),
        }
    }

    pub fn with_options(mut self, options: RetrievalOptions) -> Self {
        self.options = options;
        self
    }

    /// Scoped to the agent tag and chunks visible to `tenant_id` (its
    /// own plus shared). Degrades to an empty string when any
    /// collaborator fails.
    pub async fn retrieve(&self, query: &str, tag: &str, tenant_id: i64) -> String {
        match self.search(query, tag, tenant_id).await {
            Ok(matches) => {
                let passages: Vec<String> = matches
                    .into_iter()
                    .filter(|found| found.score >= self.options.min_score)
                    .filter_map(|found| found.metadata.map(|metadata| metadata.text))
                    .filter(|text| !text.trim().is_empty())
                    .collect();

                passages.join(CONTEXT_SEPARATOR)
            }
            Err(error) => {
                tracing::warn!(%error, tag, tenant_id, "knowledge retrieval degraded to empty context");
                String::new()
            }
        }
    }

    /// Raw ranked matches without the score cut.
    pub async fn retrieve_debug(
        &self,
        query: &str,
        tag: &str,
        tenant_id: i64,
    ) -> Result<Vec<VectorMatch>, BackendError> {
        self.search(query, tag, tenant_id).await
    }

    async fn search(
        &self,
        query: &str,
        tag: &str,
        tenant_id: i64,
    ) -> Result<Vec<VectorMatch>, BackendError> {
        let vector = self.embedder.embed(query).await?;
        let filter = ScopeFilter::for_tenant(tag, tenant_id);
        self.index.query(&vector, self.options.top_k, &filter).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::VectorMetadata;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    struct FakeEmbedder;

    #[async_trait]
    impl Embedder for FakeEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, BackendError> {
            Ok(vec![0.1, 0.2, 0.3])
        }
    }

    struct BrokenEmbedder;

    #[async_trait]
    impl Embedder for BrokenEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, BackendError> {
            Err(BackendError::Request("embedding service down".to_string()))
        }
    }

    #[derive(Default)]
    struct FakeIndex {
        matches: Vec<VectorMatch>,
        last_filter: Mutex<Option<ScopeFilter>>,
    }

    #[async_trait]
    impl VectorIndex for FakeIndex {
        async fn upsert(&self, _records: &[crate::models::VectorRecord]) -> Result<(), BackendError> {
            Ok(())
        }

        async fn query(
            &self,
            _vector: &[f32],
            _top_k: usize,
            filter: &ScopeFilter,
        ) -> Result<Vec<VectorMatch>, BackendError> {
            *self.last_filter.lock() = Some(filter.clone());
            Ok(self.matches.clone())
        }

        async fn delete_by_document(&self, _doc_id: i64) -> Result<(), BackendError> {
            Ok(())
        }
    }

    fn found(score: f64, text: &str, scope: &str) -> VectorMatch {
        VectorMatch {
            id: format!("prefix_{text}"),
            score,
            metadata: Some(VectorMetadata {
                text: text.to_string(),
                tag: "Advogado Civil".to_string(),
                scope: scope.to_string(),
                source_file: "contrato.txt".to_string(),
                doc_id: 1,
            }),
        }
    }

    #[tokio::test]
    async fn low_confidence_matches_are_dropped() {
        let index = FakeIndex {
            matches: vec![found(0.91, "forte", "7"), found(0.2, "fraco", "7")],
            ..Default::default()
        };
        let retriever = KnowledgeRetriever::new(index, FakeEmbedder);

        let context = retriever.retrieve("clausula", "Advogado Civil", 7).await;
        assert_eq!(context, "forte");
    }

    #[tokio::test]
    async fn surviving_matches_are_joined_with_the_separator() {
        let index = FakeIndex {
            matches: vec![found(0.9, "um", "7"), found(0.8, "dois", "system")],
            ..Default::default()
        };
        let retriever = KnowledgeRetriever::new(index, FakeEmbedder);

        let context = retriever.retrieve("clausula", "Advogado Civil", 7).await;
        assert_eq!(context, format!("um{CONTEXT_SEPARATOR}dois"));
    }

    #[tokio::test]
    async fn query_filter_scopes_to_tenant_and_shared() {
        let index = FakeIndex::default();
        let retriever = KnowledgeRetriever::new(index, FakeEmbedder);

        let _ = retriever.retrieve("clausula", "Advogado Civil", 7).await;
        let filter = retriever.index.last_filter.lock().clone().expect("query issued");
        assert_eq!(filter, ScopeFilter::for_tenant("Advogado Civil", 7));
    }

    #[tokio::test]
    async fn embedding_failure_degrades_to_empty_context() {
        let index = FakeIndex {
            matches: vec![found(0.9, "um", "7")],
            ..Default::default()
        };
        let retriever = KnowledgeRetriever::new(index, BrokenEmbedder);

        let context = retriever.retrieve("clausula", "Advogado Civil", 7).await;
        assert!(context.is_empty());
    }

    #[tokio::test]
    async fn debug_variant_keeps_raw_scores() {
        let index = FakeIndex {
            matches: vec![found(0.3, "fraco", "7")],
            ..Default::default()
        };
        let retriever = KnowledgeRetriever::new(index, FakeEmbedder);

        let matches = retriever
            .retrieve_debug("clausula", "Advogado Civil", 7)
            .await
            .expect("debug search should succeed");
        assert_eq!(matches.len(), 1);
        assert!(matches[0].score < 0.68);
    }
}
