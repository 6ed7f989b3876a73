use std::sync::Arc;

use super::AgentError;
use crate::ai::embeddings::EmbeddingService;
use crate::retrieval::{format_known_good, KnownGoodQuery, KnownGoodStore, SimilarQuery};

/// Looks up and records known-good question/SQL pairs.
pub struct RetrievalAgent {
    embedder: Arc<dyn EmbeddingService>,
    store: Arc<dyn KnownGoodStore>,
    top_k: usize,
}

impl RetrievalAgent {
    pub fn new(
        embedder: Arc<dyn EmbeddingService>,
        store: Arc<dyn KnownGoodStore>,
        top_k: usize,
    ) -> Self {
        Self {
            embedder,
            store,
            top_k,
        }
    }

    pub fn store(&self) -> &Arc<dyn KnownGoodStore> {
        &self.store
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, AgentError> {
        self.embedder
            .embed(text)
            .await
            .map_err(|e| AgentError::Service {
                service: "embedding",
                message: format!("{e:#}"),
            })
    }

    /// Up to `top_k` stored queries most similar to `question`.
    pub async fn retrieve_similar(&self, question: &str) -> Result<Vec<SimilarQuery>, AgentError> {
        let embedding = self.embed(question).await?;
        let hits = self
            .store
            .search(&embedding, self.top_k)
            .await
            .map_err(store_error)?;
        tracing::debug!(
            "[retrieval] {} similar queries from {} store",
            hits.len(),
            self.store.backend()
        );
        Ok(hits)
    }

    /// Similar queries rendered as the few-shot block for SQL synthesis.
    pub async fn retrieve_context(&self, question: &str) -> Result<String, AgentError> {
        let hits = self.retrieve_similar(question).await?;
        Ok(format_known_good(&hits))
    }

    /// Embed and upsert `question`, keeping any SQL already on record.
    pub async fn store_known_good(&self, question: &str) -> Result<(), AgentError> {
        let embedding = self.embed(question).await?;
        self.store
            .upsert(KnownGoodQuery::new(question, embedding))
            .await
            .map_err(store_error)
    }

    /// Embed and upsert `question` together with its validated SQL.
    pub async fn store_known_good_with_sql(
        &self,
        question: &str,
        sql: &str,
    ) -> Result<(), AgentError> {
        let embedding = self.embed(question).await?;
        self.store
            .upsert(KnownGoodQuery::new(question, embedding).with_sql(sql))
            .await
            .map_err(store_error)
    }
}

fn store_error(err: crate::error::KudosError) -> AgentError {
    AgentError::Service {
        service: "known-good store",
        message: err.to_string(),
    }
}
