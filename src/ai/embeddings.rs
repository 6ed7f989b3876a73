//! Embedding services used by the known-good query retrieval.
//!
//! Two backends:
//! - remote: a rig embedding model (Gemini `text-embedding-004`, OpenAI)
//! - local: fastembed with AllMiniLM-L6-V2 (384 dimensions), no network needed

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use fastembed::{EmbeddingModel as FastEmbedModel, InitOptions, TextEmbedding};
use parking_lot::RwLock;
use rig::client::EmbeddingsClient;
use rig::embeddings::EmbeddingModel;

use super::retry::{with_retry, RetryPolicy};
use crate::settings::schema::{AiProvider, EmbeddingBackend, EmbeddingSettings};

/// Dimension of the local AllMiniLM-L6-V2 model.
pub const LOCAL_EMBEDDING_DIM: usize = 384;

/// Text embedding capability consumed by the retrieval agent.
#[async_trait]
pub trait EmbeddingService: Send + Sync {
    /// Embed a single text into a vector of [`EmbeddingService::dimension`] floats.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    fn dimension(&self) -> usize;
}

/// Embedding backed by a rig [`EmbeddingModel`].
pub struct RigEmbedding<E: EmbeddingModel> {
    model: E,
    dimension: usize,
    policy: RetryPolicy,
}

impl<E: EmbeddingModel> RigEmbedding<E> {
    pub fn new(model: E, dimension: usize, policy: RetryPolicy) -> Self {
        Self {
            model,
            dimension,
            policy,
        }
    }
}

#[async_trait]
impl<E> EmbeddingService for RigEmbedding<E>
where
    E: EmbeddingModel + Send + Sync,
{
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let embedding = with_retry(&self.policy, "embedding", || async move {
            self.model
                .embed_text(text)
                .await
                .map_err(|e| anyhow::anyhow!("embedding request failed: {}", e))
        })
        .await?;

        let vector: Vec<f32> = embedding.vec.into_iter().map(|v| v as f32).collect();
        if vector.len() != self.dimension {
            anyhow::bail!(
                "embedding has {} dimensions, expected {}",
                vector.len(),
                self.dimension
            );
        }
        Ok(vector)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Local fastembed model, loaded lazily on first use.
pub struct LocalEmbedding {
    model: Arc<RwLock<Option<TextEmbedding>>>,
    cache_dir: PathBuf,
}

impl LocalEmbedding {
    pub fn new(cache_dir: PathBuf) -> Self {
        Self {
            model: Arc::new(RwLock::new(None)),
            cache_dir,
        }
    }

    fn embed_blocking(
        model: &RwLock<Option<TextEmbedding>>,
        cache_dir: PathBuf,
        text: String,
    ) -> Result<Vec<f32>> {
        if model.read().is_none() {
            let mut slot = model.write();
            if slot.is_none() {
                tracing::info!("[retrieval] Loading local embedding model into {:?}", cache_dir);
                let options = InitOptions::new(FastEmbedModel::AllMiniLML6V2)
                    .with_cache_dir(cache_dir)
                    .with_show_download_progress(true);
                *slot = Some(
                    TextEmbedding::try_new(options)
                        .context("Failed to initialize embedding model")?,
                );
            }
        }

        let guard = model.read();
        let embedder = guard.as_ref().context("Embedding model not initialized")?;
        embedder
            .embed(vec![text], None)
            .context("Failed to generate embeddings")?
            .into_iter()
            .next()
            .context("No embedding returned")
    }
}

#[async_trait]
impl EmbeddingService for LocalEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let model = self.model.clone();
        let cache_dir = self.cache_dir.clone();
        let text = text.to_string();

        tokio::task::spawn_blocking(move || Self::embed_blocking(&model, cache_dir, text))
            .await
            .context("Embedding task panicked")?
    }

    fn dimension(&self) -> usize {
        LOCAL_EMBEDDING_DIM
    }
}

/// Build the configured embedding service.
pub fn create_embedding_service(
    settings: &EmbeddingSettings,
    provider: AiProvider,
    api_key: Option<&str>,
    policy: RetryPolicy,
) -> Result<Arc<dyn EmbeddingService>> {
    match settings.backend {
        EmbeddingBackend::Local => {
            let cache_dir = settings.cache_dir();
            tracing::info!("[retrieval] Using local embeddings (AllMiniLM-L6-V2)");
            Ok(Arc::new(LocalEmbedding::new(cache_dir)))
        }
        EmbeddingBackend::Remote => {
            let api_key = api_key
                .filter(|k| !k.is_empty())
                .context("Remote embeddings require an API key")?;
            tracing::info!(
                "[retrieval] Using remote embeddings: {} ({} dims)",
                settings.model,
                settings.dimension
            );
            let service: Arc<dyn EmbeddingService> = match provider {
                AiProvider::Gemini => {
                    let client = rig::providers::gemini::Client::new(api_key);
                    let model = client.embedding_model_with_ndims(&settings.model, settings.dimension);
                    Arc::new(RigEmbedding::new(model, settings.dimension, policy))
                }
                AiProvider::OpenAi => {
                    let client = rig::providers::openai::Client::new(api_key);
                    let model = client.embedding_model_with_ndims(&settings.model, settings.dimension);
                    Arc::new(RigEmbedding::new(model, settings.dimension, policy))
                }
            };
            Ok(service)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_backend_requires_api_key() {
        let settings = EmbeddingSettings::default();
        let result = create_embedding_service(
            &settings,
            AiProvider::Gemini,
            None,
            RetryPolicy::immediate(1),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_local_backend_reports_dimension() {
        let settings = EmbeddingSettings {
            backend: EmbeddingBackend::Local,
            ..Default::default()
        };
        let service =
            create_embedding_service(&settings, AiProvider::Gemini, None, RetryPolicy::immediate(1))
                .unwrap();
        assert_eq!(service.dimension(), LOCAL_EMBEDDING_DIM);
    }
}
