use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use tracing::info;

use crate::config::{EmbeddingConfig, EmbeddingModelChoice};
use crate::error::RetrievalError;

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, RetrievalError>;

    async fn embed_one(&self, text: &str) -> Result<Vec<f32>, RetrievalError> {
        self.embed(vec![text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| RetrievalError::Embedding("embedder returned no vector".into()))
    }
}

/// Local ONNX embeddings. Inference runs on the blocking pool so it never
/// stalls the async scheduler.
pub struct FastEmbedder {
    model: Arc<Mutex<TextEmbedding>>,
    batch_size: usize,
}

fn model_for(choice: EmbeddingModelChoice) -> EmbeddingModel {
    match choice {
        EmbeddingModelChoice::AllMiniLmL6V2 => EmbeddingModel::AllMiniLML6V2,
        EmbeddingModelChoice::BgeSmallEnV15 => EmbeddingModel::BGESmallENV15,
        EmbeddingModelChoice::BgeBaseEnV15 => EmbeddingModel::BGEBaseENV15,
    }
}

impl FastEmbedder {
    pub async fn new(config: &EmbeddingConfig) -> Result<Self, RetrievalError> {
        let options = InitOptions::new(model_for(config.model))
            .with_show_download_progress(config.show_download_progress);
        let model = tokio::task::spawn_blocking(move || TextEmbedding::try_new(options))
            .await
            .map_err(|e| RetrievalError::Embedding(format!("model loader panicked: {e}")))?
            .map_err(|e| RetrievalError::Embedding(format!("failed to load model: {e}")))?;
        info!(model = ?config.model, "embedding model ready");

        Ok(Self {
            model: Arc::new(Mutex::new(model)),
            batch_size: config.batch_size.max(1),
        })
    }
}

#[async_trait]
impl Embedder for FastEmbedder {
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, RetrievalError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let model = Arc::clone(&self.model);
        let batch_size = self.batch_size;
        tokio::task::spawn_blocking(move || {
            let mut model = model
                .lock()
                .map_err(|_| RetrievalError::Embedding("embedding model lock poisoned".into()))?;
            model
                .embed(texts, Some(batch_size))
                .map_err(|e| RetrievalError::Embedding(e.to_string()))
        })
        .await
        .map_err(|e| RetrievalError::Embedding(format!("embedding task panicked: {e}")))?
    }
}

/// Cosine similarity; 0.0 for mismatched or zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na * nb)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_of_parallel_and_orthogonal_vectors() {
        assert!((cosine_similarity(&[1.0, 2.0], &[2.0, 4.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    // Downloads the ONNX model; opt in with TUMOR_BOARD_EMBED_TESTS=1.
    #[tokio::test]
    async fn fastembed_produces_fixed_width_vectors() {
        if std::env::var("TUMOR_BOARD_EMBED_TESTS").is_err() {
            return;
        }
        let embedder = FastEmbedder::new(&EmbeddingConfig::default()).await.unwrap();
        let vectors = embedder
            .embed(vec!["BCLC stage A".into(), "TACE for intermediate HCC".into()])
            .await
            .unwrap();
        assert_eq!(vectors.len(), 2);
        assert_eq!(vectors[0].len(), 384);
    }
}
