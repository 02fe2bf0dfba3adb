use std::sync::Arc;

use tracing::info;

use super::chunking::{Chunker, GuidelineChunk};
use super::corpus::Corpus;
use super::embedding::Embedder;
use super::store::{EmbeddedChunk, ScoredChunk, VectorStore};
use crate::config::ChunkingConfig;
use crate::error::RetrievalError;
use crate::generation::TextGenerator;

/// A chunked, embedded guideline corpus behind a [`VectorStore`].
///
/// Building is idempotent: a corpus whose fingerprint is already present in
/// the store (or its cache) is reused without re-chunking or re-embedding.
#[derive(Clone)]
pub struct GuidelineIndex {
    corpus_id: String,
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
}

impl GuidelineIndex {
    /// Attach to an index that was built earlier for `corpus_id`.
    pub fn attach(
        corpus_id: impl Into<String>,
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
    ) -> Self {
        Self {
            corpus_id: corpus_id.into(),
            store,
            embedder,
        }
    }

    pub async fn build_or_load(
        corpus: &Corpus,
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
        chunking: &ChunkingConfig,
        summarizer: Option<&dyn TextGenerator>,
        force_rebuild: bool,
    ) -> Result<Self, RetrievalError> {
        let index = Self::attach(corpus.fingerprint.clone(), store, embedder);

        if !force_rebuild && index.store.has_corpus(&index.corpus_id).await? {
            info!(corpus_id = %index.corpus_id, "reusing existing guideline index");
            return Ok(index);
        }
        if corpus.is_empty() {
            return Err(RetrievalError::EmptyIndex);
        }

        info!(pages = corpus.pages.len(), "building guideline index");
        let chunks = Chunker::new(chunking, summarizer).chunk(corpus).await?;
        index.upsert(chunks).await?;
        Ok(index)
    }

    /// Embed and store `chunks`, replacing anything stored for this corpus.
    pub async fn upsert(&self, chunks: Vec<GuidelineChunk>) -> Result<(), RetrievalError> {
        if chunks.is_empty() {
            return Err(RetrievalError::EmptyIndex);
        }
        let texts = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = self.embedder.embed(texts).await?;
        if vectors.len() != chunks.len() {
            return Err(RetrievalError::Embedding(format!(
                "expected {} vectors, got {}",
                chunks.len(),
                vectors.len()
            )));
        }
        let entries = chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, embedding)| EmbeddedChunk { chunk, embedding })
            .collect::<Vec<_>>();
        info!(chunks = entries.len(), corpus_id = %self.corpus_id, "embedded guideline chunks");
        self.store.upsert(&self.corpus_id, entries).await
    }

    pub async fn query_top_k(
        &self,
        text: &str,
        k: usize,
    ) -> Result<Vec<ScoredChunk>, RetrievalError> {
        let embedding = self.embedder.embed_one(text).await?;
        self.store.query_top_k(&self.corpus_id, &embedding, k).await
    }

    pub async fn len(&self) -> Result<usize, RetrievalError> {
        self.store.count(&self.corpus_id).await
    }

    pub fn corpus_id(&self) -> &str {
        &self.corpus_id
    }
}
