//! Vector stores. Both keep chunks keyed by corpus fingerprint so a rebuilt
//! corpus never mixes with an older one.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use tracing::info;

use super::chunking::GuidelineChunk;
use super::embedding::cosine_similarity;
use crate::error::RetrievalError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddedChunk {
    pub chunk: GuidelineChunk,
    pub embedding: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredChunk {
    pub chunk: GuidelineChunk,
    /// Cosine similarity to the query.
    pub score: f32,
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Whether chunks for this corpus are already stored (or cached).
    async fn has_corpus(&self, corpus_id: &str) -> Result<bool, RetrievalError>;

    /// Replace the stored chunks of `corpus_id`.
    async fn upsert(
        &self,
        corpus_id: &str,
        chunks: Vec<EmbeddedChunk>,
    ) -> Result<(), RetrievalError>;

    /// Nearest chunks of `corpus_id`, best first.
    async fn query_top_k(
        &self,
        corpus_id: &str,
        embedding: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredChunk>, RetrievalError>;

    async fn count(&self, corpus_id: &str) -> Result<usize, RetrievalError>;
}

#[derive(Serialize, Deserialize)]
struct CacheFile {
    corpus_id: String,
    chunks: Vec<EmbeddedChunk>,
}

/// Brute-force cosine store, optionally persisted as JSON under a cache
/// directory.
#[derive(Default)]
pub struct InMemoryVectorStore {
    corpora: RwLock<HashMap<String, Vec<EmbeddedChunk>>>,
    cache_dir: Option<PathBuf>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cache_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            corpora: RwLock::default(),
            cache_dir: Some(dir.into()),
        }
    }

    fn cache_path(&self, corpus_id: &str) -> Option<PathBuf> {
        self.cache_dir
            .as_ref()
            .map(|dir| dir.join(format!("guideline-index-{corpus_id}.json")))
    }

    async fn load_cache(&self, path: &Path) -> Result<Option<CacheFile>, RetrievalError> {
        let cache_err = |e: std::io::Error| RetrievalError::Cache(format!("{}: {e}", path.display()));
        if !tokio::fs::try_exists(path).await.map_err(cache_err)? {
            return Ok(None);
        }
        let raw = tokio::fs::read_to_string(path).await.map_err(cache_err)?;
        let file: CacheFile = serde_json::from_str(&raw)
            .map_err(|e| RetrievalError::Cache(format!("{}: {e}", path.display())))?;
        Ok(Some(file))
    }

    async fn write_cache(&self, path: &Path, file: &CacheFile) -> Result<(), RetrievalError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| RetrievalError::Cache(format!("{}: {e}", parent.display())))?;
        }
        let raw =
            serde_json::to_string(file).map_err(|e| RetrievalError::Cache(e.to_string()))?;
        tokio::fs::write(path, raw)
            .await
            .map_err(|e| RetrievalError::Cache(format!("{}: {e}", path.display())))
    }

    fn poisoned() -> RetrievalError {
        RetrievalError::Store("in-memory store lock poisoned".into())
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn has_corpus(&self, corpus_id: &str) -> Result<bool, RetrievalError> {
        if self
            .corpora
            .read()
            .map_err(|_| Self::poisoned())?
            .contains_key(corpus_id)
        {
            return Ok(true);
        }
        let Some(path) = self.cache_path(corpus_id) else {
            return Ok(false);
        };
        match self.load_cache(&path).await? {
            Some(file) if file.corpus_id == corpus_id => {
                info!(path = %path.display(), chunks = file.chunks.len(), "loaded cached index");
                self.corpora
                    .write()
                    .map_err(|_| Self::poisoned())?
                    .insert(file.corpus_id, file.chunks);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn upsert(
        &self,
        corpus_id: &str,
        chunks: Vec<EmbeddedChunk>,
    ) -> Result<(), RetrievalError> {
        if let Some(path) = self.cache_path(corpus_id) {
            let file = CacheFile {
                corpus_id: corpus_id.to_string(),
                chunks,
            };
            self.write_cache(&path, &file).await?;
            info!(path = %path.display(), "index cached");
            self.corpora
                .write()
                .map_err(|_| Self::poisoned())?
                .insert(file.corpus_id, file.chunks);
        } else {
            self.corpora
                .write()
                .map_err(|_| Self::poisoned())?
                .insert(corpus_id.to_string(), chunks);
        }
        Ok(())
    }

    async fn query_top_k(
        &self,
        corpus_id: &str,
        embedding: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredChunk>, RetrievalError> {
        let corpora = self.corpora.read().map_err(|_| Self::poisoned())?;
        let Some(entries) = corpora.get(corpus_id) else {
            return Ok(Vec::new());
        };
        let mut scored: Vec<ScoredChunk> = entries
            .iter()
            .map(|e| ScoredChunk {
                chunk: e.chunk.clone(),
                score: cosine_similarity(&e.embedding, embedding),
            })
            .collect();
        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(k);
        Ok(scored)
    }

    async fn count(&self, corpus_id: &str) -> Result<usize, RetrievalError> {
        Ok(self
            .corpora
            .read()
            .map_err(|_| Self::poisoned())?
            .get(corpus_id)
            .map_or(0, Vec::len))
    }
}

/// PostgreSQL + pgvector. Chunks are stored as JSONB next to their vector.
pub struct PgVectorStore {
    pool: sqlx::PgPool,
    table: String,
}

fn vector_literal(embedding: &[f32]) -> String {
    let values = embedding
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join(",");
    format!("ARRAY[{values}]::vector")
}

fn store_err(e: sqlx::Error) -> RetrievalError {
    RetrievalError::Store(e.to_string())
}

impl PgVectorStore {
    pub async fn connect(database_url: &str, table: &str) -> Result<Self, RetrievalError> {
        if table.is_empty() || !table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(RetrievalError::Store(format!("invalid table name {table:?}")));
        }
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .map_err(store_err)?;
        let store = Self {
            pool,
            table: table.to_string(),
        };
        store.ensure_schema().await?;
        Ok(store)
    }

    async fn ensure_schema(&self) -> Result<(), RetrievalError> {
        sqlx::query("CREATE EXTENSION IF NOT EXISTS vector")
            .execute(&self.pool)
            .await
            .map_err(store_err)?;
        let ddl = format!(
            "CREATE TABLE IF NOT EXISTS {} (\
                 corpus_id TEXT NOT NULL, \
                 id TEXT NOT NULL, \
                 chunk JSONB NOT NULL, \
                 embedding vector NOT NULL, \
                 PRIMARY KEY (corpus_id, id))",
            self.table
        );
        sqlx::query(&ddl)
            .execute(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(())
    }
}

#[async_trait]
impl VectorStore for PgVectorStore {
    async fn has_corpus(&self, corpus_id: &str) -> Result<bool, RetrievalError> {
        Ok(self.count(corpus_id).await? > 0)
    }

    async fn upsert(
        &self,
        corpus_id: &str,
        chunks: Vec<EmbeddedChunk>,
    ) -> Result<(), RetrievalError> {
        let mut tx = self.pool.begin().await.map_err(store_err)?;
        sqlx::query(&format!("DELETE FROM {} WHERE corpus_id = $1", self.table))
            .bind(corpus_id)
            .execute(&mut *tx)
            .await
            .map_err(store_err)?;
        for entry in &chunks {
            let sql = format!(
                "INSERT INTO {} (corpus_id, id, chunk, embedding) VALUES ($1, $2, $3, {})",
                self.table,
                vector_literal(&entry.embedding)
            );
            sqlx::query(&sql)
                .bind(corpus_id)
                .bind(&entry.chunk.id)
                .bind(Json(&entry.chunk))
                .execute(&mut *tx)
                .await
                .map_err(store_err)?;
        }
        tx.commit().await.map_err(store_err)?;
        info!(corpus_id, chunks = chunks.len(), table = %self.table, "chunks stored in pgvector");
        Ok(())
    }

    async fn query_top_k(
        &self,
        corpus_id: &str,
        embedding: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredChunk>, RetrievalError> {
        let vector = vector_literal(embedding);
        let sql = format!(
            "SELECT chunk, 1 - (embedding <=> {vector}) AS score \
             FROM {} WHERE corpus_id = $1 \
             ORDER BY embedding <=> {vector} \
             LIMIT $2",
            self.table
        );
        let rows = sqlx::query_as::<_, (Json<GuidelineChunk>, f64)>(&sql)
            .bind(corpus_id)
            .bind(k as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(rows
            .into_iter()
            .map(|(Json(chunk), score)| ScoredChunk {
                chunk,
                score: score as f32,
            })
            .collect())
    }

    async fn count(&self, corpus_id: &str) -> Result<usize, RetrievalError> {
        let (n,): (i64,) = sqlx::query_as(&format!(
            "SELECT COUNT(*) FROM {} WHERE corpus_id = $1",
            self.table
        ))
        .bind(corpus_id)
        .fetch_one(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(n as usize)
    }
}
