//! Guideline retrieval: corpus loading, chunking, embedding, vector storage
//! and the stage-aware evidence retriever built on top of them.

pub mod chunking;
pub mod corpus;
pub mod embedding;
pub mod index;
pub mod retriever;
pub mod store;

pub use chunking::{Chunker, GuidelineChunk};
pub use corpus::{ContentType, Corpus, GuidelinePage};
pub use embedding::{Embedder, FastEmbedder};
pub use index::GuidelineIndex;
pub use retriever::{EvidenceRetriever, RetrievalGroup};
pub use store::{InMemoryVectorStore, PgVectorStore, ScoredChunk, VectorStore};
