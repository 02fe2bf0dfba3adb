use graph_flow::GraphError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Required clinical or imaging input is absent. Raised before a run starts;
/// no partial run is attempted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid patient record: {0}")]
pub struct ValidationError(pub String);

/// The guideline index could not serve a query. Retrieval degrades to an
/// empty evidence set when this happens mid-run.
#[derive(Error, Debug)]
pub enum RetrievalError {
    #[error("embedding failed: {0}")]
    Embedding(String),

    #[error("vector store unavailable: {0}")]
    Store(String),

    #[error("guideline index is empty")]
    EmptyIndex,

    #[error("chunk {chunk_id} has {tokens} tokens, over the {limit} token embedding limit")]
    OversizedChunk {
        chunk_id: String,
        tokens: usize,
        limit: usize,
    },

    #[error("index cache error: {0}")]
    Cache(String),
}

/// Failure of the external text-generation service.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GenerationError {
    /// Rate limiting, timeouts, dropped connections. Worth retrying.
    #[error("transient generation failure: {0}")]
    Transient(String),

    /// Bad credentials or configuration. Retrying cannot help.
    #[error("fatal generation failure: {0}")]
    Fatal(String),
}

impl GenerationError {
    pub fn is_transient(&self) -> bool {
        matches!(self, GenerationError::Transient(_))
    }
}

/// Structured generation output did not match the expected shape.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("malformed {expected} output: {reason}")]
pub struct MalformedOutput {
    pub expected: &'static str,
    pub reason: String,
}

#[derive(Error, Debug)]
pub enum BoardError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Retrieval(#[from] RetrievalError),

    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error(transparent)]
    MalformedOutput(#[from] MalformedOutput),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("workflow error: {0}")]
    Workflow(#[from] GraphError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type BoardResult<T> = std::result::Result<T, BoardError>;
