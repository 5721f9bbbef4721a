//! Error taxonomy shared by the store, the gateways, and the workflow engine.
//!
//! Every error is classified at the point where it is raised. The workflow
//! engine consults [`RagError::is_retryable`] to decide between backing off
//! and terminating the instance.

/// Errors raised anywhere in the ingestion and retrieval pipeline.
#[derive(Debug, thiserror::Error)]
pub enum RagError {
    /// Bad input, surfaced to the caller immediately.
    #[error("validation error: {0}")]
    Validation(String),

    /// Duplicate resource (e.g. a repository URL that already exists).
    #[error("conflict: {0}")]
    Conflict(String),

    /// Unknown repository, chunk, or workflow instance.
    #[error("not found: {0}")]
    NotFound(String),

    /// The extraction service rejected the repository or could not be reached.
    #[error("extraction failed (status {status:?}): {payload}")]
    Extraction {
        /// Upstream HTTP status, when a response was received.
        status: Option<u16>,
        /// Upstream response body or transport error text.
        payload: String,
    },

    /// The caller may not read the underlying repository.
    #[error("authorization failed: {0}")]
    Authorization(String),

    /// Upstream embedding failure.
    #[error("embedding error: {0}")]
    Embedding(String),

    /// Upstream text-generation failure.
    #[error("generation error: {0}")]
    Generation(String),

    /// Transient datastore failure (busy database, dropped connection, ...).
    #[error("store error: {0}")]
    Store(String),

    /// Checkpoint (de)serialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A retryable step kept failing until the attempt budget ran out.
    #[error("step '{step}' failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        step: String,
        attempts: u32,
        #[source]
        source: Box<RagError>,
    },
}

impl RagError {
    /// Whether retrying the same step may succeed without external correction.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RagError::Embedding(_) | RagError::Generation(_) | RagError::Store(_)
        )
    }

    /// Short machine-readable code, used in logs and HTTP error mapping.
    pub fn code(&self) -> &'static str {
        match self {
            RagError::Validation(_) => "validation",
            RagError::Conflict(_) => "conflict",
            RagError::NotFound(_) => "not_found",
            RagError::Extraction { .. } => "extraction",
            RagError::Authorization(_) => "authorization",
            RagError::Embedding(_) => "embedding",
            RagError::Generation(_) => "generation",
            RagError::Store(_) => "store",
            RagError::Serialization(_) => "serialization",
            RagError::RetriesExhausted { .. } => "retries_exhausted",
        }
    }
}

/// Result alias using [`RagError`].
pub type Result<T> = std::result::Result<T, RagError>;
