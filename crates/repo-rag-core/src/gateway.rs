//! Capability traits for the external services the pipeline depends on.
//!
//! Each trait is injected into the workflow engine and the answer pipeline
//! as an `Arc<dyn ...>`, so tests substitute fakes freely. The embedding
//! capability lives in [`crate::embedding`].

use async_trait::async_trait;

use crate::error::Result;
use crate::models::ExtractedFile;

/// Converts a repository into `(path, cleaned text)` pairs.
///
/// Failures are [`RagError::Extraction`](crate::RagError::Extraction) and are
/// never retried: a malformed or inaccessible repository will not become
/// valid on its own.
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(
        &self,
        url: &str,
        path: &str,
        token: Option<&str>,
        skip_paths: &[String],
    ) -> Result<Vec<ExtractedFile>>;
}

/// Chat-style text generation.
///
/// `context` is appended to the system prompt when present and non-empty;
/// see [`crate::context::system_content`].
#[async_trait]
pub trait Generator: Send + Sync {
    fn model_name(&self) -> &str;

    async fn generate(
        &self,
        system_prompt: &str,
        context: Option<&str>,
        question: &str,
    ) -> Result<String>;
}

/// Verifies that a caller may read a repository.
#[async_trait]
pub trait Authorizer: Send + Sync {
    async fn authorize(&self, url: &str, token: Option<&str>) -> Result<()>;
}
