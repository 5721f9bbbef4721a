//! Retrieval-augmented question answering over an ingested repository.
//!
//! ```text
//! find repo → authorize → embed question → search_similar → build context → generate
//! ```
//!
//! The pipeline is stateless and safe to share across concurrent requests.
//! An unknown repository fails before any gateway is called.

use std::sync::Arc;

use repo_rag_core::context::{build_context, SYSTEM_PROMPT};
use repo_rag_core::embedding::Embedder;
use repo_rag_core::gateway::{Authorizer, Generator};
use repo_rag_core::store::Store;
use repo_rag_core::{RagError, Result};

use crate::config::RetrievalConfig;
use crate::github::canonical_repo_url;

#[derive(Clone)]
pub struct AnswerPipeline {
    store: Arc<dyn Store>,
    embedder: Arc<dyn Embedder>,
    generator: Arc<dyn Generator>,
    authorizer: Arc<dyn Authorizer>,
    retrieval: RetrievalConfig,
}

impl AnswerPipeline {
    pub fn new(
        store: Arc<dyn Store>,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn Generator>,
        authorizer: Arc<dyn Authorizer>,
        retrieval: RetrievalConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            generator,
            authorizer,
            retrieval,
        }
    }

    /// Answer `question` about the repository at `url`.
    ///
    /// Returns the generated text verbatim.
    pub async fn ask(&self, url: &str, question: &str, token: Option<&str>) -> Result<String> {
        if question.trim().is_empty() {
            return Err(RagError::Validation("question must not be empty".into()));
        }

        // anything that is not a GitHub repository URL cannot be stored
        let url = canonical_repo_url(url)
            .ok_or_else(|| RagError::NotFound("repo not found in db".into()))?;
        let repo = self
            .store
            .find_repository_by_url(&url)
            .await?
            .ok_or_else(|| RagError::NotFound("repo not found in db".into()))?;

        self.authorizer.authorize(&url, token).await?;

        let query = self
            .embedder
            .embed(&[question.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| RagError::Embedding("empty embedding response".into()))?;

        let results = self
            .store
            .search_similar(
                &repo.id,
                &query,
                self.retrieval.min_similarity,
                self.retrieval.limit,
            )
            .await?;
        tracing::debug!(repo_id = %repo.id, hits = results.len(), "retrieved context");

        let context = build_context(&results);
        let context = (!context.is_empty()).then_some(context.as_str());

        self.generator
            .generate(SYSTEM_PROMPT, context, question)
            .await
    }
}
