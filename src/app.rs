//! Wiring from [`Config`] to the runtime components.

use anyhow::Result;
use std::sync::Arc;

use repo_rag_core::store::Store;

use crate::answer::AnswerPipeline;
use crate::config::Config;
use crate::embedding::create_embedder;
use crate::extract::HttpExtractor;
use crate::generation::create_generator;
use crate::github::GithubAuthorizer;
use crate::ingest::IngestDeps;
use crate::sqlite_store::SqliteStore;
use crate::step::RetryPolicy;
use crate::workflow::WorkflowEngine;
use crate::{db, migrate};

/// Open the database, applying migrations if needed.
pub async fn open_store(config: &Config) -> Result<Arc<dyn Store>> {
    let pool = db::connect(config).await?;
    migrate::apply(&pool).await?;
    Ok(Arc::new(SqliteStore::new(pool)))
}

pub fn build_engine(config: &Config, store: Arc<dyn Store>) -> Result<WorkflowEngine> {
    let deps = IngestDeps {
        store,
        extractor: Arc::new(HttpExtractor::new(
            &config.extraction,
            config.github.default_token(),
        )?),
        embedder: create_embedder(&config.embedding)?,
    };
    Ok(WorkflowEngine::new(
        deps,
        RetryPolicy::from_config(&config.workflow),
        config.workflow.concurrency,
    ))
}

pub fn build_answer_pipeline(config: &Config, store: Arc<dyn Store>) -> Result<AnswerPipeline> {
    Ok(AnswerPipeline::new(
        store,
        create_embedder(&config.embedding)?,
        create_generator(&config.generation)?,
        Arc::new(GithubAuthorizer::new(
            &config.github,
            config.github.default_token(),
        )?),
        config.retrieval.clone(),
    ))
}
