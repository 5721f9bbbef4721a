//! Ingestion steps for one workflow run.
//!
//! A run opens a single store transaction and walks the phases in order:
//!
//! ```text
//! check-repo-exists → [create-repo] → extract → persist-chunk:* → embed-chunk:* → commit
//! ```
//!
//! `commit` is a step like the others: a transient store failure while
//! flushing the staged writes is retried without redoing earlier phases.
//!
//! Every phase goes through the run's [`StepRunner`], so retryable failures
//! back off and completed steps are never repeated. Embedding sub-steps fan
//! out with bounded concurrency; writes on the shared transaction are
//! serialized through an async mutex. Any terminal failure rolls the
//! transaction back, leaving no repository or chunk rows behind.

use futures::stream::{self, TryStreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;

use repo_rag_core::embedding::Embedder;
use repo_rag_core::gateway::Extractor;
use repo_rag_core::models::{ExtractedFile, IngestParams};
use repo_rag_core::store::{Store, StoreTx};
use repo_rag_core::{RagError, Result};

use crate::step::StepRunner;

/// The collaborators an ingestion run needs.
#[derive(Clone)]
pub struct IngestDeps {
    pub store: Arc<dyn Store>,
    pub extractor: Arc<dyn Extractor>,
    pub embedder: Arc<dyn Embedder>,
}

/// Outcome of a committed run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestReport {
    pub repo_id: String,
    /// Whether this run created the repository row.
    pub created_repo: bool,
    pub chunks: u64,
}

/// A chunk inserted by `persist-chunk:*`, as recorded in the step journal.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PersistedChunk {
    id: String,
    path: String,
    text: String,
}

type SharedTx = Mutex<Box<dyn StoreTx>>;

/// Execute every ingestion phase for `params` inside one transaction.
///
/// Commits only when all phases succeed; otherwise rolls back and returns
/// the error that terminated the run.
pub async fn run_ingest(
    deps: &IngestDeps,
    runner: &StepRunner,
    params: &IngestParams,
    concurrency: usize,
) -> Result<IngestReport> {
    let tx: SharedTx = Mutex::new(deps.store.begin().await?);

    let shared = &tx;
    let outcome = match run_phases(deps, runner, params, concurrency, shared).await {
        // a transient flush failure retries only the flush
        Ok(report) => runner
            .run("commit", move || async move { shared.lock().await.flush().await })
            .await
            .map(|()| report),
        Err(e) => Err(e),
    };
    let tx = tx.into_inner();

    match outcome {
        Ok(report) => {
            tx.commit().await?;
            tracing::info!(
                instance = runner.instance_id(),
                repo_id = %report.repo_id,
                chunks = report.chunks,
                "ingestion committed"
            );
            Ok(report)
        }
        Err(e) => {
            if let Err(rollback_err) = tx.rollback().await {
                tracing::error!(
                    instance = runner.instance_id(),
                    error = %rollback_err,
                    "rollback failed"
                );
            }
            Err(e)
        }
    }
}

async fn run_phases(
    deps: &IngestDeps,
    runner: &StepRunner,
    params: &IngestParams,
    concurrency: usize,
    tx: &SharedTx,
) -> Result<IngestReport> {
    let url = params.url.as_str();

    let existing: Option<String> = runner
        .run("check-repo-exists", move || async move {
            let repo = tx.lock().await.find_repository_by_url(url).await?;
            Ok(repo.map(|r| r.id))
        })
        .await?;

    let created_repo = existing.is_none();
    let repo_id = match existing {
        Some(id) => {
            tracing::info!(instance = runner.instance_id(), repo_id = %id, "repository exists, reusing");
            id
        }
        None => {
            runner
                .run("create-repo", move || async move {
                    let repo = tx.lock().await.create_repository(url).await?;
                    Ok(repo.id)
                })
                .await?
        }
    };

    let extractor = deps.extractor.as_ref();
    let files: Vec<ExtractedFile> = runner
        .run("extract", move || async move {
            extractor
                .extract(url, &params.path, params.token.as_deref(), &params.skip_paths)
                .await
        })
        .await?;
    tracing::info!(instance = runner.instance_id(), files = files.len(), "extraction complete");

    let repo_id_ref = repo_id.as_str();
    let mut chunks = Vec::with_capacity(files.len());
    for (index, file) in files.iter().enumerate() {
        let step = format!("persist-chunk:{}", index);
        let chunk: PersistedChunk = runner
            .run(&step, move || async move {
                let chunk = tx
                    .lock()
                    .await
                    .insert_code_chunk(repo_id_ref, &file.path, &file.text)
                    .await?;
                Ok(PersistedChunk {
                    id: chunk.id,
                    path: chunk.path,
                    text: chunk.text,
                })
            })
            .await?;
        chunks.push(chunk);
    }

    embed_chunks(deps.embedder.as_ref(), runner, &chunks, concurrency, tx).await?;

    let count = tx.lock().await.count_chunks(&repo_id).await?;

    Ok(IngestReport {
        repo_id,
        created_repo,
        chunks: count,
    })
}

/// Embed every chunk as its own retryable sub-step.
///
/// At most `concurrency` sub-steps are in flight. The first sub-step that
/// fails terminally drops the rest and fails the phase.
async fn embed_chunks(
    embedder: &dyn Embedder,
    runner: &StepRunner,
    chunks: &[PersistedChunk],
    concurrency: usize,
    tx: &SharedTx,
) -> Result<()> {
    stream::iter(chunks.iter().map(Ok::<_, RagError>))
        .try_for_each_concurrent(concurrency.max(1), move |chunk| async move {
            let step = format!("embed-chunk:{}", chunk.id);
            runner
                .run(&step, move || async move {
                    // the path is embedded alongside the text; only the first vector is stored
                    let input = [chunk.path.clone(), chunk.text.clone()];
                    let vectors = embedder.embed(&input).await?;
                    let vector = vectors.into_iter().next().ok_or_else(|| {
                        RagError::Embedding("embedding response contained no vectors".into())
                    })?;
                    tx.lock().await.set_embedding(&chunk.id, &vector).await
                })
                .await
        })
        .await?;

    tracing::info!(instance = runner.instance_id(), chunks = chunks.len(), "embeddings stored");
    Ok(())
}
