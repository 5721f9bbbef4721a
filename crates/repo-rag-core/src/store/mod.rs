//! Storage abstraction for repo-rag.
//!
//! [`Store`] covers pool-level work: read-only lookups, similarity search,
//! and workflow instance records. Mutations of repositories and chunks go
//! through a [`StoreTx`] obtained from [`Store::begin`]; the handle is the
//! caller's transaction, the store itself keeps no transaction state.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{CodeChunk, InstanceStatus, Repository, WorkflowInstance};
use crate::search::SimilarChunk;

/// Abstract storage backend.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`begin`](Store::begin) | Open a write transaction |
/// | [`find_repository_by_url`](Store::find_repository_by_url) | Committed repository lookup |
/// | [`search_similar`](Store::search_similar) | Ranked chunk retrieval |
/// | [`save_instance`](Store::save_instance) | Insert or update a workflow instance |
/// | [`get_instance`](Store::get_instance) | Fetch a workflow instance |
/// | [`list_instances`](Store::list_instances) | Instances in the given states |
#[async_trait]
pub trait Store: Send + Sync {
    /// Open a transaction for repository and chunk mutations.
    async fn begin(&self) -> Result<Box<dyn StoreTx>>;

    /// Look up a committed repository by URL.
    async fn find_repository_by_url(&self, url: &str) -> Result<Option<Repository>>;

    /// Rank the repository's embedded chunks against `query`.
    ///
    /// Only chunks with an embedding are considered. Results have
    /// `similarity > min_similarity`, are ordered by similarity descending
    /// (ties in insertion order), and number at most `limit`.
    async fn search_similar(
        &self,
        repo_id: &str,
        query: &[f32],
        min_similarity: f64,
        limit: usize,
    ) -> Result<Vec<SimilarChunk>>;

    /// Insert or replace a workflow instance record (outside any transaction).
    async fn save_instance(&self, instance: &WorkflowInstance) -> Result<()>;

    async fn get_instance(&self, id: &str) -> Result<Option<WorkflowInstance>>;

    /// Instances whose status is one of `statuses`, oldest first.
    async fn list_instances(&self, statuses: &[InstanceStatus]) -> Result<Vec<WorkflowInstance>>;
}

/// A write transaction over repositories and chunks.
///
/// Nothing written through the handle is visible to [`Store`] reads until
/// [`commit`](StoreTx::commit). Dropping the handle without committing
/// discards every write.
#[async_trait]
pub trait StoreTx: Send {
    /// Look up a repository, including ones created in this transaction.
    async fn find_repository_by_url(&mut self, url: &str) -> Result<Option<Repository>>;

    /// Create a repository. Fails with `Conflict` if the URL exists.
    async fn create_repository(&mut self, url: &str) -> Result<Repository>;

    /// Insert a chunk with no embedding.
    async fn insert_code_chunk(&mut self, repo_id: &str, path: &str, text: &str) -> Result<CodeChunk>;

    /// Attach an embedding. Fails with `NotFound` for an unknown chunk id and
    /// with `Validation` for a vector of the wrong dimension.
    async fn set_embedding(&mut self, chunk_id: &str, vector: &[f32]) -> Result<()>;

    /// Number of chunks stored for `repo_id` as seen by this transaction.
    async fn count_chunks(&mut self, repo_id: &str) -> Result<u64>;

    /// Apply every staged write atomically and clear the staging area.
    ///
    /// A failed flush leaves the staged writes in place, so a transient
    /// failure can be retried. Flushing with nothing staged is a no-op.
    async fn flush(&mut self) -> Result<()>;

    /// Flush and close the transaction.
    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}
