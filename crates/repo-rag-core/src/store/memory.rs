//! In-memory [`Store`] implementation for tests and embedded use.
//!
//! Committed state lives behind a `std::sync::RwLock`. A transaction stages
//! its writes privately and applies them in one step on commit, so readers
//! never observe a half-finished ingestion.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use crate::embedding::EMBEDDING_DIMS;
use crate::error::{RagError, Result};
use crate::models::{CodeChunk, InstanceStatus, Repository, WorkflowInstance};
use crate::search::{rank_similar, EmbeddedChunk, SimilarChunk};

use super::{Store, StoreTx};

#[derive(Default)]
struct MemoryState {
    repos: Vec<Repository>,
    /// Insertion order is the similarity tie-breaker.
    chunks: Vec<CodeChunk>,
    instances: HashMap<String, WorkflowInstance>,
}

/// In-memory store.
#[derive(Clone)]
pub struct InMemoryStore {
    state: Arc<RwLock<MemoryState>>,
    dims: usize,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::with_dims(EMBEDDING_DIMS)
    }

    /// A store accepting embeddings of `dims` dimensions.
    pub fn with_dims(dims: usize) -> Self {
        Self {
            state: Arc::new(RwLock::new(MemoryState::default())),
            dims,
        }
    }

    /// All committed repositories, in creation order.
    pub fn repositories(&self) -> Result<Vec<Repository>> {
        Ok(read(&self.state)?.repos.clone())
    }

    /// All committed chunks of a repository, in insertion order.
    pub fn chunks_for(&self, repo_id: &str) -> Result<Vec<CodeChunk>> {
        Ok(read(&self.state)?
            .chunks
            .iter()
            .filter(|c| c.repo_id == repo_id)
            .cloned()
            .collect())
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn read(state: &RwLock<MemoryState>) -> Result<RwLockReadGuard<'_, MemoryState>> {
    state
        .read()
        .map_err(|_| RagError::Store("memory store lock poisoned".to_string()))
}

fn write(state: &RwLock<MemoryState>) -> Result<RwLockWriteGuard<'_, MemoryState>> {
    state
        .write()
        .map_err(|_| RagError::Store("memory store lock poisoned".to_string()))
}

#[async_trait]
impl Store for InMemoryStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>> {
        Ok(Box::new(InMemoryTx {
            state: self.state.clone(),
            dims: self.dims,
            new_repos: Vec::new(),
            new_chunks: Vec::new(),
            embeddings: HashMap::new(),
        }))
    }

    async fn find_repository_by_url(&self, url: &str) -> Result<Option<Repository>> {
        Ok(read(&self.state)?.repos.iter().find(|r| r.url == url).cloned())
    }

    async fn search_similar(
        &self,
        repo_id: &str,
        query: &[f32],
        min_similarity: f64,
        limit: usize,
    ) -> Result<Vec<SimilarChunk>> {
        let state = read(&self.state)?;
        let candidates = state.chunks.iter().filter(|c| c.repo_id == repo_id).filter_map(|c| {
            c.embedding.as_deref().map(|embedding| EmbeddedChunk {
                path: &c.path,
                text: &c.text,
                embedding,
            })
        });
        Ok(rank_similar(candidates, query, min_similarity, limit))
    }

    async fn save_instance(&self, instance: &WorkflowInstance) -> Result<()> {
        write(&self.state)?
            .instances
            .insert(instance.id.clone(), instance.clone());
        Ok(())
    }

    async fn get_instance(&self, id: &str) -> Result<Option<WorkflowInstance>> {
        Ok(read(&self.state)?.instances.get(id).cloned())
    }

    async fn list_instances(&self, statuses: &[InstanceStatus]) -> Result<Vec<WorkflowInstance>> {
        let state = read(&self.state)?;
        let mut found: Vec<WorkflowInstance> = state
            .instances
            .values()
            .filter(|i| statuses.contains(&i.status))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(found)
    }
}

/// Staged writes of one in-memory transaction.
pub struct InMemoryTx {
    state: Arc<RwLock<MemoryState>>,
    dims: usize,
    new_repos: Vec<Repository>,
    new_chunks: Vec<CodeChunk>,
    /// Embeddings for chunks committed by an earlier transaction.
    embeddings: HashMap<String, Vec<f32>>,
}

#[async_trait]
impl StoreTx for InMemoryTx {
    async fn find_repository_by_url(&mut self, url: &str) -> Result<Option<Repository>> {
        if let Some(repo) = self.new_repos.iter().find(|r| r.url == url) {
            return Ok(Some(repo.clone()));
        }
        Ok(read(&self.state)?.repos.iter().find(|r| r.url == url).cloned())
    }

    async fn create_repository(&mut self, url: &str) -> Result<Repository> {
        if self.find_repository_by_url(url).await?.is_some() {
            return Err(RagError::Conflict(format!("repository already exists: {}", url)));
        }
        let now = chrono::Utc::now().timestamp();
        let repo = Repository {
            id: uuid::Uuid::new_v4().to_string(),
            url: url.to_string(),
            created_at: now,
            updated_at: now,
        };
        self.new_repos.push(repo.clone());
        Ok(repo)
    }

    async fn insert_code_chunk(&mut self, repo_id: &str, path: &str, text: &str) -> Result<CodeChunk> {
        let repo_known = self.new_repos.iter().any(|r| r.id == repo_id)
            || read(&self.state)?.repos.iter().any(|r| r.id == repo_id);
        if !repo_known {
            return Err(RagError::NotFound(format!("repository {}", repo_id)));
        }
        let now = chrono::Utc::now().timestamp();
        let chunk = CodeChunk {
            id: uuid::Uuid::new_v4().to_string(),
            repo_id: repo_id.to_string(),
            path: path.to_string(),
            text: text.to_string(),
            embedding: None,
            created_at: now,
            updated_at: now,
        };
        self.new_chunks.push(chunk.clone());
        Ok(chunk)
    }

    async fn set_embedding(&mut self, chunk_id: &str, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dims {
            return Err(RagError::Validation(format!(
                "embedding has {} dimensions, expected {}",
                vector.len(),
                self.dims
            )));
        }
        if let Some(chunk) = self.new_chunks.iter_mut().find(|c| c.id == chunk_id) {
            chunk.embedding = Some(vector.to_vec());
            chunk.updated_at = chrono::Utc::now().timestamp();
            return Ok(());
        }
        if read(&self.state)?.chunks.iter().any(|c| c.id == chunk_id) {
            self.embeddings.insert(chunk_id.to_string(), vector.to_vec());
            return Ok(());
        }
        Err(RagError::NotFound(format!("code chunk {}", chunk_id)))
    }

    async fn count_chunks(&mut self, repo_id: &str) -> Result<u64> {
        let committed = read(&self.state)?
            .chunks
            .iter()
            .filter(|c| c.repo_id == repo_id)
            .count();
        let staged = self.new_chunks.iter().filter(|c| c.repo_id == repo_id).count();
        Ok((committed + staged) as u64)
    }

    async fn flush(&mut self) -> Result<()> {
        let mut state = write(&self.state)?;

        // unique-URL constraint, checked again against concurrent commits
        for repo in &self.new_repos {
            if state.repos.iter().any(|r| r.url == repo.url) {
                return Err(RagError::Conflict(format!(
                    "repository already exists: {}",
                    repo.url
                )));
            }
        }

        let now = chrono::Utc::now().timestamp();
        let embeddings = std::mem::take(&mut self.embeddings);
        for chunk in state.chunks.iter_mut() {
            if let Some(vector) = embeddings.get(&chunk.id) {
                chunk.embedding = Some(vector.clone());
                chunk.updated_at = now;
            }
        }
        state.repos.append(&mut self.new_repos);
        state.chunks.append(&mut self.new_chunks);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let mut this = self;
        this.flush().await
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}
