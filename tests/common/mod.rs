//! Test doubles shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

use repo_rag::ingest::IngestDeps;
use repo_rag::step::RetryPolicy;
use repo_rag::workflow::WorkflowEngine;
use repo_rag_core::embedding::{Embedder, EMBEDDING_DIMS};
use repo_rag_core::gateway::{Authorizer, Extractor, Generator};
use repo_rag_core::models::{
    CodeChunk, ExtractedFile, InstanceStatus, Repository, WorkflowInstance,
};
use repo_rag_core::search::SimilarChunk;
use repo_rag_core::store::memory::InMemoryStore;
use repo_rag_core::store::{Store, StoreTx};
use repo_rag_core::{RagError, Result};

pub const URL: &str = "https://github.com/acme/widgets";

/// A 1024-dimensional unit vector along axis `hot`.
pub fn unit(hot: usize) -> Vec<f32> {
    let mut v = vec![0.0; EMBEDDING_DIMS];
    v[hot % EMBEDDING_DIMS] = 1.0;
    v
}

pub fn files(pairs: &[(&str, &str)]) -> Vec<ExtractedFile> {
    pairs
        .iter()
        .map(|(path, text)| ExtractedFile {
            path: path.to_string(),
            text: text.to_string(),
        })
        .collect()
}

pub fn fast_policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        backoff_base: Duration::from_millis(1),
    }
}

// ─── Extractor ──────────────────────────────────────────────────────

pub struct FakeExtractor {
    result: std::result::Result<Vec<ExtractedFile>, (u16, String)>,
    gate: Option<Arc<Notify>>,
    pub calls: AtomicU32,
}

impl FakeExtractor {
    pub fn returning(files: Vec<ExtractedFile>) -> Self {
        Self {
            result: Ok(files),
            gate: None,
            calls: AtomicU32::new(0),
        }
    }

    pub fn failing(status: u16, payload: &str) -> Self {
        Self {
            result: Err((status, payload.to_string())),
            gate: None,
            calls: AtomicU32::new(0),
        }
    }

    /// Block every extraction until `gate` is notified.
    pub fn gated(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Extractor for FakeExtractor {
    async fn extract(
        &self,
        _url: &str,
        _path: &str,
        _token: Option<&str>,
        _skip_paths: &[String],
    ) -> Result<Vec<ExtractedFile>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        match &self.result {
            Ok(files) => Ok(files.clone()),
            Err((status, payload)) => Err(RagError::Extraction {
                status: Some(*status),
                payload: payload.clone(),
            }),
        }
    }
}

// ─── Embedder ───────────────────────────────────────────────────────

/// Embeds each text as a fixed vector: explicit entries from `vectors`,
/// otherwise a unit vector derived from the text length.
pub struct FakeEmbedder {
    vectors: HashMap<String, Vec<f32>>,
    /// Fail this many calls (retryably) before succeeding.
    transient_failures: AtomicU32,
    /// Texts whose embedding always fails (retryably).
    poisoned: Vec<String>,
    /// Return vectors of this length instead of the standard dimension.
    wrong_dims: Option<usize>,
    pub calls: AtomicU32,
}

impl FakeEmbedder {
    pub fn new() -> Self {
        Self {
            vectors: HashMap::new(),
            transient_failures: AtomicU32::new(0),
            poisoned: Vec::new(),
            wrong_dims: None,
            calls: AtomicU32::new(0),
        }
    }

    pub fn with_vector(mut self, text: &str, vector: Vec<f32>) -> Self {
        self.vectors.insert(text.to_string(), vector);
        self
    }

    pub fn failing_first(self, n: u32) -> Self {
        self.transient_failures.store(n, Ordering::SeqCst);
        self
    }

    pub fn poisoned(mut self, text: &str) -> Self {
        self.poisoned.push(text.to_string());
        self
    }

    pub fn with_wrong_dims(mut self, dims: usize) -> Self {
        self.wrong_dims = Some(dims);
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn vector_for(&self, text: &str) -> Vec<f32> {
        self.vectors
            .get(text)
            .cloned()
            .unwrap_or_else(|| unit(text.len()))
    }
}

#[async_trait]
impl Embedder for FakeEmbedder {
    fn model_name(&self) -> &str {
        "fake"
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let failed = self
            .transient_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(RagError::Embedding("rate limited".into()));
        }
        if texts.iter().any(|t| self.poisoned.contains(t)) {
            return Err(RagError::Embedding("upstream unavailable".into()));
        }
        if let Some(dims) = self.wrong_dims {
            return Ok(texts.iter().map(|_| vec![1.0; dims]).collect());
        }
        Ok(texts.iter().map(|t| self.vector_for(t)).collect())
    }
}

// ─── Generator ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct GenerateCall {
    pub system_prompt: String,
    pub context: Option<String>,
    pub question: String,
}

pub struct FakeGenerator {
    reply: std::result::Result<String, String>,
    pub calls: Mutex<Vec<GenerateCall>>,
}

impl FakeGenerator {
    pub fn replying(reply: &str) -> Self {
        Self {
            reply: Ok(reply.to_string()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            reply: Err(message.to_string()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn recorded(&self) -> Vec<GenerateCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Generator for FakeGenerator {
    fn model_name(&self) -> &str {
        "fake"
    }

    async fn generate(
        &self,
        system_prompt: &str,
        context: Option<&str>,
        question: &str,
    ) -> Result<String> {
        self.calls.lock().unwrap().push(GenerateCall {
            system_prompt: system_prompt.to_string(),
            context: context.map(str::to_string),
            question: question.to_string(),
        });
        self.reply
            .clone()
            .map_err(RagError::Generation)
    }
}

// ─── Authorizer ─────────────────────────────────────────────────────

pub struct FakeAuthorizer {
    allow: bool,
    pub calls: AtomicU32,
}

impl FakeAuthorizer {
    pub fn allowing() -> Self {
        Self {
            allow: true,
            calls: AtomicU32::new(0),
        }
    }

    pub fn denying() -> Self {
        Self {
            allow: false,
            calls: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Authorizer for FakeAuthorizer {
    async fn authorize(&self, url: &str, _token: Option<&str>) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.allow {
            Ok(())
        } else {
            Err(RagError::Authorization(format!("no access to {}", url)))
        }
    }
}

// ─── Store ──────────────────────────────────────────────────────────

/// An in-memory store whose first `n` flushes fail as a locked database.
#[derive(Clone)]
pub struct LockedOnFlushStore {
    pub inner: InMemoryStore,
    failures: Arc<AtomicU32>,
}

impl LockedOnFlushStore {
    pub fn new(inner: InMemoryStore, failures: u32) -> Self {
        Self {
            inner,
            failures: Arc::new(AtomicU32::new(failures)),
        }
    }
}

#[async_trait]
impl Store for LockedOnFlushStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>> {
        Ok(Box::new(LockedOnFlushTx {
            inner: self.inner.begin().await?,
            failures: self.failures.clone(),
        }))
    }

    async fn find_repository_by_url(&self, url: &str) -> Result<Option<Repository>> {
        self.inner.find_repository_by_url(url).await
    }

    async fn search_similar(
        &self,
        repo_id: &str,
        query: &[f32],
        min_similarity: f64,
        limit: usize,
    ) -> Result<Vec<SimilarChunk>> {
        self.inner
            .search_similar(repo_id, query, min_similarity, limit)
            .await
    }

    async fn save_instance(&self, instance: &WorkflowInstance) -> Result<()> {
        self.inner.save_instance(instance).await
    }

    async fn get_instance(&self, id: &str) -> Result<Option<WorkflowInstance>> {
        self.inner.get_instance(id).await
    }

    async fn list_instances(&self, statuses: &[InstanceStatus]) -> Result<Vec<WorkflowInstance>> {
        self.inner.list_instances(statuses).await
    }
}

struct LockedOnFlushTx {
    inner: Box<dyn StoreTx>,
    failures: Arc<AtomicU32>,
}

#[async_trait]
impl StoreTx for LockedOnFlushTx {
    async fn find_repository_by_url(&mut self, url: &str) -> Result<Option<Repository>> {
        self.inner.find_repository_by_url(url).await
    }

    async fn create_repository(&mut self, url: &str) -> Result<Repository> {
        self.inner.create_repository(url).await
    }

    async fn insert_code_chunk(&mut self, repo_id: &str, path: &str, text: &str) -> Result<CodeChunk> {
        self.inner.insert_code_chunk(repo_id, path, text).await
    }

    async fn set_embedding(&mut self, chunk_id: &str, vector: &[f32]) -> Result<()> {
        self.inner.set_embedding(chunk_id, vector).await
    }

    async fn count_chunks(&mut self, repo_id: &str) -> Result<u64> {
        self.inner.count_chunks(repo_id).await
    }

    async fn flush(&mut self) -> Result<()> {
        let locked = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if locked {
            return Err(RagError::Store("database is locked".into()));
        }
        self.inner.flush().await
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let mut this = self;
        this.flush().await
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.inner.rollback().await
    }
}

// ─── Engine helpers ─────────────────────────────────────────────────

pub fn engine(
    store: Arc<dyn Store>,
    extractor: Arc<FakeExtractor>,
    embedder: Arc<FakeEmbedder>,
    max_attempts: u32,
) -> WorkflowEngine {
    WorkflowEngine::new(
        IngestDeps {
            store,
            extractor,
            embedder,
        },
        fast_policy(max_attempts),
        4,
    )
}

/// Poll until the instance reaches a terminal status.
pub async fn wait_terminal(engine: &WorkflowEngine, id: &str) -> WorkflowInstance {
    for _ in 0..500 {
        let instance = engine.status(id).await.unwrap();
        if instance.status.is_terminal() {
            return instance;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("workflow {} did not finish", id);
}
