//! SQLite-backed [`Store`] implementation.
//!
//! Repositories live in `repos`, chunks in `repo_code` (embedding as a
//! little-endian `f32` BLOB), and workflow instances in `workflow_instances`.
//! Similarity is computed in Rust: candidate rows are read in `rowid` order
//! and handed to [`rank_similar`], which keeps the ordering identical to the
//! in-memory backend.
//!
//! Transactions ([`SqliteTx`]) stage their writes and flush them in one
//! short SQLite transaction on commit.

use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use repo_rag_core::embedding::{blob_to_vec, vec_to_blob, EMBEDDING_DIMS};
use repo_rag_core::models::{
    CodeChunk, IngestParams, InstanceStatus, Repository, WorkflowInstance,
};
use repo_rag_core::search::{rank_similar, EmbeddedChunk, SimilarChunk};
use repo_rag_core::store::{Store, StoreTx};
use repo_rag_core::{RagError, Result};

/// Classify a sqlx error: unique violations are conflicts, the rest are
/// transient store failures.
pub fn map_sqlx_error(err: sqlx::Error) -> RagError {
    if let sqlx::Error::Database(db) = &err {
        if db.is_unique_violation() {
            return RagError::Conflict(db.message().to_string());
        }
    }
    RagError::Store(err.to_string())
}

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    dims: usize,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            dims: EMBEDDING_DIMS,
        }
    }

    /// Accept embeddings of `dims` length instead of the default.
    pub fn with_dims(pool: SqlitePool, dims: usize) -> Self {
        Self { pool, dims }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn repository_from_row(row: &SqliteRow) -> Repository {
    Repository {
        id: row.get("id"),
        url: row.get("url"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn instance_from_row(row: &SqliteRow) -> Result<WorkflowInstance> {
    let params_json: String = row.get("params_json");
    let params: IngestParams = serde_json::from_str(&params_json)?;
    let status: String = row.get("status");
    let status = InstanceStatus::parse(&status)
        .ok_or_else(|| RagError::Store(format!("unknown instance status '{}'", status)))?;

    Ok(WorkflowInstance {
        id: row.get("id"),
        params,
        status,
        error: row.get("error"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

#[async_trait]
impl Store for SqliteStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>> {
        Ok(Box::new(SqliteTx::new(self.pool.clone(), self.dims)))
    }

    async fn find_repository_by_url(&self, url: &str) -> Result<Option<Repository>> {
        let row = sqlx::query("SELECT id, url, created_at, updated_at FROM repos WHERE url = ?")
            .bind(url)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        Ok(row.as_ref().map(repository_from_row))
    }

    async fn search_similar(
        &self,
        repo_id: &str,
        query: &[f32],
        min_similarity: f64,
        limit: usize,
    ) -> Result<Vec<SimilarChunk>> {
        let rows = sqlx::query(
            r#"
            SELECT path, cleaned_text, embedding
            FROM repo_code
            WHERE repo_id = ? AND embedding IS NOT NULL
            ORDER BY rowid
            "#,
        )
        .bind(repo_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        let decoded: Vec<(String, String, Vec<f32>)> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                (row.get("path"), row.get("cleaned_text"), blob_to_vec(&blob))
            })
            .collect();

        Ok(rank_similar(
            decoded.iter().map(|(path, text, embedding)| EmbeddedChunk {
                path,
                text,
                embedding,
            }),
            query,
            min_similarity,
            limit,
        ))
    }

    async fn save_instance(&self, instance: &WorkflowInstance) -> Result<()> {
        let params_json = serde_json::to_string(&instance.params)?;

        sqlx::query(
            r#"
            INSERT INTO workflow_instances (id, params_json, status, error, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                error = excluded.error,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&instance.id)
        .bind(&params_json)
        .bind(instance.status.as_str())
        .bind(&instance.error)
        .bind(instance.created_at)
        .bind(instance.updated_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }

    async fn get_instance(&self, id: &str) -> Result<Option<WorkflowInstance>> {
        let row = sqlx::query(
            "SELECT id, params_json, status, error, created_at, updated_at FROM workflow_instances WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        row.as_ref().map(instance_from_row).transpose()
    }

    async fn list_instances(&self, statuses: &[InstanceStatus]) -> Result<Vec<WorkflowInstance>> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; statuses.len()].join(", ");
        let sql = format!(
            "SELECT id, params_json, status, error, created_at, updated_at \
             FROM workflow_instances WHERE status IN ({}) ORDER BY created_at, rowid",
            placeholders
        );

        let mut query = sqlx::query(&sql);
        for status in statuses {
            query = query.bind(status.as_str());
        }

        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        rows.iter().map(instance_from_row).collect()
    }
}

/// A staged write transaction.
///
/// Writes are buffered in memory and applied in a single SQLite
/// transaction on [`flush`](StoreTx::flush), so a long ingestion holds the
/// database writer lock only while its rows are flushed. The `repos.url`
/// unique constraint still arbitrates between concurrent commits.
/// Dropping an uncommitted `SqliteTx` discards the staged writes.
pub struct SqliteTx {
    pool: SqlitePool,
    dims: usize,
    new_repos: Vec<Repository>,
    /// Insertion order becomes `rowid` order on commit.
    new_chunks: Vec<CodeChunk>,
    /// Embeddings for chunks committed by an earlier transaction.
    updates: Vec<(String, Vec<f32>)>,
}

impl SqliteTx {
    fn new(pool: SqlitePool, dims: usize) -> Self {
        Self {
            pool,
            dims,
            new_repos: Vec::new(),
            new_chunks: Vec::new(),
            updates: Vec::new(),
        }
    }
}

#[async_trait]
impl StoreTx for SqliteTx {
    async fn find_repository_by_url(&mut self, url: &str) -> Result<Option<Repository>> {
        if let Some(repo) = self.new_repos.iter().find(|r| r.url == url) {
            return Ok(Some(repo.clone()));
        }

        let row = sqlx::query("SELECT id, url, created_at, updated_at FROM repos WHERE url = ?")
            .bind(url)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        Ok(row.as_ref().map(repository_from_row))
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
        let staged = self.new_repos.iter().any(|r| r.id == repo_id);
        if !staged {
            let exists: bool = sqlx::query_scalar("SELECT COUNT(*) > 0 FROM repos WHERE id = ?")
                .bind(repo_id)
                .fetch_one(&self.pool)
                .await
                .map_err(map_sqlx_error)?;
            if !exists {
                return Err(RagError::NotFound(format!("repository {}", repo_id)));
            }
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

        let exists: bool = sqlx::query_scalar("SELECT COUNT(*) > 0 FROM repo_code WHERE id = ?")
            .bind(chunk_id)
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        if !exists {
            return Err(RagError::NotFound(format!("code chunk {}", chunk_id)));
        }

        self.updates.push((chunk_id.to_string(), vector.to_vec()));
        Ok(())
    }

    async fn count_chunks(&mut self, repo_id: &str) -> Result<u64> {
        let committed: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM repo_code WHERE repo_id = ?")
            .bind(repo_id)
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        let staged = self.new_chunks.iter().filter(|c| c.repo_id == repo_id).count();

        Ok(committed as u64 + staged as u64)
    }

    async fn flush(&mut self) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        for repo in &self.new_repos {
            sqlx::query("INSERT INTO repos (id, url, created_at, updated_at) VALUES (?, ?, ?, ?)")
                .bind(&repo.id)
                .bind(&repo.url)
                .bind(repo.created_at)
                .bind(repo.updated_at)
                .execute(&mut *tx)
                .await
                .map_err(|e| match map_sqlx_error(e) {
                    RagError::Conflict(_) => {
                        RagError::Conflict(format!("repository already exists: {}", repo.url))
                    }
                    other => other,
                })?;
        }

        for chunk in &self.new_chunks {
            sqlx::query(
                r#"
                INSERT INTO repo_code (id, repo_id, path, cleaned_text, embedding, created_at, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&chunk.id)
            .bind(&chunk.repo_id)
            .bind(&chunk.path)
            .bind(&chunk.text)
            .bind(chunk.embedding.as_deref().map(vec_to_blob))
            .bind(chunk.created_at)
            .bind(chunk.updated_at)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
        }

        let now = chrono::Utc::now().timestamp();
        for (chunk_id, vector) in &self.updates {
            sqlx::query("UPDATE repo_code SET embedding = ?, updated_at = ? WHERE id = ?")
                .bind(vec_to_blob(vector))
                .bind(now)
                .bind(chunk_id)
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx_error)?;
        }

        tx.commit().await.map_err(map_sqlx_error)?;

        self.new_repos.clear();
        self.new_chunks.clear();
        self.updates.clear();
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
