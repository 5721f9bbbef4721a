//! Core data models used throughout repo-rag.
//!
//! These types represent the repositories, code chunks, and workflow
//! instances that flow through the ingestion and retrieval pipeline.

use serde::{Deserialize, Serialize};

/// An ingested source repository, identified by its canonical URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    pub id: String,
    pub url: String,
    pub created_at: i64,
    pub updated_at: i64,
}

/// One extracted file of a repository.
///
/// `embedding` stays `None` between insertion and embedding generation;
/// such chunks are never returned by similarity search.
#[derive(Debug, Clone, PartialEq)]
pub struct CodeChunk {
    pub id: String,
    pub repo_id: String,
    pub path: String,
    pub text: String,
    pub embedding: Option<Vec<f32>>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A `(path, cleaned text)` pair produced by the extraction service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedFile {
    pub path: String,
    pub text: String,
}

/// Parameters of one ingestion submission.
///
/// The token is deliberately not persisted with the instance record; a
/// resumed instance falls back to the gateways' configured default token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestParams {
    pub url: String,
    #[serde(default = "default_path")]
    pub path: String,
    #[serde(skip)]
    pub token: Option<String>,
    #[serde(default)]
    pub skip_paths: Vec<String>,
}

fn default_path() -> String {
    "/".to_string()
}

impl IngestParams {
    /// Parameters for ingesting a whole repository from its root.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            path: default_path(),
            token: None,
            skip_paths: Vec::new(),
        }
    }
}

/// Lifecycle state of a workflow instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    Queued,
    Running,
    Complete,
    Errored,
}

impl InstanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceStatus::Queued => "queued",
            InstanceStatus::Running => "running",
            InstanceStatus::Complete => "complete",
            InstanceStatus::Errored => "errored",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(InstanceStatus::Queued),
            "running" => Some(InstanceStatus::Running),
            "complete" => Some(InstanceStatus::Complete),
            "errored" => Some(InstanceStatus::Errored),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, InstanceStatus::Complete | InstanceStatus::Errored)
    }
}

impl std::fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable record of one ingestion workflow execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowInstance {
    pub id: String,
    pub params: IngestParams,
    pub status: InstanceStatus,
    pub error: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl WorkflowInstance {
    /// A fresh `queued` instance with a random id.
    pub fn queued(params: IngestParams) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            params,
            status: InstanceStatus::Queued,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }
}
