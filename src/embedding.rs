//! Embedding providers.
//!
//! Two hosted backends implement [`Embedder`]:
//! - **[`WorkersAiEmbedder`]** calls Cloudflare Workers AI
//!   (`POST {base}/accounts/{account}/ai/run/{model}`).
//! - **[`OpenAiEmbedder`]** calls `POST {base}/embeddings`.
//!
//! Every failure (transport, non-2xx, malformed body, wrong vector count or
//! dimension) is a retryable [`RagError::Embedding`]. Providers do not retry
//! on their own: the workflow step runner owns backoff.
//!
//! Use [`create_embedder`] to pick a backend from `[embedding]`.

use anyhow::{bail, Context};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;

use repo_rag_core::embedding::{check_embeddings, Embedder, EMBEDDING_DIMS};
use repo_rag_core::{RagError, Result};

use crate::config::ProviderConfig;
use crate::http;

pub const WORKERS_AI_BASE_URL: &str = "https://api.cloudflare.com/client/v4";
pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

pub const DEFAULT_WORKERS_AI_EMBEDDING_MODEL: &str = "@cf/baai/bge-large-en-v1.5";
pub const DEFAULT_OPENAI_EMBEDDING_MODEL: &str = "text-embedding-3-large";

// ============ Workers AI ============

pub struct WorkersAiEmbedder {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
}

#[derive(Deserialize)]
struct WorkersAiEmbeddingResponse {
    result: WorkersAiEmbeddingResult,
}

#[derive(Deserialize)]
struct WorkersAiEmbeddingResult {
    data: Vec<Vec<f32>>,
}

impl WorkersAiEmbedder {
    pub fn new(config: &ProviderConfig, api_key: String) -> anyhow::Result<Self> {
        let account_id = config
            .account_id
            .as_deref()
            .context("embedding.account_id required for workers-ai provider")?;
        let model = config
            .model
            .clone()
            .unwrap_or_else(|| DEFAULT_WORKERS_AI_EMBEDDING_MODEL.to_string());
        let base = config
            .base_url
            .as_deref()
            .unwrap_or(WORKERS_AI_BASE_URL)
            .trim_end_matches('/');

        Ok(Self {
            client: http::client(config.timeout_secs)?,
            endpoint: format!("{}/accounts/{}/ai/run/{}", base, account_id, model),
            model,
            api_key,
        })
    }
}

#[async_trait]
impl Embedder for WorkersAiEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({ "text": texts }))
            .send()
            .await
            .map_err(|e| RagError::Embedding(e.to_string()))?;

        if !response.status().is_success() {
            return Err(RagError::Embedding(format!(
                "Workers AI error {}",
                http::describe_failure(response).await
            )));
        }

        let body: WorkersAiEmbeddingResponse = response
            .json()
            .await
            .map_err(|e| RagError::Embedding(format!("invalid Workers AI response: {}", e)))?;

        check_embeddings(&body.result.data, texts.len(), self.dims())?;
        Ok(body.result.data)
    }
}

// ============ OpenAI ============

pub struct OpenAiEmbedder {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
}

#[derive(Deserialize)]
struct OpenAiEmbeddingResponse {
    data: Vec<OpenAiEmbeddingItem>,
}

#[derive(Deserialize)]
struct OpenAiEmbeddingItem {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

impl OpenAiEmbedder {
    pub fn new(config: &ProviderConfig, api_key: String) -> anyhow::Result<Self> {
        let base = config
            .base_url
            .as_deref()
            .unwrap_or(OPENAI_BASE_URL)
            .trim_end_matches('/');

        Ok(Self {
            client: http::client(config.timeout_secs)?,
            endpoint: format!("{}/embeddings", base),
            model: config
                .model
                .clone()
                .unwrap_or_else(|| DEFAULT_OPENAI_EMBEDDING_MODEL.to_string()),
            api_key,
        })
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({
                "model": self.model,
                "input": texts,
                "dimensions": EMBEDDING_DIMS,
            }))
            .send()
            .await
            .map_err(|e| RagError::Embedding(e.to_string()))?;

        if !response.status().is_success() {
            return Err(RagError::Embedding(format!(
                "OpenAI API error {}",
                http::describe_failure(response).await
            )));
        }

        let mut body: OpenAiEmbeddingResponse = response
            .json()
            .await
            .map_err(|e| RagError::Embedding(format!("invalid OpenAI response: {}", e)))?;

        // Sort by index to ensure order matches input
        body.data.sort_by_key(|item| item.index);
        let vectors: Vec<Vec<f32>> = body.data.into_iter().map(|item| item.embedding).collect();

        check_embeddings(&vectors, texts.len(), self.dims())?;
        Ok(vectors)
    }
}

/// Create the [`Embedder`] named by `config.provider`.
///
/// | Config Value | Provider |
/// |-------------|----------|
/// | `"workers-ai"` | [`WorkersAiEmbedder`] |
/// | `"openai"` | [`OpenAiEmbedder`] |
///
/// The API key is read from the environment variable named by
/// [`ProviderConfig::api_key_var`].
pub fn create_embedder(config: &ProviderConfig) -> anyhow::Result<Arc<dyn Embedder>> {
    let var = config.api_key_var();
    let api_key =
        std::env::var(var).with_context(|| format!("{} environment variable not set", var))?;

    match config.provider.as_str() {
        "workers-ai" => Ok(Arc::new(WorkersAiEmbedder::new(config, api_key)?)),
        "openai" => Ok(Arc::new(OpenAiEmbedder::new(config, api_key)?)),
        other => bail!("Unknown embedding provider: {}", other),
    }
}
