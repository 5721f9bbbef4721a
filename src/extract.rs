//! HTTP client for the repository extraction service.
//!
//! The service receives `{url, path, token, skipPaths}` and answers with
//! `{"data": [[path, text], ...]}`. Anything else (transport failure, non-2xx
//! status, malformed body) becomes a non-retryable
//! [`RagError::Extraction`] carrying whatever status and payload were seen.

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use repo_rag_core::gateway::Extractor;
use repo_rag_core::models::ExtractedFile;
use repo_rag_core::{RagError, Result};

use crate::config::ExtractionConfig;
use crate::http;

pub struct HttpExtractor {
    client: reqwest::Client,
    endpoint: String,
    default_token: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ExtractRequest<'a> {
    url: &'a str,
    path: &'a str,
    token: Option<&'a str>,
    skip_paths: &'a [String],
}

#[derive(Deserialize)]
struct ExtractResponse {
    data: Vec<(String, String)>,
}

impl HttpExtractor {
    /// `default_token` is sent when a request carries no token of its own.
    pub fn new(config: &ExtractionConfig, default_token: Option<String>) -> anyhow::Result<Self> {
        let endpoint = config
            .url
            .clone()
            .context("extraction.url must be set to ingest repositories")?;

        Ok(Self {
            client: http::client(config.timeout_secs)?,
            endpoint,
            default_token,
        })
    }
}

#[async_trait]
impl Extractor for HttpExtractor {
    async fn extract(
        &self,
        url: &str,
        path: &str,
        token: Option<&str>,
        skip_paths: &[String],
    ) -> Result<Vec<ExtractedFile>> {
        let request = ExtractRequest {
            url,
            path,
            token: token.or(self.default_token.as_deref()),
            skip_paths,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| RagError::Extraction {
                status: None,
                payload: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let payload = response.text().await.unwrap_or_default();
            return Err(RagError::Extraction {
                status: Some(status.as_u16()),
                payload,
            });
        }

        let body: ExtractResponse = response.json().await.map_err(|e| RagError::Extraction {
            status: Some(status.as_u16()),
            payload: format!("malformed extraction response: {}", e),
        })?;

        Ok(body
            .data
            .into_iter()
            .map(|(path, text)| ExtractedFile { path, text })
            .collect())
    }
}
