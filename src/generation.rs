//! Text-generation providers.
//!
//! Both backends send `[system, user]` chat messages built by
//! [`build_messages`]: the system prompt with the retrieved context appended,
//! followed by the question. Failures are retryable
//! [`RagError::Generation`] errors.

use anyhow::{bail, Context};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;

use repo_rag_core::context::build_messages;
use repo_rag_core::gateway::Generator;
use repo_rag_core::{RagError, Result};

use crate::config::ProviderConfig;
use crate::embedding::{OPENAI_BASE_URL, WORKERS_AI_BASE_URL};
use crate::http;

pub const DEFAULT_WORKERS_AI_GENERATION_MODEL: &str = "@cf/meta/llama-3.3-70b-instruct-fp8-fast";
pub const DEFAULT_OPENAI_GENERATION_MODEL: &str = "gpt-4o-mini";

pub struct WorkersAiGenerator {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
}

#[derive(Deserialize)]
struct WorkersAiChatResponse {
    result: WorkersAiChatResult,
}

#[derive(Deserialize)]
struct WorkersAiChatResult {
    response: Option<String>,
}

impl WorkersAiGenerator {
    pub fn new(config: &ProviderConfig, api_key: String) -> anyhow::Result<Self> {
        let account_id = config
            .account_id
            .as_deref()
            .context("generation.account_id required for workers-ai provider")?;
        let model = config
            .model
            .clone()
            .unwrap_or_else(|| DEFAULT_WORKERS_AI_GENERATION_MODEL.to_string());
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
impl Generator for WorkersAiGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(
        &self,
        system_prompt: &str,
        context: Option<&str>,
        question: &str,
    ) -> Result<String> {
        let messages = build_messages(system_prompt, context, question);

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({ "messages": messages }))
            .send()
            .await
            .map_err(|e| RagError::Generation(e.to_string()))?;

        if !response.status().is_success() {
            return Err(RagError::Generation(format!(
                "Workers AI error {}",
                http::describe_failure(response).await
            )));
        }

        let body: WorkersAiChatResponse = response
            .json()
            .await
            .map_err(|e| RagError::Generation(format!("invalid Workers AI response: {}", e)))?;

        body.result
            .response
            .ok_or_else(|| RagError::Generation("Workers AI returned no response text".into()))
    }
}

pub struct OpenAiGenerator {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
}

#[derive(Deserialize)]
struct ChatCompletion {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

impl OpenAiGenerator {
    pub fn new(config: &ProviderConfig, api_key: String) -> anyhow::Result<Self> {
        let base = config
            .base_url
            .as_deref()
            .unwrap_or(OPENAI_BASE_URL)
            .trim_end_matches('/');

        Ok(Self {
            client: http::client(config.timeout_secs)?,
            endpoint: format!("{}/chat/completions", base),
            model: config
                .model
                .clone()
                .unwrap_or_else(|| DEFAULT_OPENAI_GENERATION_MODEL.to_string()),
            api_key,
        })
    }
}

#[async_trait]
impl Generator for OpenAiGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(
        &self,
        system_prompt: &str,
        context: Option<&str>,
        question: &str,
    ) -> Result<String> {
        let messages = build_messages(system_prompt, context, question);

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({
                "model": self.model,
                "messages": messages,
            }))
            .send()
            .await
            .map_err(|e| RagError::Generation(e.to_string()))?;

        if !response.status().is_success() {
            return Err(RagError::Generation(format!(
                "OpenAI API error {}",
                http::describe_failure(response).await
            )));
        }

        let body: ChatCompletion = response
            .json()
            .await
            .map_err(|e| RagError::Generation(format!("invalid OpenAI response: {}", e)))?;

        body.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| RagError::Generation("OpenAI returned no choices".into()))
    }
}

/// Create the [`Generator`] named by `config.provider`.
pub fn create_generator(config: &ProviderConfig) -> anyhow::Result<Arc<dyn Generator>> {
    let var = config.api_key_var();
    let api_key =
        std::env::var(var).with_context(|| format!("{} environment variable not set", var))?;

    match config.provider.as_str() {
        "workers-ai" => Ok(Arc::new(WorkersAiGenerator::new(config, api_key)?)),
        "openai" => Ok(Arc::new(OpenAiGenerator::new(config, api_key)?)),
        other => bail!("Unknown generation provider: {}", other),
    }
}
