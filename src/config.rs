//! TOML configuration parsing and validation.
//!
//! Every section except `[db]` is optional and falls back to defaults.
//! Secrets are never stored in the file: the config names the environment
//! variables that hold them.

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer};
use std::path::{Path, PathBuf};

use repo_rag_core::search::{DEFAULT_LIMIT, DEFAULT_MIN_SIMILARITY};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default = "default_embedding", deserialize_with = "embedding_section")]
    pub embedding: ProviderConfig,
    #[serde(default = "default_generation", deserialize_with = "generation_section")]
    pub generation: ProviderConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub github: GithubConfig,
    #[serde(default)]
    pub workflow: WorkflowConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
    #[serde(default = "default_busy_timeout_secs")]
    pub busy_timeout_secs: u64,
}

fn default_busy_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8787".to_string()
}

/// Settings for a hosted model backend (embedding or generation).
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// `"workers-ai"` or `"openai"`.
    pub provider: String,
    /// Model identifier; each provider has its own default.
    pub model: Option<String>,
    /// Override for the provider's API base URL.
    pub base_url: Option<String>,
    /// Cloudflare account id (required for `workers-ai`).
    pub account_id: Option<String>,
    /// Name of the environment variable holding the API key.
    pub api_key_env: Option<String>,
    /// Request timeout; 30s for embedding and 120s for generation unless set.
    pub timeout_secs: u64,
}

/// A provider section as written in the file. The timeout default depends
/// on which section it is, so it is resolved afterwards.
#[derive(Deserialize)]
struct ProviderSection {
    #[serde(default = "default_provider")]
    provider: String,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    base_url: Option<String>,
    #[serde(default)]
    account_id: Option<String>,
    #[serde(default)]
    api_key_env: Option<String>,
    #[serde(default)]
    timeout_secs: Option<u64>,
}

impl ProviderSection {
    fn resolve(self, default_timeout_secs: u64) -> ProviderConfig {
        ProviderConfig {
            provider: self.provider,
            model: self.model,
            base_url: self.base_url,
            account_id: self.account_id,
            api_key_env: self.api_key_env,
            timeout_secs: self.timeout_secs.unwrap_or(default_timeout_secs),
        }
    }
}

const EMBEDDING_TIMEOUT_SECS: u64 = 30;
const GENERATION_TIMEOUT_SECS: u64 = 120;

fn default_provider() -> String {
    "workers-ai".to_string()
}

fn default_section(timeout_secs: u64) -> ProviderConfig {
    ProviderConfig {
        provider: default_provider(),
        model: None,
        base_url: None,
        account_id: None,
        api_key_env: None,
        timeout_secs,
    }
}

fn default_embedding() -> ProviderConfig {
    default_section(EMBEDDING_TIMEOUT_SECS)
}

fn default_generation() -> ProviderConfig {
    default_section(GENERATION_TIMEOUT_SECS)
}

fn embedding_section<'de, D>(deserializer: D) -> std::result::Result<ProviderConfig, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(ProviderSection::deserialize(deserializer)?.resolve(EMBEDDING_TIMEOUT_SECS))
}

fn generation_section<'de, D>(deserializer: D) -> std::result::Result<ProviderConfig, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(ProviderSection::deserialize(deserializer)?.resolve(GENERATION_TIMEOUT_SECS))
}

impl ProviderConfig {
    /// The API key env var, falling back to the provider's conventional name.
    pub fn api_key_var(&self) -> &str {
        match (&self.api_key_env, self.provider.as_str()) {
            (Some(var), _) => var,
            (None, "openai") => "OPENAI_API_KEY",
            (None, _) => "CLOUDFLARE_API_TOKEN",
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExtractionConfig {
    /// Endpoint of the extraction service.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_extraction_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout_secs: default_extraction_timeout_secs(),
        }
    }
}

fn default_extraction_timeout_secs() -> u64 {
    300
}

#[derive(Debug, Deserialize, Clone)]
pub struct GithubConfig {
    /// Environment variable holding the default GitHub token.
    #[serde(default = "default_token_env")]
    pub token_env: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Timeout for access checks against the GitHub API.
    #[serde(default = "default_github_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            token_env: default_token_env(),
            api_base: default_api_base(),
            user_agent: default_user_agent(),
            timeout_secs: default_github_timeout_secs(),
        }
    }
}

fn default_token_env() -> String {
    "GITHUB_TOKEN".to_string()
}
fn default_api_base() -> String {
    "https://api.github.com".to_string()
}
fn default_user_agent() -> String {
    format!("repo-rag/{}", env!("CARGO_PKG_VERSION"))
}
fn default_github_timeout_secs() -> u64 {
    30
}

impl GithubConfig {
    /// The default token, if its environment variable is set and non-empty.
    pub fn default_token(&self) -> Option<String> {
        std::env::var(&self.token_env).ok().filter(|t| !t.is_empty())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct WorkflowConfig {
    /// Attempts per step before the instance is marked errored.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// First retry delay; doubles per attempt, capped at 32× this value.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    /// Maximum in-flight embedding sub-steps.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// How often `rrag serve` looks for instances queued by `rrag submit`.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            concurrency: default_concurrency(),
            poll_interval_secs: default_poll_interval_secs(),
        }
    }
}

fn default_max_attempts() -> u32 {
    5
}
fn default_backoff_base_ms() -> u64 {
    1000
}
fn default_concurrency() -> usize {
    8
}
fn default_poll_interval_secs() -> u64 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_min_similarity")]
    pub min_similarity: f64,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            min_similarity: default_min_similarity(),
            limit: default_limit(),
        }
    }
}

fn default_min_similarity() -> f64 {
    DEFAULT_MIN_SIMILARITY
}
fn default_limit() -> usize {
    DEFAULT_LIMIT
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_config(&content)
}

/// Parse and validate a configuration document.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    for (section, provider) in [
        ("embedding", &config.embedding),
        ("generation", &config.generation),
    ] {
        match provider.provider.as_str() {
            "workers-ai" => {
                if provider.account_id.is_none() {
                    anyhow::bail!(
                        "{}.account_id must be set when provider is 'workers-ai'",
                        section
                    );
                }
            }
            "openai" => {}
            other => anyhow::bail!(
                "Unknown {} provider: '{}'. Must be workers-ai or openai.",
                section,
                other
            ),
        }
        if provider.timeout_secs == 0 {
            anyhow::bail!("{}.timeout_secs must be > 0", section);
        }
    }

    if config.workflow.max_attempts == 0 {
        anyhow::bail!("workflow.max_attempts must be >= 1");
    }
    if config.workflow.concurrency == 0 {
        anyhow::bail!("workflow.concurrency must be >= 1");
    }
    if config.workflow.poll_interval_secs == 0 {
        anyhow::bail!("workflow.poll_interval_secs must be > 0");
    }
    if config.github.timeout_secs == 0 {
        anyhow::bail!("github.timeout_secs must be > 0");
    }

    if config.retrieval.limit == 0 {
        anyhow::bail!("retrieval.limit must be >= 1");
    }
    if !(-1.0..=1.0).contains(&config.retrieval.min_similarity) {
        anyhow::bail!("retrieval.min_similarity must be in [-1.0, 1.0]");
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[db]
path = "./data/rrag.sqlite"

[embedding]
account_id = "acct"

[generation]
account_id = "acct"
"#;

    #[test]
    fn test_example_config_parses() {
        let cfg = parse_config(include_str!("../config/rrag.example.toml")).unwrap();
        assert_eq!(cfg.server.bind, "127.0.0.1:8787");
        assert!(cfg.extraction.url.is_some());
        assert_eq!(cfg.workflow.concurrency, 8);
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = parse_config(MINIMAL).unwrap();
        assert_eq!(config.server.bind, "127.0.0.1:8787");
        assert_eq!(config.embedding.provider, "workers-ai");
        assert_eq!(config.embedding.api_key_var(), "CLOUDFLARE_API_TOKEN");
        assert_eq!(config.embedding.timeout_secs, 30);
        assert_eq!(config.generation.timeout_secs, 120);
        assert_eq!(config.workflow.max_attempts, 5);
        assert_eq!(config.workflow.concurrency, 8);
        assert_eq!(config.retrieval.limit, 5);
        assert!((config.retrieval.min_similarity - 0.3).abs() < 1e-9);
        assert_eq!(config.github.token_env, "GITHUB_TOKEN");
        assert_eq!(config.github.timeout_secs, 30);
        assert_eq!(config.workflow.poll_interval_secs, 5);
        assert!(config.extraction.url.is_none());
    }

    #[test]
    fn test_openai_provider_key_var() {
        let config = parse_config(
            r#"
[db]
path = "x.sqlite"

[embedding]
provider = "openai"

[generation]
provider = "openai"
"#,
        )
        .unwrap();
        assert_eq!(config.embedding.api_key_var(), "OPENAI_API_KEY");
    }

    #[test]
    fn test_workers_ai_requires_account() {
        let err = parse_config(
            r#"
[db]
path = "x.sqlite"

[generation]
provider = "openai"
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("embedding.account_id"));
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let err = parse_config(
            r#"
[db]
path = "x.sqlite"

[embedding]
provider = "ollama"
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("Unknown embedding provider"));
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let content = format!("{}\n[workflow]\nmax_attempts = 0\n", MINIMAL);
        assert!(parse_config(&content).is_err());
    }

    #[test]
    fn test_generation_timeout_default_is_per_section() {
        let absent = parse_config(
            r#"
[db]
path = "x.sqlite"

[embedding]
provider = "openai"
"#,
        )
        .unwrap();
        assert_eq!(absent.generation.timeout_secs, 120);
        assert_eq!(absent.embedding.timeout_secs, 30);

        let present = parse_config(&format!("{}model = \"gpt-4o-mini\"\n", MINIMAL)).unwrap();
        assert_eq!(present.generation.timeout_secs, 120);
        assert_eq!(present.generation.model.as_deref(), Some("gpt-4o-mini"));

        let overridden = parse_config(
            r#"
[db]
path = "x.sqlite"

[embedding]
account_id = "acct"
timeout_secs = 10

[generation]
account_id = "acct"
timeout_secs = 45
"#,
        )
        .unwrap();
        assert_eq!(overridden.embedding.timeout_secs, 10);
        assert_eq!(overridden.generation.timeout_secs, 45);
    }

    #[test]
    fn test_github_and_poll_settings_parse() {
        let content = format!(
            "{}\n[github]\ntimeout_secs = 7\n\n[workflow]\npoll_interval_secs = 2\n",
            MINIMAL
        );
        let config = parse_config(&content).unwrap();
        assert_eq!(config.github.timeout_secs, 7);
        assert_eq!(config.workflow.poll_interval_secs, 2);

        let zero = format!("{}\n[github]\ntimeout_secs = 0\n", MINIMAL);
        assert!(parse_config(&zero).is_err());
        let zero = format!("{}\n[workflow]\npoll_interval_secs = 0\n", MINIMAL);
        assert!(parse_config(&zero).is_err());
    }
}
