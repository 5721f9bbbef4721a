//! GitHub URL handling and repository access checks.

use async_trait::async_trait;

use repo_rag_core::gateway::Authorizer;
use repo_rag_core::{RagError, Result};

use crate::config::GithubConfig;
use crate::http;

const GITHUB_PREFIX: &str = "https://github.com/";

/// Whether `url` names a repository on github.com.
pub fn is_github_url(url: &str) -> bool {
    repo_slug(url).is_some()
}

/// `owner/repo` for a `https://github.com/owner/repo` URL.
///
/// Deeper paths (`/tree/main/src`), a query or fragment, a trailing slash
/// and a `.git` suffix are dropped.
pub fn repo_slug(url: &str) -> Option<String> {
    let rest = url.trim().strip_prefix(GITHUB_PREFIX)?;
    let rest = rest.split(['?', '#']).next().unwrap_or_default();
    let mut parts = rest.split('/');
    let owner = parts.next().unwrap_or_default();
    let repo = parts.next().unwrap_or_default();
    let repo = repo.strip_suffix(".git").unwrap_or(repo);

    if owner.is_empty() || repo.is_empty() {
        return None;
    }
    Some(format!("{}/{}", owner, repo))
}

/// The form repositories are stored under: `https://github.com/owner/repo`.
pub fn canonical_repo_url(url: &str) -> Option<String> {
    repo_slug(url).map(|slug| format!("{}{}", GITHUB_PREFIX, slug))
}

/// Checks read access by listing the repository root through the GitHub API.
pub struct GithubAuthorizer {
    client: reqwest::Client,
    api_base: String,
    user_agent: String,
    default_token: Option<String>,
}

impl GithubAuthorizer {
    pub fn new(config: &GithubConfig, default_token: Option<String>) -> anyhow::Result<Self> {
        Ok(Self {
            client: http::client(config.timeout_secs)?,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            user_agent: config.user_agent.clone(),
            default_token,
        })
    }
}

#[async_trait]
impl Authorizer for GithubAuthorizer {
    async fn authorize(&self, url: &str, token: Option<&str>) -> Result<()> {
        let slug = repo_slug(url)
            .ok_or_else(|| RagError::Authorization(format!("not a GitHub repository: {}", url)))?;

        let mut request = self
            .client
            .get(format!("{}/repos/{}/contents", self.api_base, slug))
            .header(reqwest::header::USER_AGENT, &self.user_agent);
        if let Some(token) = token.or(self.default_token.as_deref()) {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| RagError::Authorization(e.to_string()))?;

        if !response.status().is_success() {
            return Err(RagError::Authorization(format!(
                "GitHub API responded with {}",
                http::describe_failure(response).await
            )));
        }
        Ok(())
    }
}
