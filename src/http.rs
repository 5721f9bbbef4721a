//! Small helpers shared by the reqwest-based gateways.

use anyhow::Result;
use std::time::Duration;

/// Build a client with a request timeout and the crate's user agent.
pub fn client(timeout_secs: u64) -> Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .user_agent(concat!("repo-rag/", env!("CARGO_PKG_VERSION")))
        .build()?;
    Ok(client)
}

/// Render a non-success response as `"<status>: <body>"`.
pub async fn describe_failure(response: reqwest::Response) -> String {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    format!("{}: {}", status, body)
}
