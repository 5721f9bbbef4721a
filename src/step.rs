//! Checkpointed step execution with retry and exponential backoff.
//!
//! A [`StepRunner`] belongs to one workflow run. Each named step's result is
//! recorded in the run's journal as JSON; asking for a step that already
//! completed returns the recorded value without re-running it.
//!
//! # Retry Strategy
//!
//! - Non-retryable error ([`RagError::is_retryable`] is false) → fail immediately
//! - Retryable error → sleep and retry, up to `max_attempts` attempts in total
//! - Backoff: base, 2×base, 4×base, ... capped at 2^5 × base
//! - Exhausted attempts → [`RagError::RetriesExhausted`]

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use repo_rag_core::{RagError, Result};

use crate::config::WorkflowConfig;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_base: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &WorkflowConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            backoff_base: Duration::from_millis(config.backoff_base_ms),
        }
    }

    /// Delay before the attempt following failed attempt number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(5);
        self.backoff_base * (1u32 << exp)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&WorkflowConfig::default())
    }
}

pub struct StepRunner {
    instance_id: String,
    policy: RetryPolicy,
    journal: Mutex<HashMap<String, serde_json::Value>>,
}

impl StepRunner {
    pub fn new(instance_id: impl Into<String>, policy: RetryPolicy) -> Self {
        Self {
            instance_id: instance_id.into(),
            policy,
            journal: Mutex::new(HashMap::new()),
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Whether `name` has a recorded result.
    pub fn is_complete(&self, name: &str) -> Result<bool> {
        Ok(self.lock()?.contains_key(name))
    }

    /// Run step `name`, or return its recorded result.
    ///
    /// `f` is invoked once per attempt.
    pub async fn run<T, F, Fut>(&self, name: &str, mut f: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let recorded = self.lock()?.get(name).cloned();
        if let Some(recorded) = recorded {
            tracing::debug!(instance = %self.instance_id, step = name, "step already complete, replaying");
            return Ok(serde_json::from_value(recorded)?);
        }

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            tracing::debug!(instance = %self.instance_id, step = name, attempt, "running step");

            match f().await {
                Ok(value) => {
                    let recorded = serde_json::to_value(&value)?;
                    self.lock()?.insert(name.to_string(), recorded);
                    tracing::debug!(instance = %self.instance_id, step = name, attempt, "step complete");
                    return Ok(value);
                }
                Err(e) if !e.is_retryable() => {
                    tracing::warn!(
                        instance = %self.instance_id,
                        step = name,
                        attempt,
                        error = %e,
                        "step failed with non-retryable error"
                    );
                    return Err(e);
                }
                Err(e) if attempt >= self.policy.max_attempts => {
                    tracing::warn!(
                        instance = %self.instance_id,
                        step = name,
                        attempt,
                        error = %e,
                        "step exhausted its retries"
                    );
                    return Err(RagError::RetriesExhausted {
                        step: name.to_string(),
                        attempts: attempt,
                        source: Box::new(e),
                    });
                }
                Err(e) => {
                    let delay = self.policy.delay(attempt);
                    tracing::info!(
                        instance = %self.instance_id,
                        step = name,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "step failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, serde_json::Value>>> {
        self.journal
            .lock()
            .map_err(|_| RagError::Store("step journal lock poisoned".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            backoff_base: Duration::from_millis(1),
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            backoff_base: Duration::from_millis(1000),
        };
        assert_eq!(policy.delay(1), Duration::from_secs(1));
        assert_eq!(policy.delay(2), Duration::from_secs(2));
        assert_eq!(policy.delay(4), Duration::from_secs(8));
        assert_eq!(policy.delay(6), Duration::from_secs(32));
        assert_eq!(policy.delay(9), Duration::from_secs(32));
    }

    #[tokio::test]
    async fn test_completed_step_is_not_rerun() {
        let runner = StepRunner::new("i-1", fast(3));
        let calls = &AtomicU32::new(0);

        for _ in 0..2 {
            let value: String = runner
                .run("create", move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok("repo-1".to_string())
                })
                .await
                .unwrap();
            assert_eq!(value, "repo-1");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(runner.is_complete("create").unwrap());
    }

    #[tokio::test]
    async fn test_retryable_error_recovers() {
        let runner = StepRunner::new("i-1", fast(5));
        let calls = &AtomicU32::new(0);

        let value: u32 = runner
            .run("embed", move || async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 {
                    Err(RagError::Embedding("rate limited".into()))
                } else {
                    Ok(n)
                }
            })
            .await
            .unwrap();
        assert_eq!(value, 3);
    }

    #[tokio::test]
    async fn test_non_retryable_error_fails_first_time() {
        let runner = StepRunner::new("i-1", fast(5));
        let calls = &AtomicU32::new(0);

        let err = runner
            .run::<(), _, _>("extract", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(RagError::Extraction {
                    status: Some(500),
                    payload: "boom".into(),
                })
            })
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::Extraction { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!runner.is_complete("extract").unwrap());
    }

    #[tokio::test]
    async fn test_retries_exhausted() {
        let runner = StepRunner::new("i-1", fast(3));
        let calls = &AtomicU32::new(0);

        let err = runner
            .run::<(), _, _>("embed", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(RagError::Embedding("down".into()))
            })
            .await
            .unwrap_err();
        match err {
            RagError::RetriesExhausted { step, attempts, .. } => {
                assert_eq!(step, "embed");
                assert_eq!(attempts, 3);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
