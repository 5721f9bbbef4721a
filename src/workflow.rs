//! Workflow engine: instance registry, spawning, and status tracking.
//!
//! [`WorkflowEngine::submit`] validates a submission, records a `queued`
//! [`WorkflowInstance`], and spawns the run on the tokio runtime. The run
//! moves the instance to `running`, executes the ingestion steps
//! ([`crate::ingest`]), and finishes as `complete` or `errored`.
//!
//! Instance records are written through the store's pool, outside the run's
//! transaction, so status stays observable while the run is in progress and
//! after it rolls back.
//!
//! # Restart behaviour
//!
//! The step journal lives exactly as long as the run's transaction. When a
//! process dies mid-run its uncommitted writes die with it, so
//! [`WorkflowEngine::resume_interrupted`] restarts such instances from the
//! first step with a fresh journal. A `running` instance whose repository is
//! already committed died between commit and its final status write; it is
//! marked `complete` without running again.
//!
//! # Queued instances from other processes
//!
//! `rrag submit` without `--wait` only records a `queued` instance.
//! [`WorkflowEngine::spawn_queue_poller`] lets a serving process pick those
//! up. An adopted instance whose URL is already being ingested here, or is
//! already stored, ends `errored` with a conflict message.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use repo_rag_core::models::{IngestParams, InstanceStatus, WorkflowInstance};
use repo_rag_core::{RagError, Result};

use crate::github::canonical_repo_url;
use crate::ingest::{run_ingest, IngestDeps};
use crate::step::{RetryPolicy, StepRunner};

#[derive(Clone)]
pub struct WorkflowEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    deps: IngestDeps,
    policy: RetryPolicy,
    concurrency: usize,
    /// URL → id of the instance running it in this process.
    in_flight: Mutex<HashMap<String, String>>,
}

/// Removes a URL from the in-flight map when the run ends, however it ends.
struct InFlightGuard {
    inner: Arc<EngineInner>,
    url: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if let Ok(mut in_flight) = self.inner.in_flight.lock() {
            in_flight.remove(&self.url);
        }
    }
}

impl WorkflowEngine {
    pub fn new(deps: IngestDeps, policy: RetryPolicy, concurrency: usize) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                deps,
                policy,
                concurrency: concurrency.max(1),
                in_flight: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Validate and record a submission, then run it in the background.
    ///
    /// Returns the `queued` instance immediately.
    pub async fn submit(&self, params: IngestParams) -> Result<WorkflowInstance> {
        let (instance, guard) = self.register(params).await?;

        let engine = self.clone();
        let spawned = instance.clone();
        tokio::spawn(async move {
            engine.drive(spawned, guard).await;
        });

        Ok(instance)
    }

    /// Validate and record a submission without running it.
    ///
    /// A serving process picks the `queued` instance up through
    /// [`run_queued`](Self::run_queued). Tokens are not persisted, so such a
    /// run falls back to the configured default token.
    pub async fn enqueue(&self, params: IngestParams) -> Result<WorkflowInstance> {
        let (instance, _guard) = self.register(params).await?;
        Ok(instance)
    }

    /// Validate, record, and run a submission on the current task.
    ///
    /// Returns the instance in its terminal state.
    pub async fn run_to_completion(&self, params: IngestParams) -> Result<WorkflowInstance> {
        let (instance, guard) = self.register(params).await?;
        Ok(self.drive(instance, guard).await)
    }

    pub async fn status(&self, id: &str) -> Result<WorkflowInstance> {
        self.inner
            .deps
            .store
            .get_instance(id)
            .await?
            .ok_or_else(|| RagError::NotFound(format!("workflow instance {}", id)))
    }

    /// Re-spawn instances a previous process left `queued` or `running`.
    ///
    /// Returns how many instances were restarted.
    pub async fn resume_interrupted(&self) -> Result<usize> {
        self.adopt(&[InstanceStatus::Queued, InstanceStatus::Running])
            .await
    }

    /// Start `queued` instances recorded by another process.
    ///
    /// Returns how many instances were started.
    pub async fn run_queued(&self) -> Result<usize> {
        self.adopt(&[InstanceStatus::Queued]).await
    }

    /// Call [`run_queued`](Self::run_queued) every `every` until the task is
    /// aborted or the runtime shuts down.
    pub fn spawn_queue_poller(&self, every: Duration) -> JoinHandle<()> {
        let engine = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match engine.run_queued().await {
                    Ok(0) => {}
                    Ok(started) => tracing::info!(started, "started queued workflows"),
                    Err(e) => tracing::warn!(error = %e, "polling queued workflows failed"),
                }
            }
        })
    }

    async fn adopt(&self, statuses: &[InstanceStatus]) -> Result<usize> {
        let store = &self.inner.deps.store;
        let pending = store.list_instances(statuses).await?;

        let mut started = 0;
        for listed in pending {
            if self.runs_here(&listed.id)? {
                continue;
            }
            // a run of this process may have finished since the listing;
            // its final status is written before it leaves the in-flight map
            let Some(mut instance) = store.get_instance(&listed.id).await? else {
                continue;
            };
            if !statuses.contains(&instance.status) {
                continue;
            }
            let url = instance.params.url.clone();

            if store.find_repository_by_url(&url).await?.is_some() {
                if instance.status == InstanceStatus::Running {
                    tracing::info!(instance = %instance.id, url = %url, "repository already committed, marking complete");
                    self.transition(&mut instance, InstanceStatus::Complete, None)
                        .await;
                } else {
                    tracing::warn!(instance = %instance.id, url = %url, "repository already stored, not running");
                    let error = RagError::Conflict("repository already exists in db".into());
                    self.transition(&mut instance, InstanceStatus::Errored, Some(error.to_string()))
                        .await;
                }
                continue;
            }

            let Some(guard) = self.claim(&url, &instance.id)? else {
                tracing::warn!(instance = %instance.id, url = %url, "url already in flight, not running");
                let error = RagError::Conflict("repository is already being ingested".into());
                self.transition(&mut instance, InstanceStatus::Errored, Some(error.to_string()))
                    .await;
                continue;
            };
            tracing::info!(instance = %instance.id, url = %url, status = %instance.status, "adopting workflow");

            let engine = self.clone();
            tokio::spawn(async move {
                engine.drive(instance, guard).await;
            });
            started += 1;
        }
        Ok(started)
    }

    async fn register(&self, mut params: IngestParams) -> Result<(WorkflowInstance, InFlightGuard)> {
        params.url = canonical_repo_url(&params.url)
            .ok_or_else(|| RagError::Validation("github url is required".into()))?;

        let store = &self.inner.deps.store;
        if store.find_repository_by_url(&params.url).await?.is_some() {
            return Err(RagError::Conflict("repository already exists in db".into()));
        }

        let instance = WorkflowInstance::queued(params);
        let guard = self
            .claim(&instance.params.url, &instance.id)?
            .ok_or_else(|| RagError::Conflict("repository is already being ingested".into()))?;

        store.save_instance(&instance).await?;
        tracing::info!(instance = %instance.id, url = %instance.params.url, "workflow queued");

        Ok((instance, guard))
    }

    fn lock_in_flight(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>> {
        self.inner
            .in_flight
            .lock()
            .map_err(|_| RagError::Store("in-flight registry lock poisoned".into()))
    }

    fn runs_here(&self, instance_id: &str) -> Result<bool> {
        Ok(self.lock_in_flight()?.values().any(|id| id == instance_id))
    }

    fn claim(&self, url: &str, instance_id: &str) -> Result<Option<InFlightGuard>> {
        let mut in_flight = self.lock_in_flight()?;
        if in_flight.contains_key(url) {
            return Ok(None);
        }
        in_flight.insert(url.to_string(), instance_id.to_string());

        Ok(Some(InFlightGuard {
            inner: self.inner.clone(),
            url: url.to_string(),
        }))
    }

    /// Run one instance to a terminal state. Never fails: errors end up in
    /// the instance record.
    async fn drive(&self, mut instance: WorkflowInstance, _guard: InFlightGuard) -> WorkflowInstance {
        self.transition(&mut instance, InstanceStatus::Running, None).await;

        let runner = StepRunner::new(instance.id.clone(), self.inner.policy);
        let outcome = run_ingest(
            &self.inner.deps,
            &runner,
            &instance.params,
            self.inner.concurrency,
        )
        .await;

        match outcome {
            Ok(report) => {
                tracing::info!(
                    instance = %instance.id,
                    repo_id = %report.repo_id,
                    created_repo = report.created_repo,
                    chunks = report.chunks,
                    "workflow complete"
                );
                self.transition(&mut instance, InstanceStatus::Complete, None)
                    .await;
            }
            Err(e) => {
                tracing::error!(instance = %instance.id, code = e.code(), error = %e, "workflow errored");
                self.transition(&mut instance, InstanceStatus::Errored, Some(e.to_string()))
                    .await;
            }
        }
        instance
    }

    async fn transition(
        &self,
        instance: &mut WorkflowInstance,
        status: InstanceStatus,
        error: Option<String>,
    ) {
        instance.status = status;
        instance.error = error;
        instance.updated_at = chrono::Utc::now().timestamp();

        if let Err(e) = self.inner.deps.store.save_instance(instance).await {
            tracing::error!(instance = %instance.id, status = %status, error = %e, "failed to record workflow status");
        }
    }
}
