use std::{fmt::Display, future::Future, sync::Arc};

use dashmap::DashMap;
use data_model::JobId;
use tokio::sync::Semaphore;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{error, info, Instrument};

pub const DEFAULT_MAX_CONCURRENT_JOBS: usize = 32;

/// Owns the background half of every pipeline run.
///
/// Runs wait for one of `max_concurrent` permits before starting. Each run
/// gets a child of the supervisor's token, so it can be cancelled alone or
/// together with everything else on shutdown.
#[derive(Clone)]
pub struct PipelineSupervisor {
    permits: Arc<Semaphore>,
    tracker: TaskTracker,
    shutdown: CancellationToken,
    runs: Arc<DashMap<JobId, CancellationToken>>,
}

/// Removes a run from the active set when its task ends, panics included.
struct RunEntry {
    runs: Arc<DashMap<JobId, CancellationToken>>,
    job_id: JobId,
}

impl Drop for RunEntry {
    fn drop(&mut self) {
        self.runs.remove(&self.job_id);
    }
}

impl PipelineSupervisor {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_concurrent)),
            tracker: TaskTracker::new(),
            shutdown: CancellationToken::new(),
            runs: Arc::new(DashMap::new()),
        }
    }

    pub fn spawn<F, Fut, E>(&self, job_id: JobId, run: F)
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let token = self.shutdown.child_token();
        self.runs.insert(job_id.clone(), token.clone());

        let permits = self.permits.clone();
        let entry = RunEntry {
            runs: self.runs.clone(),
            job_id: job_id.clone(),
        };
        let span = tracing::info_span!("pipeline_run", job_id = job_id.get());
        self.tracker.spawn(
            async move {
                let _entry = entry;
                // A run cancelled while queued still executes; it observes the
                // token straight away and records the cancellation itself.
                let _permit = tokio::select! {
                    permit = permits.acquire_owned() => permit.ok(),
                    _ = token.cancelled() => None,
                };
                if let Err(err) = run(token).await {
                    error!(error = %err, "pipeline run failed");
                }
            }
            .instrument(span),
        );
    }

    /// Cancels one run. Returns false when no such run is active.
    pub fn cancel(&self, job_id: &JobId) -> bool {
        match self.runs.get(job_id) {
            Some(token) => {
                token.cancel();
                info!(job_id = job_id.get(), "cancelled pipeline run");
                true
            }
            None => false,
        }
    }

    pub fn active_runs(&self) -> usize {
        self.runs.len()
    }

    /// True once `shutdown` has been called. Runs use it to tell a server
    /// shutdown apart from a cancellation of their own job.
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Cancels every run and waits for all of them to finish.
    pub async fn shutdown(&self) {
        info!(active = self.active_runs(), "shutting down pipeline supervisor");
        self.shutdown.cancel();
        self.tracker.close();
        self.tracker.wait().await;
    }

    /// Waits for the currently spawned runs without cancelling them.
    pub async fn drain(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }
}

impl Default for PipelineSupervisor {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONCURRENT_JOBS)
    }
}
