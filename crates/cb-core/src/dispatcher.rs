//! Per-job dispatch: claim, execute against the peer, persist the outcome.

use crate::SessionBroker;
use cb_local_db::{Job, JobId, JobStatus, JobStore};
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Drives individual jobs from the ledger through the broker.
///
/// Each job is processed independently: a failure in one dispatch never
/// aborts or blocks another, and every error becomes a terminal `failed`
/// record rather than propagating. The broker's gate is the only
/// serialization between concurrent dispatches.
#[derive(Clone)]
pub struct Dispatcher {
    jobs: JobStore,
    broker: Arc<SessionBroker>,
}

impl Dispatcher {
    pub fn new(jobs: JobStore, broker: Arc<SessionBroker>) -> Self {
        Self { jobs, broker }
    }

    /// Dispatch one job by id.
    ///
    /// A job that is missing or no longer pending is skipped quietly: that
    /// is a race with cleanup or a competing worker, not an error state.
    pub async fn dispatch(&self, job_id: &JobId) {
        let job = match self.jobs.claim_job(job_id) {
            Ok(Some(job)) => job,
            Ok(None) => {
                debug!(job_id = %job_id, "Job missing or already claimed; skipping dispatch");
                return;
            }
            Err(e) => {
                error!(job_id = %job_id, error = %e, "Failed to claim job");
                return;
            }
        };

        self.run(job).await;
    }

    /// Dispatch the oldest pending job, if any. Returns its id.
    pub async fn dispatch_next(&self) -> crate::Result<Option<JobId>> {
        let Some(job) = self.jobs.get_next_job()? else {
            return Ok(None);
        };
        let job_id = job.id.clone();
        self.run(job).await;
        Ok(Some(job_id))
    }

    /// Schedule a dispatch as an independent unit of work.
    pub fn spawn(&self, job_id: JobId) -> DispatchHandle {
        let dispatcher = self.clone();
        let id = job_id.clone();
        let handle = tokio::spawn(async move {
            dispatcher.dispatch(&id).await;
        });
        DispatchHandle { job_id, handle }
    }

    async fn run(&self, job: Job) {
        let job_id = job.id.clone();
        match self.execute(&job).await {
            Ok(result) => {
                info!(job_id = %job_id, command = %job.command_type, "Job completed");
                self.finish(&job_id, JobStatus::Completed, Some(result), None);
            }
            Err(e) => {
                let message = format!("Error processing job: {}", e);
                error!(job_id = %job_id, command = %job.command_type, error = %e, "Job failed");
                self.finish(&job_id, JobStatus::Failed, None, Some(message));
            }
        }
    }

    async fn execute(&self, job: &Job) -> crate::Result<Map<String, Value>> {
        self.broker.ensure_connected().await?;
        self.broker
            .send_command(&job.command_type, job.params.clone())
            .await
    }

    fn finish(
        &self,
        job_id: &JobId,
        status: JobStatus,
        result: Option<Map<String, Value>>,
        error: Option<String>,
    ) {
        if let Err(e) = self.jobs.update_job(job_id, status, result, error) {
            // The job stays processing; cleanup will never remove it, so
            // the stuck record remains visible to operators.
            error!(job_id = %job_id, error = %e, "Failed to persist job outcome");
        }
    }
}

/// Handle to a spawned dispatch, so shutdown can drain outstanding work.
pub struct DispatchHandle {
    job_id: JobId,
    handle: JoinHandle<()>,
}

impl DispatchHandle {
    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    /// Wait for the dispatch to finish writing its terminal state.
    pub async fn join(self) {
        if let Err(e) = self.handle.await {
            error!(job_id = %self.job_id, error = %e, "Dispatch task panicked");
        }
    }

    /// Abandon the dispatch. The job may be left `processing`.
    pub fn abort(&self) {
        self.handle.abort();
    }
}
