//! Job lifecycle: `Created → Executing → {Complete, Failed}`.
//!
//! [`JobTracker`] is the only thing that mutates a job during a run. It keeps
//! a local copy of the job so state stays inspectable even when the remote
//! job store misbehaves.

use sheetloader_remote::JobApi;
use sheetloader_shared::{
    Job, JobId, JobOutcome, JobStatus, NewJob, Result, SheetloaderError, Stage,
};
use tracing::{debug, error, info};

/// Outcome message for a failure at `stage`: `"<stage> failed: <cause>"`.
pub fn failure_message(stage: Stage, cause: &SheetloaderError) -> String {
    format!("{stage} failed: {cause}")
}

pub struct JobTracker<'a> {
    api: &'a dyn JobApi,
    job: Job,
}

impl<'a> JobTracker<'a> {
    /// Create a job in the `Created` state.
    pub async fn start(
        api: &'a dyn JobApi,
        job_type: &str,
        operation: &str,
        source: &str,
    ) -> Result<Self> {
        let request = NewJob {
            job_type: job_type.to_string(),
            operation: operation.to_string(),
            source: source.to_string(),
            status: JobStatus::Created,
        };
        let job = api.create_job(&request).await?;
        info!(job_id = %job.id, job_type, operation, source, "job started");
        Ok(Self { api, job })
    }

    pub fn job(&self) -> &Job {
        &self.job
    }

    pub fn id(&self) -> &JobId {
        &self.job.id
    }

    pub fn status(&self) -> JobStatus {
        self.job.status
    }

    pub fn into_job(self) -> Job {
        self.job
    }

    fn ensure_active(&self, action: &str) -> Result<()> {
        if self.job.status.is_terminal() {
            return Err(SheetloaderError::job(format!(
                "cannot {action} job '{}': already {}",
                self.job.id, self.job.status
            )));
        }
        Ok(())
    }

    /// Report progress. The first ack moves the job to `Executing`.
    ///
    /// Progress is clamped to 100 and never goes backwards: a lower value
    /// keeps the current progress and only updates `info`.
    pub async fn ack(&mut self, progress: u8, info: &str) -> Result<()> {
        self.ensure_active("ack")?;

        if self.job.status == JobStatus::Created {
            self.api
                .update_job_status(&self.job.id, JobStatus::Executing)
                .await?;
            self.job.status = JobStatus::Executing;
        }

        let progress = progress.min(100).max(self.job.progress);
        self.api.ack_job(&self.job.id, progress, info).await?;
        self.job.progress = progress;
        self.job.info = info.to_string();
        debug!(job_id = %self.job.id, progress, info, "job ack");
        Ok(())
    }

    /// Mark the job complete. Local state changes only after the job store
    /// accepted the outcome.
    pub async fn complete(&mut self, outcome: JobOutcome) -> Result<()> {
        self.ensure_active("complete")?;
        self.api.complete_job(&self.job.id, &outcome).await?;

        self.job.status = JobStatus::Complete;
        self.job.progress = 100;
        info!(job_id = %self.job.id, message = %outcome.message, "job complete");
        self.job.outcome = Some(outcome);
        Ok(())
    }

    /// Mark the job failed. The local job ends `Failed` even when the job
    /// store rejects the call; that error is logged and returned.
    pub async fn fail(&mut self, outcome: JobOutcome) -> Result<()> {
        self.ensure_active("fail")?;
        let result = self.api.fail_job(&self.job.id, &outcome).await;

        self.job.status = JobStatus::Failed;
        match &result {
            Ok(()) => info!(job_id = %self.job.id, message = %outcome.message, "job failed"),
            Err(e) => error!(
                job_id = %self.job.id,
                message = %outcome.message,
                error = %e,
                "job store rejected failure report"
            ),
        }
        self.job.outcome = Some(outcome);
        result
    }

    /// Fail with a stage-tagged message derived from `cause`.
    pub async fn fail_at(&mut self, stage: Stage, cause: &SheetloaderError) -> Result<()> {
        self.fail(JobOutcome::message(failure_message(stage, cause)))
            .await
    }
}
