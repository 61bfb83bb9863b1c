//! Job service: the admission path and the read side polled by clients.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ServiceConfig;
use crate::error::{AdmissionError, JobError};
use crate::jobs::{Job, JobOptions, JobRegistry, JobStatus, JobSummary};
use crate::rate_limit::RateLimiter;
use crate::worker::{Processor, Scheduler};

/// Client-facing view of a job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobView {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub progress: u8,
    pub message: String,
    pub result: Option<PathBuf>,
    pub info: serde_json::Value,
}

impl From<Job> for JobView {
    fn from(job: Job) -> Self {
        Self {
            job_id: job.id,
            status: job.status,
            progress: job.progress,
            message: job.message,
            result: job.result,
            info: job.info,
        }
    }
}

/// An artifact opened for download.
#[derive(Debug)]
pub struct OpenArtifact {
    pub path: PathBuf,
    pub file: tokio::fs::File,
    pub len: u64,
}

/// Ties the limiter, the registry and the scheduler together.
pub struct JobService {
    limiter: RateLimiter,
    scheduler: Scheduler,
}

impl JobService {
    pub fn new(limiter: RateLimiter, scheduler: Scheduler) -> Self {
        Self { limiter, scheduler }
    }

    /// Build the limiter and start the worker pool from `config`.
    pub fn start(config: &ServiceConfig, processor: Arc<dyn Processor>) -> Self {
        let registry = Arc::new(JobRegistry::new());
        let scheduler = Scheduler::start(config.scheduler.clone(), registry, processor);
        let limiter = RateLimiter::new(config.rate_limit.window, config.rate_limit.max_requests);
        Self::new(limiter, scheduler)
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        self.scheduler.registry()
    }

    /// Admit a new job for `client`: rate limit, create, enqueue.
    ///
    /// The source is assumed to be validated already.
    pub fn create_job(
        &self,
        client: &str,
        source: impl Into<String>,
        options: JobOptions,
    ) -> Result<Uuid, AdmissionError> {
        self.admit(client)?;
        Ok(self.enqueue(client, source, options)?)
    }

    /// Record one request for `client` against the rate limit.
    pub fn admit(&self, client: &str) -> Result<(), AdmissionError> {
        if self.limiter.check_and_record(client) {
            return Ok(());
        }
        warn!(client, "Job rejected by rate limit");
        Err(AdmissionError::RateLimited {
            client: client.to_string(),
        })
    }

    /// Create and enqueue a job for a request that already passed [`admit`].
    ///
    /// [`admit`]: JobService::admit
    pub fn enqueue(
        &self,
        client: &str,
        source: impl Into<String>,
        options: JobOptions,
    ) -> Result<Uuid, JobError> {
        let source = source.into();
        let job_id = self.registry().create(source.clone(), options);
        self.scheduler.submit(job_id)?;

        info!(job_id = %job_id, client, source = %source, "Job admitted");
        Ok(job_id)
    }

    /// Current state of a job; `None` for ids never issued.
    pub fn get_job(&self, job_id: Uuid) -> Option<JobView> {
        self.registry().get(job_id).map(JobView::from)
    }

    /// Artifact of a finished job, if it is still on disk.
    pub async fn artifact(&self, job_id: Uuid) -> Option<PathBuf> {
        let job = self.registry().get(job_id)?;
        if job.status != JobStatus::Done {
            return None;
        }
        let path = job.result?;
        // The sweeper may have removed it since the job finished.
        tokio::fs::try_exists(&path)
            .await
            .unwrap_or(false)
            .then_some(path)
    }

    /// Open the artifact of a finished job for streaming.
    ///
    /// Opening is the existence check: a file swept before this call yields
    /// `None`, one swept afterwards stays readable through the handle.
    pub async fn open_artifact(&self, job_id: Uuid) -> Option<OpenArtifact> {
        let job = self.registry().get(job_id)?;
        if job.status != JobStatus::Done {
            return None;
        }
        let path = job.result?;
        let file = match tokio::fs::File::open(&path).await {
            Ok(file) => file,
            Err(e) => {
                debug!(job_id = %job_id, path = %path.display(), error = %e, "Artifact not openable");
                return None;
            }
        };
        let len = file.metadata().await.ok()?.len();
        Some(OpenArtifact { path, file, len })
    }

    pub fn summary(&self) -> JobSummary {
        self.registry().summary()
    }
}
