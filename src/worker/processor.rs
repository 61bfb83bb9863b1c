//! The processor plug-in point and the progress channel handed to it.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::ProcessError;
use crate::jobs::{Job, JobRegistry, JobUpdate};

/// Turns a job into an artifact on disk.
///
/// Implementations may take minutes, report progress through `progress`
/// and decide for themselves which steps to retry.
#[async_trait]
pub trait Processor: Send + Sync {
    async fn process(&self, job: &Job, progress: ProgressReporter)
    -> Result<PathBuf, ProcessError>;
}

/// Progress callback bound to one job.
///
/// Every call is a short registry update; reports for a job that has
/// already finished are dropped.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    job_id: Uuid,
    registry: Arc<JobRegistry>,
}

impl ProgressReporter {
    pub fn new(job_id: Uuid, registry: Arc<JobRegistry>) -> Self {
        Self { job_id, registry }
    }

    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    /// Report progress (clamped to 0..=100) and optionally replace the status message.
    pub fn report(&self, value: i64, message: Option<&str>) {
        let mut update = JobUpdate::progress(value);
        if let Some(message) = message {
            update = update.with_message(message);
        }
        self.registry.update(self.job_id, update);
    }

    /// Store what the processor learned about the source (title, uploader, ...).
    pub fn record_info(&self, info: serde_json::Value) {
        self.registry.update(self.job_id, JobUpdate::info(info));
    }
}
