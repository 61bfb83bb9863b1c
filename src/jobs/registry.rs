//! In-memory job registry.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::debug;
use uuid::Uuid;

use super::model::{Job, JobOptions, JobStatus, JobSummary, JobUpdate};

/// Canonical store of every job created during the process lifetime.
///
/// All access goes through one mutex that is only held for map bookkeeping,
/// never across an `.await` or a processor call.
#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: Mutex<HashMap<Uuid, Job>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, Job>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store a new queued job and return its id.
    pub fn create(&self, source: impl Into<String>, options: JobOptions) -> Uuid {
        let mut job = Job::new(source, options);
        let mut jobs = self.lock();
        while jobs.contains_key(&job.id) {
            job.id = Uuid::new_v4();
        }
        let id = job.id;
        jobs.insert(id, job);
        id
    }

    /// Snapshot of a job.
    pub fn get(&self, id: Uuid) -> Option<Job> {
        self.lock().get(&id).cloned()
    }

    /// Merge `update` into the stored job.
    ///
    /// Returns `false` for unknown ids and for updates the state machine
    /// rejects; neither is an error for the caller.
    pub fn update(&self, id: Uuid, update: JobUpdate) -> bool {
        let mut jobs = self.lock();
        let Some(job) = jobs.get_mut(&id) else {
            debug!(job_id = %id, "Update for unknown job ignored");
            return false;
        };
        let applied = job.apply(update);
        if !applied {
            debug!(job_id = %id, status = %job.status, "Update rejected by job state");
        }
        applied
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Counts per status.
    pub fn summary(&self) -> JobSummary {
        let jobs = self.lock();

        let mut summary = JobSummary::default();
        for job in jobs.values() {
            match job.status {
                JobStatus::Queued => summary.queued += 1,
                JobStatus::InProgress => summary.in_progress += 1,
                JobStatus::Done => summary.done += 1,
                JobStatus::Error => summary.error += 1,
            }
        }

        summary.total = jobs.len();
        summary
    }
}
