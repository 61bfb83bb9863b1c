//! Job scheduler: a fixed pool of workers draining one FIFO queue.
//!
//! Each worker owns exactly one job at a time, so the pool size bounds the
//! number of concurrent processor calls. The queue is unbounded: submitting
//! never waits on the workers.

use std::any::Any;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Instant;

use tokio::sync::{Mutex, mpsc};
use tokio::task::{AbortHandle, JoinError, JoinHandle};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::SchedulerConfig;
use crate::error::{JobError, ProcessError};
use crate::jobs::{JobRegistry, JobUpdate};
use crate::worker::processor::{ProgressReporter, Processor};

type SharedQueue = Arc<Mutex<mpsc::UnboundedReceiver<Uuid>>>;

/// Abort handles of the job tasks currently running, keyed by worker index.
type InFlight = Arc<StdMutex<HashMap<usize, AbortHandle>>>;

/// Runs queued jobs on a bounded worker pool.
pub struct Scheduler {
    registry: Arc<JobRegistry>,
    queue_tx: mpsc::UnboundedSender<Uuid>,
    workers: Vec<JoinHandle<()>>,
    in_flight: InFlight,
}

impl Scheduler {
    /// Spawn the worker pool on the current tokio runtime.
    pub fn start(
        config: SchedulerConfig,
        registry: Arc<JobRegistry>,
        processor: Arc<dyn Processor>,
    ) -> Self {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let queue: SharedQueue = Arc::new(Mutex::new(queue_rx));
        let concurrency = config.concurrency.max(1);
        let in_flight = InFlight::default();

        let workers = (0..concurrency)
            .map(|index| {
                let worker = Worker {
                    index,
                    queue: Arc::clone(&queue),
                    registry: Arc::clone(&registry),
                    processor: Arc::clone(&processor),
                    config: config.clone(),
                    in_flight: Arc::clone(&in_flight),
                };
                tokio::spawn(worker.run())
            })
            .collect();

        info!(workers = concurrency, timeout = ?config.job_timeout, "Scheduler started");

        Self {
            registry,
            queue_tx,
            workers,
            in_flight,
        }
    }

    /// Enqueue an already-created job.
    pub fn submit(&self, job_id: Uuid) -> Result<(), JobError> {
        self.queue_tx
            .send(job_id)
            .map_err(|_| JobError::QueueClosed { id: job_id })?;
        debug!(job_id = %job_id, "Job enqueued");
        Ok(())
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        for worker in &self.workers {
            worker.abort();
        }
        // Job tasks are detached from their worker; stop them too.
        let in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        for task in in_flight.values() {
            task.abort();
        }
    }
}

struct Worker {
    index: usize,
    queue: SharedQueue,
    registry: Arc<JobRegistry>,
    processor: Arc<dyn Processor>,
    config: SchedulerConfig,
    in_flight: InFlight,
}

impl Worker {
    async fn run(self) {
        loop {
            // The guard is released before the job runs so idle workers can keep pulling.
            let next = self.queue.lock().await.recv().await;
            let Some(job_id) = next else {
                debug!(worker = self.index, "Queue closed, worker exiting");
                break;
            };
            self.run_job(job_id).await;
        }
    }

    fn track(&self, task: Option<AbortHandle>) {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        match task {
            Some(handle) => in_flight.insert(self.index, handle),
            None => in_flight.remove(&self.index),
        };
    }

    async fn run_job(&self, job_id: Uuid) {
        let Some(job) = self.registry.get(job_id) else {
            warn!(worker = self.index, job_id = %job_id, "Dequeued unknown job, skipping");
            return;
        };
        if !self.registry.update(job_id, JobUpdate::started()) {
            warn!(worker = self.index, job_id = %job_id, status = %job.status, "Job not startable, skipping");
            return;
        }

        info!(worker = self.index, job_id = %job_id, source = %job.source, "Job started");
        let started = Instant::now();

        let reporter = ProgressReporter::new(job_id, Arc::clone(&self.registry));
        let processor = Arc::clone(&self.processor);
        // A separate task turns a processor panic into a job error instead of a dead worker.
        let mut task = tokio::spawn(async move { processor.process(&job, reporter).await });
        self.track(Some(task.abort_handle()));

        let result = match self.config.job_timeout {
            Some(limit) => match tokio::time::timeout(limit, &mut task).await {
                Ok(joined) => flatten(joined),
                Err(_) => {
                    task.abort();
                    Err(ProcessError::TimedOut(limit))
                }
            },
            None => flatten(task.await),
        };
        self.track(None);
        let result = match result {
            Ok(path) => verify_artifact(path).await,
            Err(err) => Err(err),
        };

        match result {
            Ok(path) => {
                info!(
                    worker = self.index,
                    job_id = %job_id,
                    artifact = %path.display(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Job completed"
                );
                self.registry.update(job_id, JobUpdate::completed(path));
            }
            Err(err) => {
                warn!(
                    worker = self.index,
                    job_id = %job_id,
                    error = %err,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Job failed"
                );
                self.registry.update(job_id, JobUpdate::failed(err.to_string()));
            }
        }
    }
}

fn flatten(
    joined: Result<Result<PathBuf, ProcessError>, JoinError>,
) -> Result<PathBuf, ProcessError> {
    match joined {
        Ok(result) => result,
        Err(err) if err.is_panic() => Err(ProcessError::Panicked(panic_message(err.into_panic()))),
        Err(err) => Err(ProcessError::Panicked(err.to_string())),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// A `done` job must point at a file that exists right now.
async fn verify_artifact(path: PathBuf) -> Result<PathBuf, ProcessError> {
    if path.as_os_str().is_empty() || !tokio::fs::try_exists(&path).await.unwrap_or(false) {
        return Err(ProcessError::MissingOutput(path));
    }
    Ok(path)
}
