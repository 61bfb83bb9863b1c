//! End-to-end scheduling scenarios: worker pool, retry orchestration and
//! progress reporting wired together through the registry.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use tokio::time::timeout;
use uuid::Uuid;

use media_jobs::config::SchedulerConfig;
use media_jobs::error::ProcessError;
use media_jobs::jobs::{Job, JobOptions, JobRegistry, JobStatus};
use media_jobs::media::classify;
use media_jobs::retry::{RetryPolicy, run_with_retries};
use media_jobs::worker::{Processor, ProgressReporter, Scheduler};

const TEST_TIMEOUT: Duration = Duration::from_secs(10);

fn start(concurrency: usize, processor: Arc<dyn Processor>) -> Scheduler {
    let config = SchedulerConfig {
        concurrency,
        job_timeout: None,
    };
    Scheduler::start(config, Arc::new(JobRegistry::new()), processor)
}

fn enqueue(scheduler: &Scheduler, source: &str) -> Uuid {
    let id = scheduler.registry().create(source, JobOptions::default());
    scheduler.submit(id).unwrap();
    id
}

async fn wait_terminal(registry: &JobRegistry, id: Uuid) -> Job {
    loop {
        let job = registry.get(id).unwrap();
        if job.status.is_terminal() {
            return job;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

async fn write_artifact(dir: &std::path::Path, job: &Job) -> Result<PathBuf, ProcessError> {
    let path = dir.join(format!("{}.mp3", job.id));
    tokio::fs::write(&path, b"ID3").await?;
    Ok(path)
}

fn fast_retries(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        base_delay: Duration::from_millis(1),
        growth: 2.0,
        max_delay: Duration::from_millis(5),
        jitter: Duration::ZERO,
    }
}

// ── Worker pool ──────────────────────────────────────────────────────

struct CountingProcessor {
    dir: tempfile::TempDir,
    running: AtomicUsize,
    peak: AtomicUsize,
}

#[async_trait]
impl Processor for CountingProcessor {
    async fn process(&self, job: &Job, _progress: ProgressReporter) -> Result<PathBuf, ProcessError> {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(30)).await;
        self.running.fetch_sub(1, Ordering::SeqCst);
        write_artifact(self.dir.path(), job).await
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn never_runs_more_jobs_than_workers() {
    timeout(TEST_TIMEOUT, async {
        let processor = Arc::new(CountingProcessor {
            dir: tempfile::tempdir().unwrap(),
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let scheduler = start(2, processor.clone());
        assert_eq!(scheduler.worker_count(), 2);

        let ids: Vec<Uuid> = (0..7).map(|n| enqueue(&scheduler, &format!("ref-{n}"))).collect();
        let registry = scheduler.registry();
        let jobs = join_all(ids.iter().map(|id| wait_terminal(registry, *id))).await;

        for job in &jobs {
            assert_eq!(job.status, JobStatus::Done);
            assert_eq!(job.progress, 100);
            assert!(job.result.as_ref().is_some_and(|p| p.exists()));
        }
        assert!(processor.peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(registry.summary().done, 7);
    })
    .await
    .expect("test timed out");
}

// ── Retry orchestration ──────────────────────────────────────────────

/// Fails with a scripted error until `succeed_on`, counting attempts.
struct Scripted {
    dir: tempfile::TempDir,
    attempts: AtomicU32,
    error: fn() -> ProcessError,
    succeed_on: Option<u32>,
    policy: RetryPolicy,
}

#[async_trait]
impl Processor for Scripted {
    async fn process(&self, job: &Job, progress: ProgressReporter) -> Result<PathBuf, ProcessError> {
        run_with_retries(
            &self.policy,
            |attempt| {
                self.attempts.fetch_add(1, Ordering::SeqCst);
                progress.report(10 + i64::from(attempt) * 10, Some("downloading"));
                let outcome = match self.succeed_on {
                    Some(n) if attempt + 1 >= n => Ok(()),
                    _ => Err((self.error)()),
                };
                async move { outcome }
            },
            classify,
        )
        .await?;
        write_artifact(self.dir.path(), job).await
    }
}

fn scripted(error: fn() -> ProcessError, succeed_on: Option<u32>) -> Arc<Scripted> {
    Arc::new(Scripted {
        dir: tempfile::tempdir().unwrap(),
        attempts: AtomicU32::new(0),
        error,
        succeed_on,
        policy: fast_retries(3),
    })
}

fn private_video() -> ProcessError {
    ProcessError::ToolFailed {
        tool: "yt-dlp".into(),
        status: "exit status: 1".into(),
        stderr: "ERROR: [youtube] abc: Private video".into(),
    }
}

fn throttled() -> ProcessError {
    ProcessError::ToolFailed {
        tool: "yt-dlp".into(),
        status: "exit status: 1".into(),
        stderr: "ERROR: HTTP Error 429: Too Many Requests".into(),
    }
}

#[tokio::test]
async fn permanent_failure_is_not_retried() {
    timeout(TEST_TIMEOUT, async {
        let processor = scripted(private_video, None);
        let scheduler = start(1, processor.clone());
        let id = enqueue(&scheduler, "ref-private");

        let job = wait_terminal(scheduler.registry(), id).await;
        assert_eq!(job.status, JobStatus::Error);
        assert!(job.message.contains("Private video"), "{}", job.message);
        assert_eq!(processor.attempts.load(Ordering::SeqCst), 1);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn transient_failures_recover_within_budget() {
    timeout(TEST_TIMEOUT, async {
        let processor = scripted(throttled, Some(3));
        let scheduler = start(1, processor.clone());
        let id = enqueue(&scheduler, "ref-flaky");

        let job = wait_terminal(scheduler.registry(), id).await;
        assert_eq!(job.status, JobStatus::Done);
        assert_eq!(processor.attempts.load(Ordering::SeqCst), 3);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn exhausted_budget_reports_last_error() {
    timeout(TEST_TIMEOUT, async {
        let processor = scripted(throttled, None);
        let scheduler = start(1, processor.clone());
        let id = enqueue(&scheduler, "ref-throttled");

        let job = wait_terminal(scheduler.registry(), id).await;
        assert_eq!(job.status, JobStatus::Error);
        assert!(job.message.contains("gave up after 3 attempts"), "{}", job.message);
        assert!(job.message.contains("429"), "{}", job.message);
        assert_eq!(processor.attempts.load(Ordering::SeqCst), 3);
    })
    .await
    .expect("test timed out");
}

// ── Progress ─────────────────────────────────────────────────────────

struct Stepper {
    dir: tempfile::TempDir,
}

#[async_trait]
impl Processor for Stepper {
    async fn process(&self, job: &Job, progress: ProgressReporter) -> Result<PathBuf, ProcessError> {
        for value in [5, 30, 20, 60, 150] {
            progress.report(value, Some(&format!("step {value}")));
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        write_artifact(self.dir.path(), job).await
    }
}

#[tokio::test]
async fn polled_progress_never_goes_backwards() {
    timeout(TEST_TIMEOUT, async {
        let scheduler = start(
            1,
            Arc::new(Stepper {
                dir: tempfile::tempdir().unwrap(),
            }),
        );
        let id = enqueue(&scheduler, "ref-steps");

        let mut seen = Vec::new();
        let job = loop {
            let job = scheduler.registry().get(id).unwrap();
            seen.push(job.progress);
            // The artifact reference appears exactly when the job is done.
            assert_eq!(job.result.is_some(), job.status == JobStatus::Done);
            if job.status.is_terminal() {
                break job;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        };

        assert_eq!(job.status, JobStatus::Done);
        assert!(seen.windows(2).all(|w| w[0] <= w[1]), "{seen:?}");
        assert!(seen.iter().all(|p| *p <= 100));
        assert_eq!(seen.last(), Some(&100));
    })
    .await
    .expect("test timed out");
}
