//! Job record and its state machine.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Output bitrate used when the client does not ask for one.
pub const DEFAULT_BITRATE_KBPS: u32 = 192;

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting in the queue for a free worker.
    Queued,
    /// A worker is running the processor.
    InProgress,
    /// Finished; the artifact path is set.
    Done,
    /// Failed; the message carries the reason.
    Error,
}

impl JobStatus {
    /// Only forward moves are allowed and `in_progress` is never skipped.
    pub fn can_transition_to(&self, target: JobStatus) -> bool {
        use JobStatus::*;

        matches!(
            (self, target),
            (Queued, InProgress) | (InProgress, Done) | (InProgress, Error)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Queued => "queued",
            Self::InProgress => "in_progress",
            Self::Done => "done",
            Self::Error => "error",
        };
        write!(f, "{s}")
    }
}

/// Options fixed at submission time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOptions {
    /// Target MP3 bitrate in kbps.
    pub bitrate_kbps: u32,
    /// Passthrough tag overrides (`title`, `artist`, `album`, ...).
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            bitrate_kbps: DEFAULT_BITRATE_KBPS,
            metadata: BTreeMap::new(),
        }
    }
}

impl JobOptions {
    pub fn with_bitrate(bitrate_kbps: u32) -> Self {
        Self {
            bitrate_kbps,
            ..Default::default()
        }
    }

    /// Add a metadata entry; blank values are dropped.
    pub fn with_tag(mut self, key: impl Into<String>, value: impl AsRef<str>) -> Self {
        let value = value.as_ref().trim();
        if !value.is_empty() {
            self.metadata.insert(key.into(), value.to_string());
        }
        self
    }

    /// A non-blank metadata value.
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.metadata
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }
}

/// One tracked unit of work.
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: Uuid,
    /// The URL to fetch.
    pub source: String,
    pub created_at: DateTime<Utc>,
    pub options: JobOptions,
    pub status: JobStatus,
    /// 0..=100.
    pub progress: u8,
    pub message: String,
    /// Artifact path, present only when `status == Done`.
    pub result: Option<PathBuf>,
    /// Whatever the processor discovered about the source (title, uploader, ...).
    pub info: serde_json::Value,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(source: impl Into<String>, options: JobOptions) -> Self {
        Self {
            id: Uuid::new_v4(),
            source: source.into(),
            created_at: Utc::now(),
            options,
            status: JobStatus::Queued,
            progress: 0,
            message: "queued".to_string(),
            result: None,
            info: serde_json::Value::Null,
            started_at: None,
            finished_at: None,
        }
    }

    /// Merge `update` into the record.
    ///
    /// Returns `false` and leaves the record untouched when the record is
    /// terminal or the requested status move is not allowed.
    pub fn apply(&mut self, update: JobUpdate) -> bool {
        if self.status.is_terminal() {
            return false;
        }

        let entering = update.status.filter(|s| *s != self.status);
        if let Some(target) = entering {
            if !self.status.can_transition_to(target) {
                return false;
            }
            if target == JobStatus::Done && update.result.is_none() {
                return false;
            }
        }

        match entering {
            Some(JobStatus::InProgress) => {
                self.status = JobStatus::InProgress;
                self.progress = update.progress.map(clamp_progress).unwrap_or(0);
                self.started_at = Some(Utc::now());
            }
            Some(JobStatus::Done) => {
                self.status = JobStatus::Done;
                self.progress = 100;
                self.result = update.result;
                self.finished_at = Some(Utc::now());
            }
            Some(JobStatus::Error) => {
                self.status = JobStatus::Error;
                self.finished_at = Some(Utc::now());
            }
            Some(JobStatus::Queued) => {}
            None => {
                // Progress only moves forward while running.
                if let (JobStatus::InProgress, Some(value)) = (self.status, update.progress) {
                    self.progress = self.progress.max(clamp_progress(value));
                }
            }
        }

        if let Some(message) = update.message {
            self.message = message;
        }
        if let Some(info) = update.info {
            self.info = info;
        }

        true
    }
}

fn clamp_progress(value: i64) -> u8 {
    // Lossless: the value is within 0..=100 after clamping.
    value.clamp(0, 100) as u8
}

/// Partial update merged into a [`Job`] by the registry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobUpdate {
    pub status: Option<JobStatus>,
    pub progress: Option<i64>,
    pub message: Option<String>,
    pub result: Option<PathBuf>,
    pub info: Option<serde_json::Value>,
}

impl JobUpdate {
    /// Progress report from a running processor.
    pub fn progress(value: i64) -> Self {
        Self {
            progress: Some(value),
            ..Default::default()
        }
    }

    /// Queued → in_progress, progress reset to 0.
    pub fn started() -> Self {
        Self {
            status: Some(JobStatus::InProgress),
            progress: Some(0),
            message: Some("processing started".to_string()),
            ..Default::default()
        }
    }

    /// In_progress → done with the artifact path.
    pub fn completed(result: impl Into<PathBuf>) -> Self {
        Self {
            status: Some(JobStatus::Done),
            progress: Some(100),
            message: Some("completed".to_string()),
            result: Some(result.into()),
            ..Default::default()
        }
    }

    /// In_progress → error with a human-readable reason.
    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            status: Some(JobStatus::Error),
            message: Some(reason.into()),
            ..Default::default()
        }
    }

    pub fn info(info: serde_json::Value) -> Self {
        Self {
            info: Some(info),
            ..Default::default()
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Job counts per status.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct JobSummary {
    pub total: usize,
    pub queued: usize,
    pub in_progress: usize,
    pub done: usize,
    pub error: usize,
}
