//! Cleanup sweeper. Evicts output files older than a TTL.
//!
//! The sweeper only looks at the filesystem. Jobs whose artifact it removes
//! keep reporting `done`; the download path re-checks that the file exists.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tracing::{debug, info, warn};

/// Outcome of one sweep cycle.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    /// Regular files looked at.
    pub scanned: usize,
    /// Files deleted.
    pub removed: usize,
    /// Expired files that could not be deleted.
    pub failed: usize,
}

/// Deletes files under `root` whose modification time is older than `ttl`.
#[derive(Debug, Clone)]
pub struct Sweeper {
    root: PathBuf,
    ttl: Duration,
}

impl Sweeper {
    pub fn new(root: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self {
            root: root.into(),
            ttl,
        }
    }

    pub fn root(&self) -> &std::path::Path {
        &self.root
    }

    pub async fn sweep(&self) -> SweepReport {
        self.sweep_at(SystemTime::now()).await
    }

    /// Run one cycle as if the current time were `now`.
    pub async fn sweep_at(&self, now: SystemTime) -> SweepReport {
        let mut report = SweepReport::default();
        let Some(cutoff) = now.checked_sub(self.ttl) else {
            return report;
        };

        let mut pending = vec![self.root.clone()];
        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) => {
                    debug!(dir = %dir.display(), error = %e, "Cannot list directory");
                    continue;
                }
            };

            loop {
                let entry = match entries.next_entry().await {
                    Ok(Some(entry)) => entry,
                    Ok(None) => break,
                    Err(e) => {
                        debug!(dir = %dir.display(), error = %e, "Directory listing interrupted");
                        break;
                    }
                };
                let Ok(file_type) = entry.file_type().await else {
                    continue;
                };
                let path = entry.path();

                if file_type.is_dir() {
                    pending.push(path);
                    continue;
                }
                if !file_type.is_file() {
                    continue;
                }

                report.scanned += 1;
                let modified = match entry.metadata().await.and_then(|m| m.modified()) {
                    Ok(modified) => modified,
                    Err(e) => {
                        debug!(path = %path.display(), error = %e, "Cannot read modification time");
                        continue;
                    }
                };
                if modified >= cutoff {
                    continue;
                }

                match tokio::fs::remove_file(&path).await {
                    Ok(()) => {
                        debug!(path = %path.display(), "Expired artifact removed");
                        report.removed += 1;
                    }
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "Failed to remove expired artifact");
                        report.failed += 1;
                    }
                }
            }
        }

        if report.removed > 0 || report.failed > 0 {
            info!(
                scanned = report.scanned,
                removed = report.removed,
                failed = report.failed,
                "Cleanup sweep finished"
            );
        }

        report
    }
}

/// Spawn a background task that sweeps every `interval`, first run after one interval.
pub fn spawn_sweeper(sweeper: Arc<Sweeper>, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // Skip immediate first tick
        ticker.tick().await;

        loop {
            ticker.tick().await;
            sweeper.sweep().await;
        }
    })
}
