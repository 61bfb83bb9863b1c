//! Configuration types.

use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;
use crate::retry::RetryPolicy;

/// Worker pool configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerConfig {
    /// Number of workers, i.e. the maximum number of jobs running at once.
    pub concurrency: usize,
    /// Per-job deadline; `None` lets a job run forever.
    pub job_timeout: Option<Duration>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            concurrency: 2,
            job_timeout: None,
        }
    }
}

/// Admission rate limit, per client.
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitConfig {
    pub window: Duration,
    pub max_requests: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(10 * 60),
            max_requests: 5,
        }
    }
}

/// Artifact cleanup.
#[derive(Debug, Clone, PartialEq)]
pub struct CleanupConfig {
    /// Files older than this are deleted.
    pub ttl: Duration,
    /// Time between sweeps.
    pub interval: Duration,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(24 * 3600),
            interval: Duration::from_secs(30 * 60),
        }
    }
}

/// External binaries used by the media processor.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolsConfig {
    pub ytdlp_bin: PathBuf,
    pub ffmpeg_bin: PathBuf,
    /// Netscape cookie file passed to yt-dlp when it exists.
    pub cookies_file: Option<PathBuf>,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            ytdlp_bin: PathBuf::from("yt-dlp"),
            ffmpeg_bin: PathBuf::from("ffmpeg"),
            cookies_file: None,
        }
    }
}

/// Service configuration, built from environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceConfig {
    pub port: u16,
    /// Where finished artifacts (and per-job temp dirs) live.
    pub data_dir: PathBuf,
    pub scheduler: SchedulerConfig,
    pub rate_limit: RateLimitConfig,
    pub cleanup: CleanupConfig,
    pub retry: RetryPolicy,
    pub cors_origins: Vec<String>,
    pub tools: ToolsConfig,
    /// Enables a daily rolling log file when set.
    pub log_dir: Option<PathBuf>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            port: 8000,
            data_dir: PathBuf::from("./data/output"),
            scheduler: SchedulerConfig::default(),
            rate_limit: RateLimitConfig::default(),
            cleanup: CleanupConfig::default(),
            retry: RetryPolicy::default(),
            cors_origins: vec!["http://localhost:5173".to_string()],
            tools: ToolsConfig::default(),
            log_dir: None,
        }
    }
}

impl ServiceConfig {
    /// Build config from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from any key/value source; unset keys fall back to defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let port = parse(&var, "PORT", defaults.port)?;
        let data_dir = var("DATA_DIR").map(PathBuf::from).unwrap_or(defaults.data_dir);

        let concurrency: usize = parse(&var, "CONCURRENCY", defaults.scheduler.concurrency)?;
        let job_timeout_secs: u64 = parse(&var, "JOB_TIMEOUT_SECS", 0)?;

        let window_secs: u64 = parse(&var, "RATE_LIMIT_WINDOW", defaults.rate_limit.window.as_secs())?;
        let max_requests: usize = parse(&var, "RATE_LIMIT_MAX", defaults.rate_limit.max_requests)?;

        let ttl_hours: u64 = parse(&var, "CLEANUP_TTL_HOURS", defaults.cleanup.ttl.as_secs() / 3600)?;
        let interval_secs: u64 = parse(
            &var,
            "CLEANUP_INTERVAL_SECS",
            defaults.cleanup.interval.as_secs(),
        )?;

        let retry_defaults = RetryPolicy::default();
        let retry = RetryPolicy {
            max_attempts: parse(&var, "RETRY_MAX_ATTEMPTS", retry_defaults.max_attempts)?,
            base_delay: Duration::from_millis(parse(
                &var,
                "RETRY_BASE_MS",
                millis(retry_defaults.base_delay),
            )?),
            max_delay: Duration::from_millis(parse(
                &var,
                "RETRY_MAX_MS",
                millis(retry_defaults.max_delay),
            )?),
            jitter: Duration::from_millis(parse(
                &var,
                "RETRY_JITTER_MS",
                millis(retry_defaults.jitter),
            )?),
            ..retry_defaults
        };

        let cors_origins = match var("CORS_ORIGINS") {
            Some(raw) => raw
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            None => defaults.cors_origins,
        };

        let tools = ToolsConfig {
            ytdlp_bin: var("YTDLP_BIN")
                .map(PathBuf::from)
                .unwrap_or(defaults.tools.ytdlp_bin),
            ffmpeg_bin: var("FFMPEG_BIN")
                .map(PathBuf::from)
                .unwrap_or(defaults.tools.ffmpeg_bin),
            cookies_file: var("COOKIES_TXT").map(PathBuf::from),
        };

        Ok(Self {
            port,
            data_dir,
            scheduler: SchedulerConfig {
                concurrency: concurrency.max(1),
                job_timeout: (job_timeout_secs > 0).then(|| Duration::from_secs(job_timeout_secs)),
            },
            rate_limit: RateLimitConfig {
                window: Duration::from_secs(window_secs),
                max_requests: max_requests.max(1),
            },
            cleanup: CleanupConfig {
                ttl: Duration::from_secs(ttl_hours.saturating_mul(3600)),
                interval: Duration::from_secs(interval_secs.max(1)),
            },
            retry,
            cors_origins,
            tools,
            log_dir: var("LOG_DIR").map(PathBuf::from),
        })
    }
}

fn parse<T, F>(var: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
    F: Fn(&str) -> Option<String>,
{
    match var(key) {
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("{raw:?}: {e}"),
        }),
        None => Ok(default),
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
