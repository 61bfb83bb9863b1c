//! yt-dlp + ffmpeg media processor.
//!
//! Steps, with the progress each one reports:
//! - 5: probe the source (retried) and record what it is
//! - 5..70: download the best audio stream (retried, request shape escalates per attempt)
//! - 75: pick an output name
//! - 85: transcode or stream-copy to MP3 with ID3 tags
//! - 100: done

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use super::classify::classify;
use super::command::run_tool;
use super::validation::{sanitize_filename, unique_path};
use crate::config::ToolsConfig;
use crate::error::ProcessError;
use crate::jobs::Job;
use crate::retry::{RetryPolicy, run_with_retries};
use crate::worker::{Processor, ProgressReporter};

/// Share of the progress bar given to the download step.
const DOWNLOAD_SHARE: f64 = 70.0;

static DOWNLOAD_PERCENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\[download\]\s+(\d+(?:\.\d+)?)%").expect("valid regex"));

/// Request shape for one download attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptShape {
    pub format: &'static str,
    pub player_client: Option<&'static str>,
    pub geo_bypass: bool,
}

impl AttemptShape {
    /// Later attempts settle for lower quality and look like a different client.
    pub fn for_attempt(attempt: u32) -> Self {
        match attempt {
            0 => Self {
                format: "bestaudio/best",
                player_client: None,
                geo_bypass: false,
            },
            1 => Self {
                format: "bestaudio[ext=m4a]/bestaudio",
                player_client: Some("android"),
                geo_bypass: false,
            },
            _ => Self {
                format: "best",
                player_client: Some("web"),
                geo_bypass: true,
            },
        }
    }
}

/// Fetches with yt-dlp and encodes with ffmpeg into `output_dir`.
pub struct MediaProcessor {
    tools: ToolsConfig,
    output_dir: PathBuf,
    retry: RetryPolicy,
}

impl MediaProcessor {
    pub fn new(tools: ToolsConfig, output_dir: impl Into<PathBuf>, retry: RetryPolicy) -> Self {
        Self {
            tools,
            output_dir: output_dir.into(),
            retry,
        }
    }

    fn base_args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = [
            "--no-playlist",
            "--no-warnings",
            "--socket-timeout",
            "15",
            "--retries",
            "3",
        ]
        .into_iter()
        .map(OsString::from)
        .collect();

        if let Some(cookies) = self.tools.cookies_file.as_ref().filter(|p| p.is_file()) {
            args.push("--cookies".into());
            args.push(cookies.into());
        }
        args
    }

    async fn probe(&self, url: &str) -> Result<Value, ProcessError> {
        let mut args = self.base_args();
        args.extend(["--dump-single-json", "--skip-download"].map(OsString::from));
        args.push(url.into());

        let output = run_tool(&self.tools.ytdlp_bin, &args, |_| {}).await?;
        let info: Value = serde_json::from_str(&output.stdout)?;
        check_supported(&info)?;
        Ok(summarize(&info))
    }

    async fn download(
        &self,
        url: &str,
        scratch: &Path,
        attempt: u32,
        progress: &ProgressReporter,
    ) -> Result<PathBuf, ProcessError> {
        let shape = AttemptShape::for_attempt(attempt);
        debug!(job_id = %progress.job_id(), attempt, ?shape, "Starting download attempt");

        let mut args = self.base_args();
        args.extend(["--newline", "-f", shape.format, "-o"].map(OsString::from));
        args.push(scratch.join("source.%(ext)s").into());
        if let Some(client) = shape.player_client {
            args.push("--extractor-args".into());
            args.push(format!("youtube:player_client={client}").into());
        }
        if shape.geo_bypass {
            args.push("--geo-bypass".into());
        }
        args.push(url.into());

        run_tool(&self.tools.ytdlp_bin, &args, |line| {
            if let Some(percent) = parse_download_percent(line) {
                let value = (percent / 100.0 * DOWNLOAD_SHARE).round() as i64;
                progress.report(value, Some("downloading"));
            }
        })
        .await?;

        progress.report(DOWNLOAD_SHARE as i64, Some("download finished"));
        find_download(scratch).await
    }

    async fn encode(
        &self,
        source: &Path,
        target: &Path,
        bitrate_kbps: u32,
        tags: &[(&str, String)],
    ) -> Result<(), ProcessError> {
        let mut args: Vec<OsString> = ["-y", "-hide_banner", "-loglevel", "error", "-i"]
            .into_iter()
            .map(OsString::from)
            .collect();
        args.push(source.into());
        args.push("-vn".into());

        let is_mp3 = source
            .extension()
            .is_some_and(|e| e.eq_ignore_ascii_case("mp3"));
        if is_mp3 {
            args.extend(["-c:a", "copy"].map(OsString::from));
        } else {
            args.extend(["-ar", "44100", "-ac", "2", "-b:a"].map(OsString::from));
            args.push(format!("{bitrate_kbps}k").into());
        }

        for (key, value) in tags {
            args.push("-metadata".into());
            args.push(format!("{key}={value}").into());
        }
        args.extend(["-id3v2_version", "3", "-f", "mp3"].map(OsString::from));
        args.push(target.into());

        run_tool(&self.tools.ffmpeg_bin, &args, |_| {}).await?;
        Ok(())
    }
}

#[async_trait]
impl Processor for MediaProcessor {
    async fn process(
        &self,
        job: &Job,
        progress: ProgressReporter,
    ) -> Result<PathBuf, ProcessError> {
        progress.report(5, Some("preparing download"));

        tokio::fs::create_dir_all(&self.output_dir).await?;
        let scratch = tempfile::Builder::new()
            .prefix(&format!("{}_", job.id))
            .tempdir_in(&self.output_dir)?;

        let info = run_with_retries(&self.retry, |_| self.probe(&job.source), classify).await?;
        progress.record_info(info.clone());

        let downloaded = run_with_retries(
            &self.retry,
            |attempt| self.download(&job.source, scratch.path(), attempt, &progress),
            classify,
        )
        .await?;

        progress.report(75, Some("analyzing media"));
        let tags = resolve_tags(job, &info);
        let stem = tags
            .iter()
            .find(|(key, _)| *key == "title")
            .map(|(_, title)| sanitize_filename(title))
            .unwrap_or_else(|| format!("audio-{}", job.id));
        let target = unique_path(&self.output_dir.join(format!("{stem}.mp3"))).await?;

        progress.report(85, Some("converting to mp3"));
        // Encode inside the scratch dir, then move over the reserved name.
        let encoded = scratch.path().join("output.mp3");
        let finished = match self
            .encode(&downloaded, &encoded, job.options.bitrate_kbps, &tags)
            .await
        {
            Ok(()) => tokio::fs::rename(&encoded, &target)
                .await
                .map_err(ProcessError::from),
            Err(e) => Err(e),
        };
        if let Err(e) = finished {
            if let Err(cleanup) = tokio::fs::remove_file(&target).await {
                warn!(path = %target.display(), error = %cleanup, "Failed to release reserved output name");
            }
            return Err(e);
        }

        info!(job_id = %job.id, artifact = %target.display(), "Media processed");
        progress.report(100, Some("completed"));
        Ok(target)
    }
}

/// `[download]  42.5% of ...` → 42.5
pub fn parse_download_percent(line: &str) -> Option<f64> {
    DOWNLOAD_PERCENT
        .captures(line.trim_start())
        .and_then(|c| c[1].parse::<f64>().ok())
        .map(|p| p.clamp(0.0, 100.0))
}

/// Reject sources that no retry can fetch.
pub fn check_supported(info: &Value) -> Result<(), ProcessError> {
    let live_status = info.get("live_status").and_then(Value::as_str);
    if info.get("is_live").and_then(Value::as_bool) == Some(true)
        || matches!(live_status, Some("is_live" | "is_upcoming"))
    {
        return Err(ProcessError::Permanent(
            "live streams are not supported".to_string(),
        ));
    }
    if info.get("drm").and_then(Value::as_bool) == Some(true)
        || info.get("has_drm").and_then(Value::as_bool) == Some(true)
    {
        return Err(ProcessError::Permanent("media is DRM protected".to_string()));
    }

    let has_audio = |v: &Value| {
        v.get("acodec")
            .and_then(Value::as_str)
            .is_some_and(|codec| codec != "none")
    };
    let any_format_has_audio = info
        .get("formats")
        .and_then(Value::as_array)
        .is_some_and(|formats| formats.iter().any(has_audio));
    if !has_audio(info) && !any_format_has_audio {
        return Err(ProcessError::Permanent("no audio track found".to_string()));
    }

    Ok(())
}

/// The subset of probe output worth keeping on the job.
pub fn summarize(info: &Value) -> Value {
    json!({
        "id": info.get("id"),
        "title": info.get("title"),
        "uploader": info.get("uploader"),
        "duration": info.get("duration"),
        "ext": info.get("ext"),
    })
}

/// ID3 tags: client overrides win, probe info fills the gaps.
pub fn resolve_tags(job: &Job, info: &Value) -> Vec<(&'static str, String)> {
    let probed = |key: &str| {
        info.get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };

    let mut tags = Vec::new();
    if let Some(title) = job.options.tag("title").map(str::to_string).or_else(|| probed("title")) {
        tags.push(("title", title));
    }
    if let Some(artist) = job
        .options
        .tag("artist")
        .map(str::to_string)
        .or_else(|| probed("uploader"))
    {
        tags.push(("artist", artist));
    }
    if let Some(album) = job.options.tag("album") {
        tags.push(("album", album.to_string()));
    }
    tags
}

/// The finished `source.<ext>` file in the scratch directory.
async fn find_download(scratch: &Path) -> Result<PathBuf, ProcessError> {
    let mut entries = tokio::fs::read_dir(scratch).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with("source.") && !name.ends_with(".part") && !name.ends_with(".ytdl") {
            return Ok(entry.path());
        }
    }
    Err(ProcessError::MissingOutput(scratch.join("source.*")))
}
