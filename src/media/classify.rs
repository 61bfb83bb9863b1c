//! Sorting yt-dlp / ffmpeg failures into retryable and final.

use std::io::ErrorKind;

use crate::error::ProcessError;
use crate::retry::ErrorClass;

/// Fragments of tool output that mean the content itself is unreachable.
const PERMANENT_MARKERS: &[&str] = &[
    "private video",
    "video is private",
    "this playlist is private",
    "video unavailable",
    "this video is unavailable",
    "has been removed",
    "account associated with this video has been terminated",
    "members-only",
    "join this channel",
    "sign in to confirm your age",
    "age-restricted",
    "age restricted",
    "drm protected",
    "drm-protected",
    "this live event",
    "live streams are not supported",
    "premieres in",
    "copyright",
    "unsupported url",
    "http error 404",
    "does not exist",
    "no audio track",
];

/// Classify free-form tool output.
pub fn classify_message(text: &str) -> ErrorClass {
    let lower = text.to_lowercase();
    if PERMANENT_MARKERS.iter().any(|m| lower.contains(m)) {
        ErrorClass::Permanent
    } else {
        ErrorClass::Transient
    }
}

/// Classifier handed to the retry orchestrator for media steps.
pub fn classify(err: &ProcessError) -> ErrorClass {
    match err {
        ProcessError::ToolFailed { stderr, .. } => classify_message(stderr),
        // A missing binary or unwritable directory won't fix itself.
        ProcessError::Io(e)
            if matches!(e.kind(), ErrorKind::NotFound | ErrorKind::PermissionDenied) =>
        {
            ErrorClass::Permanent
        }
        other => other.class(),
    }
}
