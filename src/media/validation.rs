//! Input validation and output naming helpers.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use tokio::fs::OpenOptions;
use url::Url;

use crate::error::ValidationError;
use crate::jobs::DEFAULT_BITRATE_KBPS;

/// Longest URL accepted on submission.
pub const MAX_URL_LEN: usize = 2048;

/// MP3 bitrates a client may ask for.
pub const ALLOWED_BITRATES: [u32; 4] = [128, 192, 256, 320];

/// Streaming services whose content we refuse to fetch.
pub const BLOCKED_DOMAINS: [&str; 7] = [
    "spotify.com",
    "music.apple.com",
    "deezer.com",
    "tidal.com",
    "amazon.com",
    "amazon.co",
    "soundcloud.com",
];

const MAX_FILENAME_CHARS: usize = 120;

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));
static UNSAFE_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\w\- .,()\[\]]").expect("valid regex"));

/// Trim and check a submitted URL; returns the cleaned string.
pub fn validate_url(raw: &str) -> Result<String, ValidationError> {
    let cleaned = raw.trim();
    if cleaned.is_empty() {
        return Err(ValidationError::EmptyUrl);
    }
    if cleaned.len() > MAX_URL_LEN {
        return Err(ValidationError::UrlTooLong {
            length: cleaned.len(),
            max: MAX_URL_LEN,
        });
    }

    let parsed = Url::parse(cleaned).map_err(|_| ValidationError::UnsupportedScheme)?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ValidationError::UnsupportedScheme);
    }

    let host = parsed.host_str().unwrap_or_default().to_ascii_lowercase();
    if is_blocked(&host) {
        return Err(ValidationError::BlockedDomain { host });
    }

    Ok(cleaned.to_string())
}

fn is_blocked(host: &str) -> bool {
    BLOCKED_DOMAINS
        .iter()
        .any(|domain| host == *domain || host.ends_with(&format!(".{domain}")))
}

/// Default to 192 kbps; anything outside [`ALLOWED_BITRATES`] is rejected.
pub fn validate_bitrate(requested: Option<u32>) -> Result<u32, ValidationError> {
    let bitrate = requested.unwrap_or(DEFAULT_BITRATE_KBPS);
    if ALLOWED_BITRATES.contains(&bitrate) {
        Ok(bitrate)
    } else {
        Err(ValidationError::UnsupportedBitrate(bitrate))
    }
}

/// Make a title safe to use as a file stem.
pub fn sanitize_filename(value: &str) -> String {
    let collapsed = WHITESPACE.replace_all(value.trim(), " ");
    let slashless = collapsed.replace('/', "-");
    let cleaned = UNSAFE_CHARS.replace_all(&slashless, "");
    let truncated: String = cleaned.chars().take(MAX_FILENAME_CHARS).collect();
    let trimmed = truncated.trim();
    if trimmed.is_empty() {
        "audio".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Reserve the first free name among `path`, `stem-1.ext`, `stem-2.ext`, ...
///
/// The name is claimed by creating an empty file with `create_new`, so two
/// callers racing for the same stem always end up with different paths.
pub async fn unique_path(path: &Path) -> io::Result<PathBuf> {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = path.extension().map(|e| e.to_string_lossy().into_owned());

    let mut candidate = path.to_path_buf();
    let mut counter = 1u32;
    loop {
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&candidate)
            .await
        {
            Ok(_) => return Ok(candidate),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
            Err(e) => return Err(e),
        }
        let name = match &extension {
            Some(ext) => format!("{stem}-{counter}.{ext}"),
            None => format!("{stem}-{counter}"),
        };
        candidate = path.with_file_name(name);
        counter += 1;
    }
}
