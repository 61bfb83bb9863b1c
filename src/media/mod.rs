//! Media fetching and encoding built on external tools.
//!
//! - `validation`: URL/bitrate checks and output naming
//! - `command`: spawning yt-dlp/ffmpeg with streamed output
//! - `classify`: transient vs permanent tool failures
//! - `processor`: the `MediaProcessor` the scheduler runs

pub mod classify;
pub mod command;
pub mod processor;
pub mod validation;

pub use classify::classify;
pub use processor::MediaProcessor;
pub use validation::{sanitize_filename, validate_bitrate, validate_url};
