//! Media Jobs: asynchronous fetch-and-transcode job service.

pub mod api;
pub mod config;
pub mod error;
pub mod jobs;
pub mod logging;
pub mod media;
pub mod rate_limit;
pub mod retry;
pub mod service;
pub mod sweeper;
pub mod worker;

pub use error::{Error, Result};
