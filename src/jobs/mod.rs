//! Job records and the registry that owns them.
//!
//! - `model`: `Job`, its status state machine (Queued → InProgress → Done/Error), partial updates
//! - `registry`: `JobRegistry`, the mutex-guarded map every component shares

pub mod model;
pub mod registry;

pub use model::{DEFAULT_BITRATE_KBPS, Job, JobOptions, JobStatus, JobSummary, JobUpdate};
pub use registry::JobRegistry;
