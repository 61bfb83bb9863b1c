//! Worker system: bounded job execution.
//!
//! Core components:
//! - `processor`: the `Processor` plug-in trait and the `ProgressReporter` handed to it
//! - `scheduler`: fixed worker pool draining the job queue, status transitions

pub mod processor;
pub mod scheduler;

pub use processor::{Processor, ProgressReporter};
pub use scheduler::Scheduler;
