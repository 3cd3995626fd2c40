//! Scheduling core for Conductor.
//!
//! Turns source-control events into persisted postsubmit tasks, presubmit
//! builds with their check runs, and selective retries of failed targets.

pub mod ingest;
pub mod presubmit;
pub mod resolver;
pub mod retry;
pub mod scheduler;

#[cfg(test)]
mod fakes;

pub use presubmit::PresubmitOutcome;
pub use resolver::ConfigResolver;
pub use scheduler::{ScheduledTarget, Scheduler};
