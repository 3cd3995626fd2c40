//! Core domain types and traits for the Conductor CI scheduler.
//!
//! This crate contains:
//! - Resource identifiers and common types
//! - Commits, tasks and repository slugs
//! - Check-run and build types with their backend traits
//! - The datastore and configuration-fetch traits
//! - Decoded webhook event payloads

pub mod builds;
pub mod checks;
pub mod commit;
pub mod datastore;
pub mod error;
pub mod events;
pub mod fetch;
pub mod id;

pub use commit::{Commit, CommitEvent, CommitKey, RepositorySlug, Task, TaskStatus};
pub use error::{Error, Result};
pub use id::TaskId;
