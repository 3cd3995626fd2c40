//! Persistence trait for commits and their postsubmit tasks.

use async_trait::async_trait;

use crate::{Commit, CommitKey, Result, Task};

/// Transactional storage for [`Commit`] and [`Task`] records.
///
/// Implementations must make [`Datastore::insert_commit`] atomic: either the
/// commit and every task are stored, or nothing is. Concurrent inserts of the
/// same [`CommitKey`] must leave exactly one winner; every other caller gets
/// [`crate::Error::Conflict`].
#[async_trait]
pub trait Datastore: Send + Sync {
    async fn lookup_commit(&self, key: &CommitKey) -> Result<Option<Commit>>;

    /// Insert a new commit together with its tasks.
    async fn insert_commit(&self, commit: &Commit, tasks: &[Task]) -> Result<()>;

    async fn tasks_for_commit(&self, key: &CommitKey) -> Result<Vec<Task>>;
}
