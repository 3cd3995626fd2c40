//! In-memory datastore.

use async_trait::async_trait;
use conductor_core::datastore::Datastore;
use conductor_core::{Commit, CommitKey, Error, Result, Task};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Default)]
struct Tables {
    commits: HashMap<CommitKey, Commit>,
    tasks: HashMap<CommitKey, Vec<Task>>,
}

/// Datastore kept in process memory.
///
/// A single lock guards both tables, so a commit and its tasks become visible
/// together.
#[derive(Debug, Default)]
pub struct MemoryDatastore {
    tables: Mutex<Tables>,
}

impl MemoryDatastore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>> {
        self.tables
            .lock()
            .map_err(|_| Error::Internal("datastore lock poisoned".to_string()))
    }

    /// Number of stored commits.
    pub fn commit_count(&self) -> Result<usize> {
        Ok(self.lock()?.commits.len())
    }

    /// Number of stored tasks across all commits.
    pub fn task_count(&self) -> Result<usize> {
        Ok(self.lock()?.tasks.values().map(Vec::len).sum())
    }
}

#[async_trait]
impl Datastore for MemoryDatastore {
    async fn lookup_commit(&self, key: &CommitKey) -> Result<Option<Commit>> {
        Ok(self.lock()?.commits.get(key).cloned())
    }

    async fn insert_commit(&self, commit: &Commit, tasks: &[Task]) -> Result<()> {
        let key = commit.key();
        if tasks.iter().any(|t| t.commit != key) {
            return Err(Error::InvalidInput(format!(
                "task does not belong to commit {}",
                key
            )));
        }

        let mut tables = self.lock()?;
        if tables.commits.contains_key(&key) {
            return Err(Error::Conflict(format!("commit {} already exists", key)));
        }
        tables.commits.insert(key.clone(), commit.clone());
        tables.tasks.insert(key, tasks.to_vec());
        Ok(())
    }

    async fn tasks_for_commit(&self, key: &CommitKey) -> Result<Vec<Task>> {
        Ok(self.lock()?.tasks.get(key).cloned().unwrap_or_default())
    }
}
