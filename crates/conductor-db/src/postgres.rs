//! PostgreSQL datastore.

use async_trait::async_trait;
use conductor_core::datastore::Datastore;
use conductor_core::{Commit, CommitKey, RepositorySlug, Result, Task, TaskId, TaskStatus};
use sqlx::PgPool;
use tracing::debug;
use uuid::Uuid;

use crate::{DbError, DbResult};

/// Database row for commits.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CommitRow {
    pub repository: String,
    pub branch: String,
    pub sha: String,
    pub author: String,
    pub author_avatar_url: String,
    pub message: String,
    pub timestamp_ms: i64,
}

impl TryFrom<CommitRow> for Commit {
    type Error = DbError;

    fn try_from(row: CommitRow) -> std::result::Result<Self, Self::Error> {
        let repository: RepositorySlug = row
            .repository
            .parse()
            .map_err(|e: conductor_core::Error| DbError::InvalidData(e.to_string()))?;

        Ok(Commit {
            repository,
            branch: row.branch,
            sha: row.sha,
            author: row.author,
            author_avatar_url: row.author_avatar_url,
            message: row.message,
            timestamp: row.timestamp_ms,
        })
    }
}

/// Database row for tasks.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TaskRow {
    pub id: Uuid,
    pub repository: String,
    pub branch: String,
    pub sha: String,
    pub name: String,
    pub builder_name: String,
    pub create_timestamp: i64,
    pub status: String,
    pub attempts: i32,
    pub bringup: bool,
}

impl TryFrom<TaskRow> for Task {
    type Error = DbError;

    fn try_from(row: TaskRow) -> std::result::Result<Self, Self::Error> {
        let repository: RepositorySlug = row
            .repository
            .parse()
            .map_err(|e: conductor_core::Error| DbError::InvalidData(e.to_string()))?;
        let status: TaskStatus = row.status.parse().map_err(DbError::InvalidData)?;
        let attempts = u32::try_from(row.attempts)
            .map_err(|_| DbError::InvalidData(format!("negative attempts on task {}", row.id)))?;

        Ok(Task {
            id: TaskId::from(row.id),
            commit: CommitKey {
                repository,
                branch: row.branch,
                sha: row.sha,
            },
            name: row.name,
            builder_name: row.builder_name,
            create_timestamp: row.create_timestamp,
            status,
            attempts,
            bringup: row.bringup,
        })
    }
}

/// PostgreSQL implementation.
pub struct PgDatastore {
    pool: PgPool,
}

impl PgDatastore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn insert(&self, commit: &Commit, tasks: &[Task]) -> DbResult<()> {
        let key = commit.key();
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO commits (
                repository, branch, sha, author, author_avatar_url, message, timestamp_ms
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (repository, branch, sha) DO NOTHING
            "#,
        )
        .bind(commit.repository.full_name())
        .bind(&commit.branch)
        .bind(&commit.sha)
        .bind(&commit.author)
        .bind(&commit.author_avatar_url)
        .bind(&commit.message)
        .bind(commit.timestamp)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if inserted == 0 {
            // Dropping the transaction rolls it back.
            return Err(DbError::Duplicate(format!("commit {} already exists", key)));
        }

        for task in tasks {
            if task.commit != key {
                return Err(DbError::InvalidData(format!(
                    "task {} does not belong to commit {}",
                    task.id, key
                )));
            }

            sqlx::query(
                r#"
                INSERT INTO tasks (
                    id, repository, branch, sha, name, builder_name,
                    create_timestamp, status, attempts, bringup
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                "#,
            )
            .bind(task.id.as_uuid())
            .bind(commit.repository.full_name())
            .bind(&commit.branch)
            .bind(&commit.sha)
            .bind(&task.name)
            .bind(&task.builder_name)
            .bind(task.create_timestamp)
            .bind(task.status.as_str())
            .bind(i32::try_from(task.attempts).unwrap_or(i32::MAX))
            .bind(task.bringup)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        debug!(commit = %key, tasks = tasks.len(), "Inserted commit");
        Ok(())
    }

    async fn lookup(&self, key: &CommitKey) -> DbResult<Option<Commit>> {
        let row = sqlx::query_as::<_, CommitRow>(
            "SELECT * FROM commits WHERE repository = $1 AND branch = $2 AND sha = $3",
        )
        .bind(key.repository.full_name())
        .bind(&key.branch)
        .bind(&key.sha)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| r.try_into()).transpose()
    }

    async fn tasks(&self, key: &CommitKey) -> DbResult<Vec<Task>> {
        let rows = sqlx::query_as::<_, TaskRow>(
            r#"
            SELECT * FROM tasks
            WHERE repository = $1 AND branch = $2 AND sha = $3
            ORDER BY id
            "#,
        )
        .bind(key.repository.full_name())
        .bind(&key.branch)
        .bind(&key.sha)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Task::try_from).collect()
    }
}

#[async_trait]
impl Datastore for PgDatastore {
    async fn lookup_commit(&self, key: &CommitKey) -> Result<Option<Commit>> {
        Ok(self.lookup(key).await?)
    }

    async fn insert_commit(&self, commit: &Commit, tasks: &[Task]) -> Result<()> {
        Ok(self.insert(commit, tasks).await?)
    }

    async fn tasks_for_commit(&self, key: &CommitKey) -> Result<Vec<Task>> {
        Ok(self.tasks(key).await?)
    }
}
