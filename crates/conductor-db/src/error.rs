//! Database error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("duplicate: {0}")]
    Duplicate(String),

    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

pub type DbResult<T> = std::result::Result<T, DbError>;

impl From<DbError> for conductor_core::Error {
    fn from(err: DbError) -> Self {
        match err {
            DbError::Duplicate(msg) => conductor_core::Error::Conflict(msg),
            DbError::InvalidData(msg) => conductor_core::Error::Internal(msg),
            DbError::Database(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                conductor_core::Error::Conflict(db.message().to_string())
            }
            other => conductor_core::Error::Database(other.to_string()),
        }
    }
}
