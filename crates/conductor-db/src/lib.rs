//! Persistence layer for Conductor.
//!
//! Provides [`conductor_core::datastore::Datastore`] implementations backed by
//! PostgreSQL and by process memory.

pub mod error;
pub mod memory;
pub mod postgres;

pub use error::{DbError, DbResult};
pub use memory::MemoryDatastore;
pub use postgres::PgDatastore;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

/// Create a new database connection pool.
pub async fn create_pool(database_url: &str) -> DbResult<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await?;
    Ok(pool)
}

/// Run database migrations.
pub async fn run_migrations(pool: &PgPool) -> DbResult<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}
