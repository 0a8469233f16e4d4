pub mod memory;
pub mod postgres;

pub use memory::MemoryRunStore;
pub use postgres::PgRunStore;

use thiserror::Error;

use threadpress_common::PipelineError;

/// Locks older than this are treated as left behind by a killed process.
pub const STALE_LOCK_MINUTES: i64 = 30;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Invalid stored value: {0}")]
    Invalid(String),
}

impl From<StoreError> for PipelineError {
    fn from(err: StoreError) -> Self {
        PipelineError::Store(err.to_string())
    }
}
