use thiserror::Error;

pub mod database;
mod store;

pub use store::*;

pub const APP_DIR_NAME: &str = "trip_logger";
pub const DB_FILE_NAME: &str = "trips.db";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),
    #[error("trip {0} not found")]
    NotFound(i64),
    #[error("storage quota exceeded: {0}")]
    QuotaExceeded(String),
}

impl StoreError {
    /// SQLITE_FULL means the disk or quota ran out; everything else is a
    /// plain database failure.
    pub(crate) fn from_sqlx(context: &str, err: sqlx::Error) -> Self {
        if let Some(db_err) = err.as_database_error() {
            if db_err.code().as_deref() == Some("13") {
                return StoreError::QuotaExceeded(format!("{context}: {db_err}"));
            }
        }
        StoreError::Database(format!("{context}: {err}"))
    }
}
