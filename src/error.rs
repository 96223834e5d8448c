// Error taxonomy for the warehouse core.
// Quality violations and key-resolution misses never surface here; they are
// repaired or defaulted in place. Only persistence failures and bad
// configuration become errors.

use crate::loader::{LoadStage, RunRecord};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Constraint violation while writing {table} ({stage}): {detail}")]
    ConstraintViolation {
        stage: LoadStage,
        table: String,
        detail: String,
    },

    #[error("Too many default-substituted keys: {substituted} of {total} fact rows (limit {limit:.2})")]
    TooManyDefaults {
        substituted: usize,
        total: usize,
        limit: f64,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Primary key column '{0}' is absent from the batch")]
    MissingPrimaryKey(String),

    #[error("File system error: {0}")]
    Io(#[from] std::io::Error),
}

impl LoadError {
    /// Turn constraint failures into `ConstraintViolation`, keep everything else as-is
    pub fn from_write(err: rusqlite::Error, stage: LoadStage, table: &str) -> Self {
        match err {
            rusqlite::Error::SqliteFailure(failure, msg)
                if failure.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                LoadError::ConstraintViolation {
                    stage,
                    table: table.to_string(),
                    detail: msg.unwrap_or_else(|| failure.to_string()),
                }
            }
            other => LoadError::Sqlite(other),
        }
    }

    pub fn is_constraint_violation(&self) -> bool {
        matches!(self, LoadError::ConstraintViolation { .. })
    }
}

/// A failed run: the rolled-back outcome record together with what broke it
#[derive(Error, Debug)]
#[error("warehouse load failed: {error}")]
pub struct LoadFailure {
    pub record: RunRecord,
    #[source]
    pub error: LoadError,
}
