use thiserror::Error;

use crate::types::TaskStatus;

/// Errors surfaced by the entity store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An insert collided with a uniqueness constraint.
    #[error("{entity} already exists: {detail}")]
    AlreadyExists { entity: &'static str, detail: String },

    /// A lookup or patch matched no row.
    #[error("{entity} not found: {detail}")]
    NotFound { entity: &'static str, detail: String },

    /// A task status change outside the allowed lifecycle.
    #[error("invalid task status transition: {from} -> {to}")]
    InvalidTransition { from: TaskStatus, to: TaskStatus },

    /// The request was rejected before touching the database.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Underlying SQLite failure.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    pub fn is_already_exists(&self) -> bool {
        matches!(self, StoreError::AlreadyExists { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    pub(crate) fn not_found(entity: &'static str, detail: impl Into<String>) -> Self {
        StoreError::NotFound {
            entity,
            detail: detail.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Translate an insert failure, turning UNIQUE / PRIMARY KEY violations into
/// [`StoreError::AlreadyExists`].
pub(crate) fn map_insert_error(
    err: rusqlite::Error,
    entity: &'static str,
    detail: impl FnOnce() -> String,
) -> StoreError {
    if is_unique_violation(&err) {
        StoreError::AlreadyExists {
            entity,
            detail: detail(),
        }
    } else {
        StoreError::Database(err)
    }
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(e, _) => {
            e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                || e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
        }
        _ => false,
    }
}
