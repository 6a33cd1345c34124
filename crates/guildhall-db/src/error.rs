use rusqlite::ErrorCode;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    /// The database stayed locked past the busy timeout.
    #[error("Store busy: {0}")]
    Busy(String),

    #[error("Database error: {0}")]
    Sqlite(rusqlite::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl StoreError {
    /// Transient failures may be retried: blindly for reads, only after
    /// re-reading current state for transitions.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Busy(_))
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        match &e {
            rusqlite::Error::SqliteFailure(err, _)
                if matches!(err.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) =>
            {
                Self::Busy(e.to_string())
            }
            _ => Self::Sqlite(e),
        }
    }
}

/// True when `e` is a UNIQUE or CHECK failure. Foreign-key failures mean a
/// missing referent, not a clash, and are left out.
pub(crate) fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == ErrorCode::ConstraintViolation
                && err.extended_code != rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY
    )
}

/// Map a constraint failure on insert to `Conflict`, anything else through
/// the usual conversion.
pub(crate) fn conflict_on_constraint(e: rusqlite::Error, what: &str) -> StoreError {
    if is_constraint_violation(&e) {
        StoreError::Conflict(what.to_string())
    } else {
        e.into()
    }
}
