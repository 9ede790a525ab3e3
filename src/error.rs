//! Error types shared by every helper in the crate.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Boxed error produced by a transaction backend.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Convenience alias; the error parameter can be overridden by callers that
/// thread their own error type through [`crate::flat_transaction`].
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid argument: `{name}` must be a positive integer")]
    InvalidArgument { name: &'static str },

    #[error("row too wide for backend: {columns} bound parameters per row exceed the variable limit of {limit}")]
    RowTooWide { columns: usize, limit: usize },

    #[error("row {index} has {found} values but {expected} columns were given")]
    RowShape {
        index: usize,
        expected: usize,
        found: usize,
    },

    #[error("failed to begin transaction")]
    Begin(#[source] BoxError),

    /// The commit did not go through; the transaction must not be assumed
    /// committed.
    #[error("failed to commit transaction")]
    Commit(#[source] BoxError),

    /// The commit failed and so did the rollback issued after it; the
    /// connection may still be inside the transaction.
    #[error("failed to commit transaction, and the rollback that followed failed: {rollback}")]
    CommitRollback {
        #[source]
        source: BoxError,
        rollback: BoxError,
    },

    /// Rolling back failed while handling a failure of the guarded work.
    /// `source` is the rollback error, `work` the rendered work error.
    #[error("failed to roll back transaction after work failed: {work}")]
    Rollback {
        #[source]
        source: BoxError,
        work: String,
    },

    #[error("invalid pragma `{name}` = `{value}`")]
    InvalidPragma { name: String, value: String },

    #[error("path `{}` is not under `{}`", .path.display(), .root.display())]
    PathOutsideRoot { path: PathBuf, root: PathBuf },

    #[error("path `{}` is not valid UTF-8", .0.display())]
    NonUtf8Path(PathBuf),

    #[error("failed to encode value as JSON")]
    JsonEncode(#[source] serde_json::Error),

    /// A value read back from the database could not be decoded.
    #[error("integrity error: {0}")]
    Integrity(String),

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}

/// Failure of a guarded unit of work that keeps the work's own error type.
///
/// Returned by [`crate::try_flat_transaction`] and friends;
/// [`TransactionError::flatten`] folds it into the caller's error type the
/// way [`crate::flat_transaction`] does.
#[derive(Debug, Error)]
pub enum TransactionError<E> {
    /// The work failed and, when this call owned the transaction, it was
    /// rolled back.
    #[error("{0}")]
    Work(E),

    #[error(transparent)]
    Guard(#[from] Error),

    /// The work failed and rolling back failed as well.
    #[error("failed to roll back transaction after work failed: {work}")]
    Rollback {
        work: E,
        #[source]
        rollback: BoxError,
    },
}

impl<E> TransactionError<E> {
    /// The work's own error, if the work failed.
    pub fn work(&self) -> Option<&E> {
        match self {
            TransactionError::Work(work) | TransactionError::Rollback { work, .. } => Some(work),
            TransactionError::Guard(_) => None,
        }
    }
}

impl<E: From<Error> + fmt::Display> TransactionError<E> {
    /// Work errors come back unchanged; guard failures go through
    /// `E: From<Error>`. A failed rollback keeps the work error's message in
    /// [`Error::Rollback`].
    pub fn flatten(self) -> E {
        match self {
            TransactionError::Work(work) => work,
            TransactionError::Guard(err) => err.into(),
            TransactionError::Rollback { work, rollback } => Error::Rollback {
                source: rollback,
                work: work.to_string(),
            }
            .into(),
        }
    }
}

impl Error {
    /// Returns the rendered work error when this is a failed rollback.
    pub fn work_error(&self) -> Option<&str> {
        match self {
            Error::Rollback { work, .. } => Some(work.as_str()),
            _ => None,
        }
    }
}
