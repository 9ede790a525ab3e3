//! Flattened transactions.
//!
//! Code that needs transactional semantics is often reachable both directly
//! and from other transactional code. Wrapping it with [`flat_transaction`]
//! opens a transaction only when the connection is not already inside one;
//! otherwise the work joins the enclosing transaction and the outermost
//! caller alone decides between commit and rollback.
//!
//! ```no_run
//! use rusqlite::Connection;
//! use sqlite_plus::{flat_transaction, Error};
//!
//! fn add_tag(conn: &Connection, tag: &str) -> Result<(), Error> {
//!     flat_transaction(conn, |conn| {
//!         conn.execute("INSERT INTO tags (name) VALUES (?1)", [tag])?;
//!         Ok(())
//!     })
//! }
//!
//! fn add_tags(conn: &Connection, tags: &[&str]) -> Result<(), Error> {
//!     // one BEGIN and one COMMIT, however many tags there are
//!     flat_transaction(conn, |conn| tags.iter().try_for_each(|tag| add_tag(conn, tag)))
//! }
//! ```

use std::cell::Cell;
use std::fmt;

use rusqlite::Connection;
use tracing::{debug, error, trace, warn};

use crate::error::{Error, TransactionError};

/// Transaction control of a database connection.
///
/// `in_transaction` must report transactions opened by anyone on the
/// connection, not just the ones opened through this trait.
pub trait TransactionBackend {
    type Error: std::error::Error + Send + Sync + 'static;

    fn in_transaction(&self) -> bool;

    fn begin(&self) -> Result<(), Self::Error>;

    fn commit(&self) -> Result<(), Self::Error>;

    fn rollback(&self) -> Result<(), Self::Error>;
}

impl TransactionBackend for Connection {
    type Error = rusqlite::Error;

    fn in_transaction(&self) -> bool {
        !self.is_autocommit()
    }

    fn begin(&self) -> Result<(), Self::Error> {
        self.execute_batch("BEGIN")
    }

    fn commit(&self) -> Result<(), Self::Error> {
        self.execute_batch("COMMIT")
    }

    fn rollback(&self) -> Result<(), Self::Error> {
        self.execute_batch("ROLLBACK")
    }
}

impl<T: TransactionBackend + ?Sized> TransactionBackend for &T {
    type Error = T::Error;

    fn in_transaction(&self) -> bool {
        (**self).in_transaction()
    }

    fn begin(&self) -> Result<(), Self::Error> {
        (**self).begin()
    }

    fn commit(&self) -> Result<(), Self::Error> {
        (**self).commit()
    }

    fn rollback(&self) -> Result<(), Self::Error> {
        (**self).rollback()
    }
}

/// Runs `work` inside a transaction on `backend`, reusing the enclosing
/// transaction if there already is one.
///
/// When this call opens the transaction it commits on `Ok` and rolls back on
/// `Err`, returning the work's error unchanged. When it joins an existing
/// transaction nothing is committed or rolled back here. Guard failures
/// (begin, commit, rollback) reach the caller through `E: From<Error>`; use
/// [`try_flat_transaction`] to keep them apart from the work error.
pub fn flat_transaction<B, T, E, F>(backend: &B, work: F) -> Result<T, E>
where
    B: TransactionBackend + ?Sized,
    F: FnOnce(&B) -> Result<T, E>,
    E: From<Error> + fmt::Display,
{
    try_flat_transaction(backend, work).map_err(TransactionError::flatten)
}

/// [`flat_transaction`] without folding guard failures into `E`.
///
/// A failed rollback after failed work comes back as
/// [`TransactionError::Rollback`] holding the work error itself, so its type
/// survives.
pub fn try_flat_transaction<B, T, E, F>(
    backend: &B,
    work: F,
) -> Result<T, TransactionError<E>>
where
    B: TransactionBackend + ?Sized,
    F: FnOnce(&B) -> Result<T, E>,
    E: fmt::Display,
{
    let nested = backend.in_transaction();
    run_scoped(backend, nested, || work(backend))
}

/// Explicit transaction context carrying its own nesting depth.
///
/// Work run through [`FlatTransaction::run`] receives the context back so
/// nested calls go through the same object. The context is not `Sync`: each
/// thread or task needs its own.
pub struct FlatTransaction<B> {
    backend: B,
    depth: Cell<usize>,
}

impl<B: TransactionBackend> FlatTransaction<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            depth: Cell::new(0),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Number of guarded calls currently on the stack.
    pub fn depth(&self) -> usize {
        self.depth.get()
    }

    pub fn into_inner(self) -> B {
        self.backend
    }

    /// Same contract as [`flat_transaction`]. A call is nested when an
    /// enclosing `run` is active or the backend reports an open transaction.
    pub fn run<T, E, F>(&self, work: F) -> Result<T, E>
    where
        F: FnOnce(&Self) -> Result<T, E>,
        E: From<Error> + fmt::Display,
    {
        self.try_run(work).map_err(TransactionError::flatten)
    }

    /// Same contract as [`try_flat_transaction`].
    pub fn try_run<T, E, F>(&self, work: F) -> Result<T, TransactionError<E>>
    where
        F: FnOnce(&Self) -> Result<T, E>,
        E: fmt::Display,
    {
        let nested = self.depth.get() > 0 || self.backend.in_transaction();
        let _depth = DepthGuard::enter(&self.depth);
        run_scoped(&self.backend, nested, || work(self))
    }
}

impl<B: fmt::Debug> fmt::Debug for FlatTransaction<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlatTransaction")
            .field("backend", &self.backend)
            .field("depth", &self.depth.get())
            .finish()
    }
}

struct DepthGuard<'a>(&'a Cell<usize>);

impl<'a> DepthGuard<'a> {
    fn enter(depth: &'a Cell<usize>) -> Self {
        depth.set(depth.get() + 1);
        Self(depth)
    }
}

impl Drop for DepthGuard<'_> {
    fn drop(&mut self) {
        self.0.set(self.0.get() - 1);
    }
}

/// Rolls the owned transaction back if the work unwinds.
struct RollbackOnUnwind<'a, B: TransactionBackend + ?Sized> {
    backend: &'a B,
    armed: bool,
}

impl<B: TransactionBackend + ?Sized> Drop for RollbackOnUnwind<'_, B> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Err(e) = self.backend.rollback() {
            error!(error = %e, "Rollback after panic failed");
        }
    }
}

fn run_scoped<B, T, E, W>(backend: &B, nested: bool, work: W) -> Result<T, TransactionError<E>>
where
    B: TransactionBackend + ?Sized,
    W: FnOnce() -> Result<T, E>,
    E: fmt::Display,
{
    if nested {
        trace!("Joining enclosing transaction");
        return work().map_err(TransactionError::Work);
    }

    backend.begin().map_err(|e| Error::Begin(Box::new(e)))?;
    trace!("Opened transaction");

    let mut unwind = RollbackOnUnwind {
        backend,
        armed: true,
    };
    let outcome = work();
    unwind.armed = false;

    finish(backend, outcome)
}

fn finish<B, T, E>(backend: &B, outcome: Result<T, E>) -> Result<T, TransactionError<E>>
where
    B: TransactionBackend + ?Sized,
    E: fmt::Display,
{
    match outcome {
        Ok(value) => match backend.commit() {
            Ok(()) => {
                debug!("Committed transaction");
                Ok(value)
            }
            Err(e) => {
                warn!(error = %e, "Commit failed");
                Err(abandon_commit(backend, e).into())
            }
        },
        Err(work) => {
            debug!(error = %work, "Rolling back transaction");
            match backend.rollback() {
                Ok(()) => Err(TransactionError::Work(work)),
                Err(e) => Err(TransactionError::Rollback {
                    work,
                    rollback: Box::new(e),
                }),
            }
        }
    }
}

/// SQLite keeps the transaction open when COMMIT fails; roll it back and
/// report both failures if that fails too.
fn abandon_commit<B>(backend: &B, commit: B::Error) -> Error
where
    B: TransactionBackend + ?Sized,
{
    if backend.in_transaction() {
        if let Err(rollback) = backend.rollback() {
            return Error::CommitRollback {
                source: Box::new(commit),
                rollback: Box::new(rollback),
            };
        }
    }
    Error::Commit(Box::new(commit))
}
