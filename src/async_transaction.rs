//! Async flavour of [`crate::flat_transaction`].
//!
//! `rusqlite::Connection` is not `Sync`, so the futures built here are not
//! `Send`; drive them on one task (`LocalSet`, `join!`, a current-thread
//! runtime). Tasks that share a connection go through [`SharedConnection`],
//! which holds the connection for the whole of an owned transaction.

use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::LocalBoxFuture;
use futures::lock::{Mutex, MutexGuard};
use futures::FutureExt;
use rusqlite::Connection;
use tracing::{debug, error, trace, warn};

use crate::error::{Error, TransactionError};
use crate::transaction::TransactionBackend;

/// Transaction control with async hooks.
///
/// `in_transaction` decides between owning and joining, so it must describe
/// the caller's own context. A backend shared by independent tasks has to
/// keep them apart itself (see [`SharedConnection`]).
#[async_trait(?Send)]
pub trait AsyncTransactionBackend {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn in_transaction(&self) -> bool;

    async fn begin(&self) -> Result<(), Self::Error>;

    async fn commit(&self) -> Result<(), Self::Error>;

    async fn rollback(&self) -> Result<(), Self::Error>;
}

#[async_trait(?Send)]
impl AsyncTransactionBackend for Connection {
    type Error = rusqlite::Error;

    async fn in_transaction(&self) -> bool {
        TransactionBackend::in_transaction(self)
    }

    async fn begin(&self) -> Result<(), Self::Error> {
        TransactionBackend::begin(self)
    }

    async fn commit(&self) -> Result<(), Self::Error> {
        TransactionBackend::commit(self)
    }

    async fn rollback(&self) -> Result<(), Self::Error> {
        TransactionBackend::rollback(self)
    }
}

/// Runs the future produced by `work` inside a transaction on `backend`,
/// joining the enclosing transaction if there is one.
///
/// Same commit and rollback rules as [`crate::flat_transaction`]. A panic in
/// an owned transaction rolls it back before the panic resumes.
pub async fn flat_transaction_async<'a, B, T, E, F, Fut>(backend: &'a B, work: F) -> Result<T, E>
where
    B: AsyncTransactionBackend + ?Sized,
    F: FnOnce(&'a B) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: From<Error> + fmt::Display,
{
    try_flat_transaction_async(backend, work)
        .await
        .map_err(TransactionError::flatten)
}

/// [`flat_transaction_async`] without folding guard failures into `E`.
pub async fn try_flat_transaction_async<'a, B, T, E, F, Fut>(
    backend: &'a B,
    work: F,
) -> Result<T, TransactionError<E>>
where
    B: AsyncTransactionBackend + ?Sized,
    F: FnOnce(&'a B) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display,
{
    if backend.in_transaction().await {
        trace!("Joining enclosing transaction");
        return work(backend).await.map_err(TransactionError::Work);
    }

    backend
        .begin()
        .await
        .map_err(|e| Error::Begin(Box::new(e)))?;
    trace!("Opened transaction");

    let outcome = match AssertUnwindSafe(work(backend)).catch_unwind().await {
        Ok(outcome) => outcome,
        Err(payload) => {
            if let Err(e) = backend.rollback().await {
                error!(error = %e, "Rollback after panic failed");
            }
            panic::resume_unwind(payload);
        }
    };

    match outcome {
        Ok(value) => match backend.commit().await {
            Ok(()) => {
                debug!("Committed transaction");
                Ok(value)
            }
            Err(e) => {
                warn!(error = %e, "Commit failed");
                Err(abandon_commit(backend, e).await.into())
            }
        },
        Err(work) => {
            debug!(error = %work, "Rolling back transaction");
            match backend.rollback().await {
                Ok(()) => Err(TransactionError::Work(work)),
                Err(e) => Err(TransactionError::Rollback {
                    work,
                    rollback: Box::new(e),
                }),
            }
        }
    }
}

async fn abandon_commit<B>(backend: &B, commit: B::Error) -> Error
where
    B: AsyncTransactionBackend + ?Sized,
{
    if backend.in_transaction().await {
        if let Err(rollback) = backend.rollback().await {
            return Error::CommitRollback {
                source: Box::new(commit),
                rollback: Box::new(rollback),
            };
        }
    }
    Error::Commit(Box::new(commit))
}

/// A connection shared between tasks.
///
/// [`SharedConnection::transaction`] locks the connection before deciding
/// whether to open a transaction and keeps it locked until that transaction
/// is finished, so one task never joins or ends another task's transaction.
/// Nested guarded calls inside the work go through the `&Connection` it is
/// handed; calling `transaction` again on the same handle from inside the
/// work would wait on itself.
#[derive(Clone)]
pub struct SharedConnection {
    inner: Arc<Mutex<Connection>>,
}

impl SharedConnection {
    pub fn new(connection: Connection) -> Self {
        Self {
            inner: Arc::new(Mutex::new(connection)),
        }
    }

    /// Exclusive access outside of a guarded call.
    pub async fn lock(&self) -> MutexGuard<'_, Connection> {
        self.inner.lock().await
    }

    /// Runs `work` inside a transaction with the connection held.
    ///
    /// Unlike the generic [`flat_transaction_async`], dropping the returned
    /// future before it completes rolls back the transaction it opened.
    ///
    /// ```no_run
    /// use futures::FutureExt;
    /// use sqlite_plus::{flat_transaction, Error, SharedConnection};
    ///
    /// # async fn run(shared: SharedConnection) -> Result<(), Error> {
    /// shared
    ///     .transaction(|conn| {
    ///         async move {
    ///             conn.execute("INSERT INTO tags (name) VALUES ('a')", [])?;
    ///             flat_transaction(conn, |conn| {
    ///                 conn.execute("INSERT INTO tags (name) VALUES ('b')", [])?;
    ///                 Ok::<_, Error>(())
    ///             })
    ///         }
    ///         .boxed_local()
    ///     })
    ///     .await
    /// # }
    /// ```
    pub async fn transaction<T, E, F>(&self, work: F) -> Result<T, E>
    where
        F: for<'c> FnOnce(&'c Connection) -> LocalBoxFuture<'c, Result<T, E>>,
        E: From<Error> + fmt::Display,
    {
        self.try_transaction(work)
            .await
            .map_err(TransactionError::flatten)
    }

    /// [`SharedConnection::transaction`] without folding guard failures
    /// into `E`.
    pub async fn try_transaction<T, E, F>(&self, work: F) -> Result<T, TransactionError<E>>
    where
        F: for<'c> FnOnce(&'c Connection) -> LocalBoxFuture<'c, Result<T, E>>,
        E: fmt::Display,
    {
        let conn = self.inner.lock().await;
        let mut cancel = RollbackOnDrop {
            conn: &*conn,
            armed: !TransactionBackend::in_transaction(&*conn),
        };
        let result = try_flat_transaction_async(&*conn, work).await;
        cancel.armed = false;
        result
    }
}

impl fmt::Debug for SharedConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedConnection").finish_non_exhaustive()
    }
}

/// Rolls back a transaction left open when an owning future is dropped.
struct RollbackOnDrop<'a> {
    conn: &'a Connection,
    armed: bool,
}

impl Drop for RollbackOnDrop<'_> {
    fn drop(&mut self) {
        if !self.armed || !TransactionBackend::in_transaction(self.conn) {
            return;
        }
        warn!("Transaction future dropped before completion; rolling back");
        if let Err(e) = TransactionBackend::rollback(self.conn) {
            error!(error = %e, "Rollback of abandoned transaction failed");
        }
    }
}
