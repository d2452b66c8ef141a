//! Transaction sessions: one unit of work, resolved exactly once.
//!
//! [`TxSession`] wraps a single `sqlx` transaction together with a
//! monotonic rollback flag. Any call site deep in the stack may veto the
//! unit of work with [`TxSession::mark_for_rollback`]; the outcome is
//! decided once, centrally, when [`TxSession::resolve`] runs at the
//! boundary. `resolve` consumes the session, so resolving twice is a
//! compile error rather than a runtime one.
//!
//! [`with_transaction`] is the preferred boundary: the closure's own
//! `Result` decides commit vs rollback, and the rollback flag only exists
//! for call sites that must veto before their error reaches the boundary.
//!
//! Cancellation safety: dropping an unresolved session rolls the
//! underlying transaction back, so a future cancelled mid-transaction
//! never leaves a transaction open.

use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::future::BoxFuture;
use sqlx::{PgConnection, PgPool, Postgres, Transaction};

use crate::error::RelayError;

/// Boxed future returned by unit-of-work closures passed to
/// [`with_transaction`].
pub type TxFuture<'a, T> = BoxFuture<'a, Result<T, RelayError>>;

/// One unit of work against the store.
///
/// Created by [`TxSession::begin`], resolved exactly once by
/// [`TxSession::resolve`]. All statements issued through [`TxSession::conn`]
/// are strictly ordered and atomic as a unit.
pub struct TxSession {
    tx: Transaction<'static, Postgres>,
    rollback: AtomicBool,
}

impl std::fmt::Debug for TxSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TxSession")
            .field("rollback", &self.rollback.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl TxSession {
    /// Opens a new unit of work on a pooled connection.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Storage`] if no connection can be acquired or
    /// `BEGIN` fails.
    pub async fn begin(pool: &PgPool) -> Result<Self, RelayError> {
        let tx = pool.begin().await?;
        Ok(Self {
            tx,
            rollback: AtomicBool::new(false),
        })
    }

    /// Returns the connection carrying this transaction.
    pub fn conn(&mut self) -> &mut PgConnection {
        &mut self.tx
    }

    /// Flags this unit of work for rollback, logging the cause.
    ///
    /// Idempotent: the flag is monotonic and never reset, so concurrent or
    /// repeated calls are harmless. Only the first call logs.
    pub fn mark_for_rollback(&self, cause: &RelayError) {
        if !self.rollback.swap(true, Ordering::SeqCst) {
            tracing::warn!(%cause, "transaction marked for rollback");
        }
    }

    /// Returns `true` if this unit of work has been flagged for rollback.
    #[must_use]
    pub fn marked_for_rollback(&self) -> bool {
        self.rollback.load(Ordering::SeqCst)
    }

    /// Converts a driver write error into a [`RelayError`] and flags the
    /// session for rollback in one step.
    pub(crate) fn fail_write(&self, err: sqlx::Error) -> RelayError {
        let err = RelayError::from(err);
        self.mark_for_rollback(&err);
        err
    }

    /// Resolves this unit of work: commits unless flagged for rollback.
    ///
    /// Both outcomes are logged and neither is re-raised; by the time
    /// `resolve` runs the caller has already produced its own error for
    /// whatever failed inside the unit of work.
    pub async fn resolve(self) {
        let Self { tx, rollback } = self;
        if rollback.into_inner() {
            match tx.rollback().await {
                Ok(()) => tracing::info!("rolled back transaction"),
                Err(err) => tracing::error!(%err, "could not roll back transaction"),
            }
        } else if let Err(err) = tx.commit().await {
            tracing::error!(%err, "could not commit transaction");
        }
    }
}

/// Runs `f` inside a single unit of work and resolves it at the boundary.
///
/// The closure's own `Result` decides the outcome: `Ok` commits, `Err`
/// rolls back. A rollback flag set deep inside the closure (via
/// [`TxSession::mark_for_rollback`]) also forces rollback even when the
/// closure returns `Ok`.
///
/// ```ignore
/// let event = with_transaction(&pool, |tx| {
///     Box::pin(async move { store.append(tx, new_event).await })
/// })
/// .await?;
/// ```
///
/// # Errors
///
/// Returns whatever error the closure produced, or [`RelayError::Storage`]
/// if the transaction could not be opened.
pub async fn with_transaction<T, F>(pool: &PgPool, f: F) -> Result<T, RelayError>
where
    F: for<'s> FnOnce(&'s mut TxSession) -> TxFuture<'s, T>,
{
    let mut session = TxSession::begin(pool).await?;
    let outcome = f(&mut session).await;
    if let Err(err) = &outcome {
        session.mark_for_rollback(err);
    }
    session.resolve().await;
    outcome
}
