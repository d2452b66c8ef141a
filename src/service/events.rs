//! Event service: transactional glue around the outbox store.
//!
//! Each method opens its own unit of work via
//! [`with_transaction`]; callers that need to combine an outbox write
//! with other mutations in one transaction use [`EventStore`] directly
//! inside their own `with_transaction` closure.

use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::db::with_transaction;
use crate::error::RelayError;
use crate::persistence::models::{Event, NewEvent};
use crate::persistence::EventStore;

/// Coordinator for outbox operations that stand alone as a unit of work.
#[derive(Debug, Clone)]
pub struct EventService {
    pool: PgPool,
    store: EventStore,
}

impl EventService {
    /// Creates a new event service.
    #[must_use]
    pub fn new(pool: PgPool, store: EventStore) -> Self {
        Self { pool, store }
    }

    /// Appends one event in its own transaction.
    ///
    /// # Errors
    ///
    /// Returns the append error; the transaction has already been rolled
    /// back by the time this returns.
    pub async fn record(&self, event: NewEvent) -> Result<Event, RelayError> {
        let store = self.store.clone();
        with_transaction(&self.pool, move |tx| {
            Box::pin(async move { store.append(tx, event).await })
        })
        .await
    }

    /// Runs the catch-up scan: every unreconciled event in creation order.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Storage`] on database failure.
    pub async fn catch_up(&self) -> Result<Vec<Event>, RelayError> {
        self.store.list_unreconciled().await
    }

    /// Marks the given events reconciled at `at` in one transaction.
    /// Returns how many rows actually transitioned; an empty id list is a
    /// no-op.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Storage`] on database failure.
    pub async fn reconcile(&self, ids: &[Uuid], at: DateTime<Utc>) -> Result<u64, RelayError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let store = self.store.clone();
        let ids = ids.to_vec();
        with_transaction(&self.pool, move |tx| {
            Box::pin(async move { store.mark_reconciled(tx, &ids, at).await })
        })
        .await
    }

    /// Deletes reconciled events, optionally only those reconciled before
    /// `before`. Returns how many rows were removed.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Storage`] on database failure.
    pub async fn sweep(&self, before: Option<DateTime<Utc>>) -> Result<u64, RelayError> {
        let store = self.store.clone();
        with_transaction(&self.pool, move |tx| {
            Box::pin(async move { store.delete_reconciled(tx, before).await })
        })
        .await
    }

    /// Spawns the periodic sweeper task. Sweep failures are logged and
    /// retried on the next tick; the task runs until aborted.
    pub fn spawn_sweeper(&self, interval: Duration) -> JoinHandle<()> {
        let service = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match service.sweep(None).await {
                    Ok(0) => {}
                    Ok(swept) => tracing::info!(swept, "deleted reconciled events"),
                    Err(err) => tracing::warn!(%err, "event sweep failed"),
                }
            }
        })
    }
}
