//! Instance service: registration, readiness transitions, heartbeat.
//!
//! The heartbeat keeps `updated_at` fresh so that `ready = true` stays
//! meaningful; stale-instance expiry itself is an external sweeper's
//! policy, built on
//! [`crate::persistence::InstanceStore::find_by_updated_before`].

use std::time::Duration;

use sqlx::PgPool;
use tokio::task::JoinHandle;

use crate::db::with_transaction;
use crate::error::RelayError;
use crate::persistence::models::ServerInstance;
use crate::persistence::InstanceStore;

/// Coordinator for instance lifecycle operations.
#[derive(Debug, Clone)]
pub struct InstanceService {
    pool: PgPool,
    store: InstanceStore,
}

impl InstanceService {
    /// Creates a new instance service.
    #[must_use]
    pub fn new(pool: PgPool, store: InstanceStore) -> Self {
        Self { pool, store }
    }

    /// Registers this process in the registry, not yet ready. Re-running
    /// after a restart overwrites the previous record.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Storage`] on database failure.
    pub async fn register(&self, id: &str) -> Result<ServerInstance, RelayError> {
        let store = self.store.clone();
        let id = id.to_string();
        with_transaction(&self.pool, move |tx| {
            Box::pin(async move { store.replace(tx, &id, false).await })
        })
        .await
    }

    /// Marks instances ready; the `ready:<ids>` broadcast is delivered
    /// once the transaction commits.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Validation`] on an empty id list, otherwise
    /// [`RelayError::Storage`] on database failure.
    pub async fn mark_ready(&self, ids: &[String]) -> Result<(), RelayError> {
        let store = self.store.clone();
        let ids = ids.to_vec();
        with_transaction(&self.pool, move |tx| {
            Box::pin(async move { store.mark_ready_by_ids(tx, &ids).await })
        })
        .await
    }

    /// Marks instances unready; the `unready:<ids>` broadcast is
    /// delivered once the transaction commits.
    ///
    /// # Errors
    ///
    /// Same contract as [`InstanceService::mark_ready`].
    pub async fn mark_unready(&self, ids: &[String]) -> Result<(), RelayError> {
        let store = self.store.clone();
        let ids = ids.to_vec();
        with_transaction(&self.pool, move |tx| {
            Box::pin(async move { store.mark_unready_by_ids(tx, &ids).await })
        })
        .await
    }

    /// One heartbeat: overwrite the record as ready with a fresh
    /// `updated_at`.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Storage`] on database failure.
    pub async fn heartbeat(&self, id: &str) -> Result<ServerInstance, RelayError> {
        let store = self.store.clone();
        let id = id.to_string();
        with_transaction(&self.pool, move |tx| {
            Box::pin(async move { store.replace(tx, &id, true).await })
        })
        .await
    }

    /// Spawns the periodic heartbeat task for `id`. Failures are logged
    /// and retried on the next tick; the task runs until aborted.
    pub fn spawn_heartbeat(&self, id: String, interval: Duration) -> JoinHandle<()> {
        let service = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(err) = service.heartbeat(&id).await {
                    tracing::warn!(instance = %id, %err, "heartbeat failed");
                }
            }
        })
    }

    /// Returns the ids of all instances currently marked ready. This is
    /// the catch-up read for consumers that missed an `instance-state`
    /// broadcast window.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Storage`] on database failure.
    pub async fn ready_ids(&self) -> Result<Vec<String>, RelayError> {
        self.store.find_ready_ids().await
    }
}
