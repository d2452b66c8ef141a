//! Instance registry store.
//!
//! Durable table of known service instances with a readiness flag and a
//! heartbeat timestamp. Readiness transitions queue a NOTIFY on the
//! `instance-state` channel inside the same transaction as the update, so
//! cooperating instances see the change without polling, and only after
//! it has committed.

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use super::models::ServerInstance;
use crate::db::TxSession;
use crate::error::RelayError;
use crate::notify::INSTANCE_STATE_CHANNEL;
use crate::notify::payload::{InstanceStatePayload, StateTransition};

type InstanceRow = (String, bool, DateTime<Utc>, DateTime<Utc>);

fn instance_from_row(row: InstanceRow) -> ServerInstance {
    let (id, ready, created_at, updated_at) = row;
    ServerInstance {
        id,
        ready,
        created_at,
        updated_at,
    }
}

/// PostgreSQL-backed instance registry.
///
/// Reads go through the shared pool; writes require an active
/// [`TxSession`].
#[derive(Debug, Clone)]
pub struct InstanceStore {
    pool: PgPool,
    notify_ids_per_payload: usize,
}

impl InstanceStore {
    /// Creates a new registry over the shared pool.
    ///
    /// `notify_ids_per_payload` caps how many ids one readiness NOTIFY
    /// payload carries; longer lists are split into multiple
    /// notifications.
    #[must_use]
    pub fn new(pool: PgPool, notify_ids_per_payload: usize) -> Self {
        Self {
            pool,
            notify_ids_per_payload,
        }
    }

    /// Registers a new instance, not ready, timestamps assigned by the
    /// database.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Conflict`] if the id is already registered;
    /// the session is flagged for rollback.
    pub async fn create(
        &self,
        tx: &mut TxSession,
        id: &str,
    ) -> Result<ServerInstance, RelayError> {
        let res = sqlx::query_as::<_, InstanceRow>(
            "INSERT INTO server_instances (id, ready) VALUES ($1, FALSE) \
             RETURNING id, ready, created_at, updated_at",
        )
        .bind(id)
        .fetch_one(tx.conn())
        .await;
        let row = res.map_err(|e| tx.fail_write(e))?;
        Ok(instance_from_row(row))
    }

    /// Fully overwrites an instance record, inserting it if absent.
    ///
    /// No partial patch semantics: `ready` is set to exactly the given
    /// value and `updated_at` refreshes to the database clock, which is
    /// what makes this the heartbeat primitive.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Storage`] on database failure; the session is
    /// flagged for rollback.
    pub async fn replace(
        &self,
        tx: &mut TxSession,
        id: &str,
        ready: bool,
    ) -> Result<ServerInstance, RelayError> {
        let res = sqlx::query_as::<_, InstanceRow>(
            "INSERT INTO server_instances (id, ready) VALUES ($1, $2) \
             ON CONFLICT (id) DO UPDATE SET ready = EXCLUDED.ready, updated_at = now() \
             RETURNING id, ready, created_at, updated_at",
        )
        .bind(id)
        .bind(ready)
        .fetch_one(tx.conn())
        .await;
        let row = res.map_err(|e| tx.fail_write(e))?;
        Ok(instance_from_row(row))
    }

    /// Fetches one instance by id.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::NotFound`] if no such instance exists.
    pub async fn get(&self, id: &str) -> Result<ServerInstance, RelayError> {
        let row = sqlx::query_as::<_, InstanceRow>(
            "SELECT id, ready, created_at, updated_at FROM server_instances WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(instance_from_row)
            .ok_or_else(|| RelayError::instance_not_found(id))
    }

    /// Fetches the instances matching `ids`. Missing ids are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Storage`] on database failure.
    pub async fn find_by_ids(&self, ids: &[String]) -> Result<Vec<ServerInstance>, RelayError> {
        let rows = sqlx::query_as::<_, InstanceRow>(
            "SELECT id, ready, created_at, updated_at FROM server_instances \
             WHERE id = ANY($1) ORDER BY id",
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(instance_from_row).collect())
    }

    /// Returns instances whose `updated_at` is older than `before`.
    ///
    /// This is the stale-instance query: the registry itself enforces no
    /// staleness TTL, it only gives an external sweeper the read it needs.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Storage`] on database failure.
    pub async fn find_by_updated_before(
        &self,
        before: DateTime<Utc>,
    ) -> Result<Vec<ServerInstance>, RelayError> {
        let rows = sqlx::query_as::<_, InstanceRow>(
            "SELECT id, ready, created_at, updated_at FROM server_instances \
             WHERE updated_at < $1 ORDER BY updated_at ASC",
        )
        .bind(before)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(instance_from_row).collect())
    }

    /// Returns all registered instances.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Storage`] on database failure.
    pub async fn all(&self) -> Result<Vec<ServerInstance>, RelayError> {
        let rows = sqlx::query_as::<_, InstanceRow>(
            "SELECT id, ready, created_at, updated_at FROM server_instances ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(instance_from_row).collect())
    }

    /// Returns the ids of all instances currently marked ready.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Storage`] on database failure.
    pub async fn find_ready_ids(&self) -> Result<Vec<String>, RelayError> {
        let ids = sqlx::query_scalar::<_, String>(
            "SELECT id FROM server_instances WHERE ready = TRUE ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    /// Marks the given instances ready and queues the `ready:<ids>`
    /// notification on the same transaction.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Validation`] on an empty id list (before any
    /// statement is issued), or [`RelayError::Storage`] on database
    /// failure. A notify failure rolls the state update back too: the two
    /// are one atomic step.
    pub async fn mark_ready_by_ids(
        &self,
        tx: &mut TxSession,
        ids: &[String],
    ) -> Result<(), RelayError> {
        self.mark_by_ids(tx, ids, StateTransition::Ready).await
    }

    /// Marks the given instances unready and queues the `unready:<ids>`
    /// notification on the same transaction.
    ///
    /// # Errors
    ///
    /// Same contract as [`InstanceStore::mark_ready_by_ids`].
    pub async fn mark_unready_by_ids(
        &self,
        tx: &mut TxSession,
        ids: &[String],
    ) -> Result<(), RelayError> {
        self.mark_by_ids(tx, ids, StateTransition::Unready).await
    }

    async fn mark_by_ids(
        &self,
        tx: &mut TxSession,
        ids: &[String],
        transition: StateTransition,
    ) -> Result<(), RelayError> {
        if ids.is_empty() {
            return Err(RelayError::Validation(
                "readiness transition needs at least one instance id".to_string(),
            ));
        }

        let res = sqlx::query(
            "UPDATE server_instances SET ready = $2, updated_at = now() WHERE id = ANY($1)",
        )
        .bind(ids)
        .bind(transition == StateTransition::Ready)
        .execute(tx.conn())
        .await;
        res.map_err(|e| tx.fail_write(e))?;

        let payload = InstanceStatePayload::new(transition, ids);
        for encoded in payload.encode_batched(self.notify_ids_per_payload) {
            let res = sqlx::query("SELECT pg_notify($1, $2)")
                .bind(INSTANCE_STATE_CHANNEL)
                .bind(&encoded)
                .execute(tx.conn())
                .await;
            res.map_err(|e| tx.fail_write(e))?;
        }
        Ok(())
    }

    /// Deletes one instance by id. Deleting an absent id is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Storage`] on database failure; the session is
    /// flagged for rollback.
    pub async fn delete(&self, tx: &mut TxSession, id: &str) -> Result<(), RelayError> {
        let res = sqlx::query("DELETE FROM server_instances WHERE id = $1")
            .bind(id)
            .execute(tx.conn())
            .await;
        res.map_err(|e| tx.fail_write(e))?;
        Ok(())
    }

    /// Deletes all instances matching `ids`.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Storage`] on database failure; the session is
    /// flagged for rollback.
    pub async fn delete_by_ids(&self, tx: &mut TxSession, ids: &[String]) -> Result<(), RelayError> {
        let res = sqlx::query("DELETE FROM server_instances WHERE id = ANY($1)")
            .bind(ids)
            .execute(tx.conn())
            .await;
        res.map_err(|e| tx.fail_write(e))?;
        Ok(())
    }
}
