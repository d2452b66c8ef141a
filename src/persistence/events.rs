//! Event outbox store.
//!
//! Append-only log of domain events with an explicit reconciliation
//! state. Appending queues a wake-up NOTIFY in the same transaction, so
//! listeners only ever observe committed events. The store records
//! reconciliation facts and supports catch-up scans; it never decides
//! *when* to reconcile.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::str::FromStr;
use uuid::Uuid;

use super::models::{Event, EventKind, NewEvent};
use crate::db::TxSession;
use crate::error::RelayError;
use crate::notify::EVENTS_CHANNEL;

type EventRow = (
    Uuid,
    String,
    String,
    String,
    String,
    Option<serde_json::Value>,
    DateTime<Utc>,
    Option<DateTime<Utc>>,
);

const EVENT_COLUMNS: &str =
    "id, source_id, entity_type, entity_id, event_kind, payload, created_at, reconciled_at";

fn event_from_row(row: EventRow) -> Result<Event, RelayError> {
    let (id, source_id, entity_type, entity_id, kind, payload, created_at, reconciled_at) = row;
    Ok(Event {
        id,
        source_id,
        entity_type,
        entity_id,
        kind: EventKind::from_str(&kind)?,
        payload,
        created_at,
        reconciled_at,
    })
}

/// PostgreSQL-backed outbox store.
///
/// Reads go through the shared pool; writes require an active
/// [`TxSession`] so they share fate with the enclosing unit of work.
#[derive(Debug, Clone)]
pub struct EventStore {
    pool: PgPool,
}

impl EventStore {
    /// Creates a new store over the shared pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Appends an event and queues its wake-up notification.
    ///
    /// Both the INSERT and the `pg_notify` run on the enclosing
    /// transaction: the notification is delivered only after commit, and
    /// a failure of either statement fails the whole unit of work: an
    /// event is never partially visible.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Storage`] or [`RelayError::Conflict`] on
    /// database failure; the session is flagged for rollback.
    pub async fn append(&self, tx: &mut TxSession, event: NewEvent) -> Result<Event, RelayError> {
        let id = Uuid::new_v4();
        let inserted = sqlx::query_scalar::<_, DateTime<Utc>>(
            "INSERT INTO events (id, source_id, entity_type, entity_id, event_kind, payload) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING created_at",
        )
        .bind(id)
        .bind(&event.source_id)
        .bind(&event.entity_type)
        .bind(&event.entity_id)
        .bind(event.kind.as_str())
        .bind(&event.payload)
        .fetch_one(tx.conn())
        .await;
        let created_at = inserted.map_err(|e| tx.fail_write(e))?;

        // Queued until commit; payload is the id, an opaque wake-up token.
        let notified = sqlx::query("SELECT pg_notify($1, $2)")
            .bind(EVENTS_CHANNEL)
            .bind(id.to_string())
            .execute(tx.conn())
            .await;
        notified.map_err(|e| tx.fail_write(e))?;

        Ok(Event {
            id,
            source_id: event.source_id,
            entity_type: event.entity_type,
            entity_id: event.entity_id,
            kind: event.kind,
            payload: event.payload,
            created_at,
            reconciled_at: None,
        })
    }

    /// Fetches one event by id.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::NotFound`] if no such event exists.
    pub async fn get(&self, id: Uuid) -> Result<Event, RelayError> {
        let row = sqlx::query_as::<_, EventRow>(&format!(
            "SELECT {EVENT_COLUMNS} FROM events WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map_or_else(|| Err(RelayError::event_not_found(id)), event_from_row)
    }

    /// Fetches the events matching `ids`. Missing ids are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Storage`] on database failure.
    pub async fn find_by_ids(&self, ids: &[Uuid]) -> Result<Vec<Event>, RelayError> {
        let rows = sqlx::query_as::<_, EventRow>(&format!(
            "SELECT {EVENT_COLUMNS} FROM events WHERE id = ANY($1) ORDER BY created_at ASC"
        ))
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(event_from_row).collect()
    }

    /// Returns all events.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Storage`] on database failure.
    pub async fn all(&self) -> Result<Vec<Event>, RelayError> {
        let rows = sqlx::query_as::<_, EventRow>(&format!(
            "SELECT {EVENT_COLUMNS} FROM events ORDER BY created_at ASC"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(event_from_row).collect()
    }

    /// Returns every unreconciled event in creation order, unbounded.
    ///
    /// This is the catch-up scan for instances that missed a broadcast
    /// window. Callers paginate if they need to.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Storage`] on database failure.
    pub async fn list_unreconciled(&self) -> Result<Vec<Event>, RelayError> {
        let rows = sqlx::query_as::<_, EventRow>(&format!(
            "SELECT {EVENT_COLUMNS} FROM events \
             WHERE reconciled_at IS NULL ORDER BY created_at ASC"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(event_from_row).collect()
    }

    /// Marks the given events as reconciled at `at`.
    ///
    /// Idempotent: already-reconciled rows are untouched, so
    /// `reconciled_at` is set exactly once and never reverts. Returns the
    /// number of rows transitioned by this call.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Storage`] on database failure; the session is
    /// flagged for rollback.
    pub async fn mark_reconciled(
        &self,
        tx: &mut TxSession,
        ids: &[Uuid],
        at: DateTime<Utc>,
    ) -> Result<u64, RelayError> {
        let res = sqlx::query(
            "UPDATE events SET reconciled_at = $2 \
             WHERE id = ANY($1) AND reconciled_at IS NULL",
        )
        .bind(ids)
        .bind(at)
        .execute(tx.conn())
        .await;
        let done = res.map_err(|e| tx.fail_write(e))?;
        Ok(done.rows_affected())
    }

    /// Deletes reconciled events, optionally only those reconciled before
    /// `before`. Returns the number of rows removed.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Storage`] on database failure; the session is
    /// flagged for rollback.
    pub async fn delete_reconciled(
        &self,
        tx: &mut TxSession,
        before: Option<DateTime<Utc>>,
    ) -> Result<u64, RelayError> {
        let res = if let Some(cutoff) = before {
            sqlx::query("DELETE FROM events WHERE reconciled_at IS NOT NULL AND reconciled_at < $1")
                .bind(cutoff)
                .execute(tx.conn())
                .await
        } else {
            sqlx::query("DELETE FROM events WHERE reconciled_at IS NOT NULL")
                .execute(tx.conn())
                .await
        };
        let done = res.map_err(|e| tx.fail_write(e))?;
        Ok(done.rows_affected())
    }

    /// Deletes one event by id. Deleting an absent id is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Storage`] on database failure; the session is
    /// flagged for rollback.
    pub async fn delete(&self, tx: &mut TxSession, id: Uuid) -> Result<(), RelayError> {
        let res = sqlx::query("DELETE FROM events WHERE id = $1")
            .bind(id)
            .execute(tx.conn())
            .await;
        res.map_err(|e| tx.fail_write(e))?;
        Ok(())
    }
}
