//! Relay error types.
//!
//! [`RelayError`] is the central error type for the crate. Variants map
//! one-to-one onto the outcome classes a caller must distinguish: reject
//! before touching the store, roll back and surface, surface without
//! rollback, or retry the whole unit of work.

use uuid::Uuid;

/// Error enum covering every failure class the relay core can surface.
///
/// | Variant        | Transaction effect            | Caller action          |
/// |----------------|-------------------------------|------------------------|
/// | `Validation`   | none (no statement issued)    | fix the request        |
/// | `Conflict`     | rolls back                    | resolve the conflict   |
/// | `NotFound`     | none (read-only)              | treat as absent        |
/// | `Storage`      | rolls back                    | retry the unit of work |
/// | `Internal`     | rolls back                    | report                 |
///
/// Listener disconnects never appear here: the listener handles them
/// entirely inside its own reconnect loop.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Input rejected before any statement was issued.
    #[error("invalid request: {0}")]
    Validation(String),

    /// A constraint violation on write; the enclosing transaction rolls back.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A read matched zero rows. Read-only, so nothing rolls back.
    #[error("{resource} not found: {id}")]
    NotFound {
        /// Kind of record looked up (e.g. `"event"`).
        resource: &'static str,
        /// Identifier that matched nothing.
        id: String,
    },

    /// Transient connection or timeout failure; the whole unit of work may
    /// be retried.
    #[error("storage error: {0}")]
    Storage(String),

    /// Invariant violation inside the relay core itself.
    #[error("internal error: {0}")]
    Internal(String),
}

impl RelayError {
    /// Builds a [`RelayError::NotFound`] for an event id.
    #[must_use]
    pub fn event_not_found(id: Uuid) -> Self {
        Self::NotFound {
            resource: "event",
            id: id.to_string(),
        }
    }

    /// Builds a [`RelayError::NotFound`] for an instance id.
    #[must_use]
    pub fn instance_not_found(id: &str) -> Self {
        Self::NotFound {
            resource: "instance",
            id: id.to_string(),
        }
    }

    /// Returns `true` for failures where retrying the whole unit of work
    /// may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage(_))
    }
}

impl From<sqlx::Error> for RelayError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Self::NotFound {
                resource: "row",
                id: String::new(),
            },
            sqlx::Error::Database(db) if db.is_unique_violation() || db.is_check_violation() => {
                Self::Conflict(db.to_string())
            }
            other => Self::Storage(other.to_string()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn not_found_carries_resource_and_id() {
        let id = Uuid::new_v4();
        let err = RelayError::event_not_found(id);
        assert_eq!(err.to_string(), format!("event not found: {id}"));
    }

    #[test]
    fn row_not_found_maps_to_not_found() {
        let err = RelayError::from(sqlx::Error::RowNotFound);
        assert!(matches!(err, RelayError::NotFound { .. }));
    }

    #[test]
    fn pool_timeout_is_retryable() {
        let err = RelayError::from(sqlx::Error::PoolTimedOut);
        assert!(err.is_retryable());
    }

    #[test]
    fn validation_is_not_retryable() {
        let err = RelayError::Validation("empty id list".to_string());
        assert!(!err.is_retryable());
    }
}
