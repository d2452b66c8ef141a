//! Row models for the outbox and instance registry tables.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::RelayError;

/// Kind of domain mutation an outbox event records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// The referenced entity was created.
    Created,
    /// The referenced entity was updated.
    Updated,
    /// The referenced entity was deleted.
    Deleted,
}

impl EventKind {
    /// Returns the stable string stored in the `event_kind` column.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Deleted => "deleted",
        }
    }
}

impl std::str::FromStr for EventKind {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(Self::Created),
            "updated" => Ok(Self::Updated),
            "deleted" => Ok(Self::Deleted),
            other => Err(RelayError::Internal(format!("unknown event kind: {other}"))),
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stored outbox row from the `events` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Event id. UUIDv4: carries no ordering meaning.
    pub id: Uuid,
    /// Id of the source that produced the mutation.
    pub source_id: String,
    /// Type of the entity the event refers to.
    pub entity_type: String,
    /// Id of the entity the event refers to.
    pub entity_id: String,
    /// Kind of mutation.
    pub kind: EventKind,
    /// Optional JSONB snapshot of the entity at mutation time.
    pub payload: Option<serde_json::Value>,
    /// Server-side insertion timestamp. Catch-up scans order by this.
    pub created_at: DateTime<Utc>,
    /// Set exactly once when a consumer has durably processed the event;
    /// `None` until then, never reverts.
    pub reconciled_at: Option<DateTime<Utc>>,
}

/// An outbox event ready to be appended. Id and timestamps are assigned
/// on insert.
#[derive(Debug, Clone)]
pub struct NewEvent {
    /// Id of the source producing the mutation.
    pub source_id: String,
    /// Type of the entity the event refers to.
    pub entity_type: String,
    /// Id of the entity the event refers to.
    pub entity_id: String,
    /// Kind of mutation.
    pub kind: EventKind,
    /// Optional JSONB snapshot of the entity at mutation time.
    pub payload: Option<serde_json::Value>,
}

/// A service instance row from the `server_instances` table.
///
/// `ready = true` is meaningful only while the instance keeps refreshing
/// `updated_at`; staleness detection is a read-side policy (see
/// [`crate::persistence::instances::InstanceStore::find_by_updated_before`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInstance {
    /// Instance identifier (self-assigned at boot).
    pub id: String,
    /// Self-reported availability.
    pub ready: bool,
    /// First registration time.
    pub created_at: DateTime<Utc>,
    /// Last heartbeat or state change.
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn event_kind_round_trips_through_column_string() {
        for kind in [EventKind::Created, EventKind::Updated, EventKind::Deleted] {
            let Ok(parsed) = EventKind::from_str(kind.as_str()) else {
                panic!("kind string should parse");
            };
            assert_eq!(parsed, kind);
        }
    }

    #[test]
    fn unknown_event_kind_is_rejected() {
        assert!(EventKind::from_str("renamed").is_err());
    }
}
