//! Persistence layer: PostgreSQL event outbox and instance registry.
//!
//! Two independent aggregates share the store: the append-only outbox in
//! `events` and the liveness registry in `server_instances`. There is no
//! foreign key between them; what binds them is that both may be written
//! inside the same [`crate::db::TxSession`] as a triggering domain
//! mutation, which is what makes a state change and its observability
//! record atomic.

pub mod events;
pub mod instances;
pub mod models;

pub use events::EventStore;
pub use instances::InstanceStore;
pub use models::{Event, EventKind, NewEvent, ServerInstance};
