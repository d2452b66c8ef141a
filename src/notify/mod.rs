//! Broadcast-channel plumbing: fixed channel names, payload codec, and
//! the reconnecting listener.
//!
//! The NOTIFY primitive is fire-and-forget, connection-scoped, and has no
//! replay. Everything in this module is therefore a latency optimization
//! over the durable tables, never a source of truth: a notification sent
//! while a listener is between connections is simply lost, and consumers
//! must run periodic catch-up scans
//! ([`crate::persistence::EventStore::list_unreconciled`],
//! [`crate::persistence::InstanceStore::find_ready_ids`]) regardless.

pub mod listener;
pub mod payload;

pub use listener::{ListenerConfig, ListenerHandle, ListenerState, subscribe, unsubscribe};
pub use payload::{InstanceStatePayload, StateTransition};

/// Channel carrying instance readiness transitions
/// (`ready:<ids>` / `unready:<ids>`).
pub const INSTANCE_STATE_CHANNEL: &str = "instance-state";

/// Channel carrying outbox wake-up tokens. The payload is an event id,
/// used only to trigger a catch-up scan, never the event body.
pub const EVENTS_CHANNEL: &str = "events";
