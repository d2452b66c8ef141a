//! # fleet-relay
//!
//! Persistence-and-notification core for a multi-instance control plane
//! sharing one PostgreSQL store: a durable event outbox, an
//! instance-liveness registry, and a LISTEN/NOTIFY listener with
//! reconnection, bound together by a transaction session that resolves
//! each unit of work exactly once.
//!
//! ## Architecture
//!
//! ```text
//! Domain operations
//!     │
//!     ├── with_transaction / TxSession (db/)
//!     │       ├── EventStore   ── INSERT + pg_notify('events')   (persistence/)
//!     │       └── InstanceStore ─ UPDATE + pg_notify('instance-state')
//!     │
//!     ├── EventService / InstanceService (service/)
//!     │       heartbeat, sweeper, catch-up glue
//!     │
//!     └── ChannelListener (notify/)
//!             dedicated connection, reconnect loop, callback fan-in
//! ```
//!
//! The broadcast channel is a best-effort wake-up signal; the tables are
//! the source of truth. Consumers pair every subscription with a
//! periodic catch-up scan, because a notification sent while a listener
//! is between connections is lost.

pub mod config;
pub mod db;
pub mod error;
pub mod notify;
pub mod persistence;
pub mod service;
