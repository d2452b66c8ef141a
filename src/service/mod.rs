//! Service layer: thin coordinators binding stores to units of work.
//!
//! Each service method wraps store calls in
//! [`crate::db::with_transaction`] so every operation resolves as exactly
//! one commit or rollback. Domain operations that need to combine a
//! domain write with an outbox append or instance update call
//! `with_transaction` once themselves and use the stores directly.

pub mod events;
pub mod instances;

pub use events::EventService;
pub use instances::InstanceService;
