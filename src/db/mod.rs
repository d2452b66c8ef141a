//! Database access layer: shared connection pool and transaction sessions.
//!
//! All request-scoped work goes through the shared [`sqlx::PgPool`] built
//! by [`connect`]. Notification listeners never draw from this pool; they
//! open their own dedicated connections (see [`crate::notify::listener`]).

pub mod transaction;

pub use transaction::{TxSession, with_transaction};

use std::time::Duration;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use crate::config::RelayConfig;
use crate::error::RelayError;

/// Builds the shared connection pool from configuration.
///
/// # Errors
///
/// Returns [`RelayError::Storage`] if the database is unreachable within
/// the configured acquire timeout.
pub async fn connect(config: &RelayConfig) -> Result<PgPool, RelayError> {
    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .min_connections(config.database_min_connections)
        .acquire_timeout(Duration::from_secs(config.database_connect_timeout_secs))
        .connect(&config.database_url)
        .await?;
    Ok(pool)
}
