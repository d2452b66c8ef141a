//! fleet-relay service entry point.
//!
//! Registers this instance, starts the channel listeners, heartbeat, and
//! sweeper, then runs until ctrl-c.

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use fleet_relay::config::RelayConfig;
use fleet_relay::db;
use fleet_relay::notify::{
    self, EVENTS_CHANNEL, INSTANCE_STATE_CHANNEL, InstanceStatePayload, ListenerConfig,
};
use fleet_relay::persistence::{EventStore, InstanceStore};
use fleet_relay::service::{EventService, InstanceService};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration
    let config = RelayConfig::from_env().context("loading configuration")?;
    tracing::info!(instance = %config.instance_id, "starting fleet-relay");

    // Connect and migrate
    let pool = db::connect(&config).await.context("connecting to database")?;
    sqlx::migrate!()
        .run(&pool)
        .await
        .context("applying migrations")?;

    // Build stores and services
    let event_store = EventStore::new(pool.clone());
    let instance_store = InstanceStore::new(pool.clone(), config.notify_ids_per_payload);
    let event_service = EventService::new(pool.clone(), event_store);
    let instance_service = InstanceService::new(pool.clone(), instance_store);

    // Register this instance (not yet ready)
    let instance = instance_service.register(&config.instance_id).await?;
    tracing::info!(instance = %instance.id, "instance registered");

    let listener_config = ListenerConfig {
        database_url: config.database_url.clone(),
        backoff: config.listener_backoff,
    };

    // Readiness transitions from other instances
    let state_listener = notify::subscribe(
        listener_config.clone(),
        INSTANCE_STATE_CHANNEL,
        |payload| match InstanceStatePayload::parse(payload) {
            Ok(state) => tracing::info!(
                transition = %state.transition,
                count = state.ids.len(),
                "instance state changed"
            ),
            Err(err) => tracing::warn!(%err, "ignoring malformed state payload"),
        },
    );

    // Outbox wake-ups: the callback only enqueues; a drain task runs the
    // catch-up scan.
    let (wake_tx, mut wake_rx) = tokio::sync::mpsc::unbounded_channel::<String>();
    let event_listener = notify::subscribe(listener_config, EVENTS_CHANNEL, move |payload| {
        let _ = wake_tx.send(payload.to_string());
    });
    let catch_up = {
        let event_service = event_service.clone();
        tokio::spawn(async move {
            while wake_rx.recv().await.is_some() {
                // One scan covers every wake-up received so far.
                while wake_rx.try_recv().is_ok() {}
                match event_service.catch_up().await {
                    Ok(pending) => tracing::debug!(pending = pending.len(), "catch-up scan"),
                    Err(err) => tracing::warn!(%err, "catch-up scan failed"),
                }
            }
        })
    };

    // Listeners are up; announce readiness and keep it fresh
    instance_service
        .mark_ready(std::slice::from_ref(&config.instance_id))
        .await?;
    let heartbeat =
        instance_service.spawn_heartbeat(config.instance_id.clone(), config.heartbeat_interval);
    let sweeper = event_service.spawn_sweeper(config.sweep_interval);

    tracing::info!(instance = %config.instance_id, "ready");
    tokio::signal::ctrl_c().await.context("awaiting ctrl-c")?;
    tracing::info!("shutting down");

    heartbeat.abort();
    sweeper.abort();
    if let Err(err) = instance_service
        .mark_unready(std::slice::from_ref(&config.instance_id))
        .await
    {
        tracing::warn!(%err, "could not mark instance unready");
    }
    notify::unsubscribe(state_listener).await;
    notify::unsubscribe(event_listener).await;
    catch_up.abort();

    Ok(())
}
