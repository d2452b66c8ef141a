//! Long-lived LISTEN subscription with automatic reconnection.
//!
//! Each subscription runs as one background task owning a dedicated
//! connection (never drawn from the shared pool; it must block awaiting
//! server-initiated pushes). Connection errors are never surfaced to the
//! caller: the task logs, waits a fixed backoff, and resubscribes. The
//! state machine is `Disconnected → Connecting → Listening ⇄ Delivering`
//! with terminal `Stopped`, observable through a watch channel.

use std::time::Duration;

use sqlx::postgres::PgListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Connection settings for one subscription.
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// PostgreSQL connection string for the dedicated connection.
    pub database_url: String,
    /// Fixed delay before a dropped connection is reopened.
    pub backoff: Duration,
}

/// Observable state of a listener task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    /// No connection; either just created or after a connection error.
    Disconnected,
    /// Opening the dedicated connection and issuing LISTEN.
    Connecting,
    /// Blocked awaiting the next notification.
    Listening,
    /// Invoking the subscriber callback.
    Delivering,
    /// Terminal: the owning handle was stopped or dropped.
    Stopped,
}

impl ListenerState {
    /// Returns a stable label for logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Listening => "listening",
            Self::Delivering => "delivering",
            Self::Stopped => "stopped",
        }
    }
}

impl std::fmt::Display for ListenerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Handle owning one subscription task.
///
/// Dropping the handle without calling [`ListenerHandle::stop`] also
/// cancels the task (the shutdown channel closes), it just does not wait
/// for it to finish.
#[derive(Debug)]
pub struct ListenerHandle {
    shutdown: watch::Sender<bool>,
    state: watch::Receiver<ListenerState>,
    task: JoinHandle<()>,
}

impl ListenerHandle {
    /// Returns the listener's current state.
    #[must_use]
    pub fn state(&self) -> ListenerState {
        *self.state.borrow()
    }

    /// Returns a watch receiver for awaiting state transitions.
    #[must_use]
    pub fn state_watch(&self) -> watch::Receiver<ListenerState> {
        self.state.clone()
    }

    /// Stops the subscription: signals shutdown, closes the connection
    /// promptly, and waits for the task to finish. Returns the terminal
    /// state.
    pub async fn stop(self) -> ListenerState {
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
        *self.state.borrow()
    }
}

/// Opens a subscription on `channel` and returns its handle.
///
/// `callback` is invoked synchronously on the listener task for each
/// inbound notification payload. It must enqueue work, not perform it,
/// since it blocks delivery of the next notification.
pub fn subscribe<F>(config: ListenerConfig, channel: &str, callback: F) -> ListenerHandle
where
    F: Fn(&str) + Send + 'static,
{
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (state_tx, state_rx) = watch::channel(ListenerState::Disconnected);
    let channel = channel.to_string();
    let task = tokio::spawn(run(config, channel, callback, state_tx, shutdown_rx));
    ListenerHandle {
        shutdown: shutdown_tx,
        state: state_rx,
        task,
    }
}

/// Stops a subscription. Equivalent to [`ListenerHandle::stop`].
pub async fn unsubscribe(handle: ListenerHandle) {
    let _ = handle.stop().await;
}

async fn run<F>(
    config: ListenerConfig,
    channel: String,
    callback: F,
    state: watch::Sender<ListenerState>,
    mut shutdown: watch::Receiver<bool>,
) where
    F: Fn(&str) + Send + 'static,
{
    'reconnect: loop {
        if *shutdown.borrow() {
            break;
        }
        let _ = state.send(ListenerState::Connecting);

        match open(&config, &channel).await {
            Ok(mut listener) => {
                let _ = state.send(ListenerState::Listening);
                tracing::info!(channel, "listening");

                loop {
                    tokio::select! {
                        changed = shutdown.changed() => {
                            // A closed shutdown channel means the handle
                            // is gone; stop either way.
                            if changed.is_err() || *shutdown.borrow() {
                                break 'reconnect;
                            }
                        }
                        notification = listener.recv() => {
                            match notification {
                                Ok(n) => {
                                    let _ = state.send(ListenerState::Delivering);
                                    callback(n.payload());
                                    let _ = state.send(ListenerState::Listening);
                                }
                                Err(err) => {
                                    tracing::warn!(channel, %err, "listener connection lost");
                                    break;
                                }
                            }
                        }
                    }
                }
            }
            Err(err) => {
                tracing::warn!(channel, %err, "listener connect failed");
            }
        }

        let _ = state.send(ListenerState::Disconnected);
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break 'reconnect;
                }
            }
            () = tokio::time::sleep(config.backoff) => {}
        }
    }

    let _ = state.send(ListenerState::Stopped);
    tracing::debug!(channel, "listener stopped");
}

/// Opens the dedicated connection and issues LISTEN. The connection is
/// torn down and rebuilt from scratch on every error, so reconnection
/// policy stays in [`run`] rather than inside the driver.
async fn open(config: &ListenerConfig, channel: &str) -> Result<PgListener, sqlx::Error> {
    let mut listener = PgListener::connect(&config.database_url).await?;
    listener.listen(channel).await?;
    Ok(listener)
}

#[cfg(test)]
#[allow(clippy::panic, clippy::unwrap_used)]
mod tests {
    use super::*;

    fn unreachable_config() -> ListenerConfig {
        // Port 1 refuses immediately; the task should cycle through
        // Connecting/Disconnected without ever surfacing an error.
        ListenerConfig {
            database_url: "postgres://nobody@127.0.0.1:1/nothing".to_string(),
            backoff: Duration::from_millis(10),
        }
    }

    #[test]
    fn state_labels_are_stable() {
        assert_eq!(ListenerState::Listening.as_str(), "listening");
        assert_eq!(ListenerState::Stopped.to_string(), "stopped");
    }

    #[tokio::test]
    async fn connect_failures_keep_retrying_without_surfacing() {
        let handle = subscribe(unreachable_config(), "events", |_payload| {});
        tokio::time::sleep(Duration::from_millis(100)).await;
        // Still cycling, not dead.
        assert_ne!(handle.state(), ListenerState::Stopped);
        let final_state = tokio::time::timeout(Duration::from_secs(5), handle.stop())
            .await
            .unwrap();
        assert_eq!(final_state, ListenerState::Stopped);
    }

    #[tokio::test]
    async fn stop_is_prompt_even_mid_backoff() {
        let config = ListenerConfig {
            backoff: Duration::from_secs(3600),
            ..unreachable_config()
        };
        let handle = subscribe(config, "instance-state", |_payload| {});
        tokio::time::sleep(Duration::from_millis(50)).await;
        let final_state = tokio::time::timeout(Duration::from_secs(5), handle.stop())
            .await
            .unwrap();
        assert_eq!(final_state, ListenerState::Stopped);
    }

    #[tokio::test]
    async fn unsubscribe_consumes_the_handle() {
        let handle = subscribe(unreachable_config(), "events", |_payload| {});
        tokio::time::timeout(Duration::from_secs(5), unsubscribe(handle))
            .await
            .unwrap();
    }
}
