//! Connection Supervisor
//!
//! Keeps one `state_changed` subscription alive for the lifetime of the
//! daemon. Every connection attempt gets a new epoch; the supervisor
//! reports `Connected` once the subscription is confirmed, forwards
//! events, reports `Disconnected` when the connection ends for any reason,
//! waits a fixed delay and tries again.
//!
//! # Ordering
//!
//! Within one epoch events are forwarded in arrival order, always after
//! that epoch's `Connected`. Events of a failed epoch can never follow the
//! next epoch's `Connected`.
//!
//! # Shutdown
//!
//! The shutdown signal is observed while connecting, while streaming and
//! while sleeping between attempts. The supervisor also stops when the
//! event receiver is dropped.

use std::time::Duration;

use tokio::sync::{mpsc, watch};

use super::client::{EventSubscription, HassClient};
use super::error::ConnectionError;
use super::protocol::StateChangeEvent;

/// Lowest accepted delay between connection attempts
pub const MIN_RECONNECT_DELAY: Duration = Duration::from_millis(500);

/// Default delay between connection attempts
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// What the supervisor reports to the orchestrator
#[derive(Clone, Debug, PartialEq)]
pub enum WatchEvent {
    /// Subscription confirmed for a new connection epoch
    Connected {
        /// Connection attempt counter, starting at 1
        epoch: u64,
    },
    /// A matching `state_changed` event
    StateChanged(StateChangeEvent),
    /// The connection for `epoch` failed or was never established
    Disconnected {
        /// Epoch that ended
        epoch: u64,
        /// Human readable failure
        reason: String,
    },
}

enum SessionEnd {
    Failed(ConnectionError),
    ReceiverGone,
}

/// Reconnecting driver around [`HassClient`]
#[derive(Debug, Clone)]
pub struct Supervisor {
    client: HassClient,
    entity_filter: Option<String>,
    reconnect_delay: Duration,
}

impl Supervisor {
    /// Supervise subscriptions made through `client`
    pub fn new(client: HassClient, entity_filter: Option<String>) -> Self {
        Self {
            client,
            entity_filter,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
        }
    }

    /// Set the reconnect delay (clamped to [`MIN_RECONNECT_DELAY`])
    #[must_use]
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay.max(MIN_RECONNECT_DELAY);
        self
    }

    /// Effective reconnect delay
    #[must_use]
    pub fn reconnect_delay(&self) -> Duration {
        self.reconnect_delay
    }

    /// Run until shutdown is signalled or `events` is closed
    pub async fn run(&self, events: mpsc::Sender<WatchEvent>, mut shutdown: watch::Receiver<bool>) {
        let mut epoch = 0u64;

        loop {
            if *shutdown.borrow() {
                break;
            }
            epoch += 1;

            let end = tokio::select! {
                biased;
                () = shutdown_requested(&mut shutdown) => break,
                end = self.session(epoch, &events) => end,
            };

            match end {
                SessionEnd::ReceiverGone => {
                    tracing::debug!(epoch, "Event receiver dropped");
                    break;
                }
                SessionEnd::Failed(error) => {
                    tracing::warn!(
                        epoch,
                        error = %error,
                        protocol = error.is_protocol(),
                        retry_in_ms = u64::try_from(self.reconnect_delay.as_millis()).unwrap_or(u64::MAX),
                        "Event connection lost, reconnecting"
                    );
                    let report = WatchEvent::Disconnected {
                        epoch,
                        reason: error.to_string(),
                    };
                    if events.send(report).await.is_err() {
                        break;
                    }
                }
            }

            tokio::select! {
                biased;
                () = shutdown_requested(&mut shutdown) => break,
                () = tokio::time::sleep(self.reconnect_delay) => {}
            }
        }

        tracing::info!(epochs = epoch, "Connection supervisor stopped");
    }

    async fn session(&self, epoch: u64, events: &mpsc::Sender<WatchEvent>) -> SessionEnd {
        tracing::debug!(epoch, "Connecting to Home Assistant");
        let mut subscription = match self
            .client
            .subscribe_state_changed(self.entity_filter.as_deref())
            .await
        {
            Ok(subscription) => subscription,
            Err(e) => return SessionEnd::Failed(e),
        };

        if events.send(WatchEvent::Connected { epoch }).await.is_err() {
            subscription.close().await;
            return SessionEnd::ReceiverGone;
        }

        match stream_events(&mut subscription, events).await {
            Ok(()) => SessionEnd::ReceiverGone,
            Err(end) => end,
        }
    }
}

/// Forward events until the connection fails (`Err`) or the receiver is gone (`Ok`)
async fn stream_events(
    subscription: &mut EventSubscription,
    events: &mpsc::Sender<WatchEvent>,
) -> Result<(), SessionEnd> {
    loop {
        let event = subscription.next_event().await.map_err(SessionEnd::Failed)?;
        tracing::debug!(entity_id = %event.entity_id, playing = event.is_playing(), "State changed");
        if events.send(WatchEvent::StateChanged(event)).await.is_err() {
            return Ok(());
        }
    }
}

/// Resolves once shutdown is true or the sender is gone
pub(crate) async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}
