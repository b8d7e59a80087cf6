//! Home Assistant WebSocket Client
//!
//! One [`HassClient::subscribe_state_changed`] call produces one
//! [`EventSubscription`]: a single authenticated connection that yields
//! `state_changed` events until it fails. Subscriptions are not resumable;
//! the [`Supervisor`](super::Supervisor) builds a fresh one after every
//! failure.
//!
//! # Connection Lifecycle
//!
//! ```text
//! Disconnected → Connecting → AwaitingAuthChallenge → Authenticating
//!              → Subscribing → Streaming → Closed
//! ```
//!
//! Any protocol violation or transport error moves straight to `Closed`.
//!
//! # Heartbeat
//!
//! While streaming, a background task sends `{"type":"ping"}` every
//! heartbeat interval. Ping failures stop the heartbeat only; a dead socket
//! surfaces through [`EventSubscription::next_event`]. Correlation ids come
//! from one per-connection counter starting at 1, shared by the subscribe
//! request and every ping.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use super::error::ConnectionError;
use super::protocol::{decode_event, InboundMessage, OutboundMessage, StateChangeEvent, STATE_CHANGED};
use super::url::BaseUrl;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWriter = Arc<Mutex<SplitSink<WsStream, Message>>>;

/// Lowest accepted heartbeat interval
pub const MIN_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// Default heartbeat interval
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Default bound on connect + auth + subscribe
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Lifecycle of one event connection
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// Nothing attempted yet
    Disconnected,
    /// TCP / TLS / WebSocket upgrade in progress
    Connecting,
    /// Waiting for `auth_required`
    AwaitingAuthChallenge,
    /// Token sent, waiting for `auth_ok`
    Authenticating,
    /// Subscribe sent, waiting for the result
    Subscribing,
    /// Yielding events
    Streaming,
    /// Finished; the connection cannot be reused
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::AwaitingAuthChallenge => "awaiting_auth_challenge",
            Self::Authenticating => "authenticating",
            Self::Subscribing => "subscribing",
            Self::Streaming => "streaming",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Factory for authenticated `state_changed` subscriptions
#[derive(Clone)]
pub struct HassClient {
    base_url: BaseUrl,
    token: String,
    heartbeat_interval: Duration,
    handshake_timeout: Duration,
}

impl fmt::Debug for HassClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HassClient")
            .field("base_url", &self.base_url)
            .field("token", &"<redacted>")
            .field("heartbeat_interval", &self.heartbeat_interval)
            .field("handshake_timeout", &self.handshake_timeout)
            .finish()
    }
}

impl HassClient {
    /// Create a client for a Home Assistant instance
    pub fn new(base_url: BaseUrl, token: impl Into<String>) -> Self {
        Self {
            base_url,
            token: token.into(),
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }

    /// Set the heartbeat interval (clamped to [`MIN_HEARTBEAT_INTERVAL`])
    #[must_use]
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval.max(MIN_HEARTBEAT_INTERVAL);
        self
    }

    /// Set the handshake timeout
    #[must_use]
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Effective heartbeat interval
    #[must_use]
    pub fn heartbeat_interval(&self) -> Duration {
        self.heartbeat_interval
    }

    /// Base URL this client connects to
    #[must_use]
    pub fn base_url(&self) -> &BaseUrl {
        &self.base_url
    }

    /// Heartbeat below the production floor, for fast tests
    #[cfg(test)]
    pub(crate) fn with_unclamped_heartbeat(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Connect, authenticate and subscribe to `state_changed`
    ///
    /// `entity_filter` restricts yielded events to one entity; the server
    /// side subscription stays entity-agnostic.
    ///
    /// # Errors
    ///
    /// Returns a [`ConnectionError`] if any handshake step fails or the
    /// handshake exceeds its timeout.
    pub async fn subscribe_state_changed(
        &self,
        entity_filter: Option<&str>,
    ) -> Result<EventSubscription, ConnectionError> {
        let timeout = self.handshake_timeout;
        tokio::time::timeout(timeout, self.handshake(entity_filter))
            .await
            .map_err(|_| ConnectionError::HandshakeTimeout(timeout))?
    }

    async fn handshake(
        &self,
        entity_filter: Option<&str>,
    ) -> Result<EventSubscription, ConnectionError> {
        let mut state = ConnectionState::Disconnected;
        let url = self.base_url.websocket_url();

        transition(&mut state, ConnectionState::Connecting);
        let (mut ws, _response) = tokio_tungstenite::connect_async(url.as_str()).await?;

        transition(&mut state, ConnectionState::AwaitingAuthChallenge);
        match recv_message(&mut ws).await? {
            InboundMessage::AuthRequired { ha_version } => {
                tracing::debug!(?ha_version, "Auth challenge received");
            }
            other => {
                close_quietly(&mut ws).await;
                return Err(ConnectionError::Protocol(format!(
                    "unexpected first message: {other:?}"
                )));
            }
        }

        transition(&mut state, ConnectionState::Authenticating);
        send_message(
            &mut ws,
            &OutboundMessage::Auth {
                access_token: self.token.clone(),
            },
        )
        .await?;
        match recv_message(&mut ws).await? {
            InboundMessage::AuthOk { ha_version } => {
                tracing::debug!(?ha_version, "Authenticated");
            }
            InboundMessage::AuthInvalid { message } => {
                close_quietly(&mut ws).await;
                return Err(ConnectionError::AuthFailed(
                    message.unwrap_or_else(|| "auth_invalid".to_string()),
                ));
            }
            other => {
                close_quietly(&mut ws).await;
                return Err(ConnectionError::AuthFailed(format!(
                    "unexpected auth reply: {other:?}"
                )));
            }
        }

        transition(&mut state, ConnectionState::Subscribing);
        let request_ids = Arc::new(AtomicU64::new(1));
        let subscription_id = request_ids.fetch_add(1, Ordering::SeqCst);
        send_message(
            &mut ws,
            &OutboundMessage::SubscribeEvents {
                id: subscription_id,
                event_type: STATE_CHANGED.to_string(),
            },
        )
        .await?;
        match recv_message(&mut ws).await? {
            InboundMessage::Result {
                id, success: true, ..
            } if id == subscription_id => {}
            other => {
                close_quietly(&mut ws).await;
                return Err(ConnectionError::SubscribeFailed(format!("{other:?}")));
            }
        }

        transition(&mut state, ConnectionState::Streaming);
        let (writer, reader) = ws.split();
        let writer = Arc::new(Mutex::new(writer));
        let heartbeat = tokio::spawn(heartbeat_loop(
            Arc::clone(&writer),
            Arc::clone(&request_ids),
            self.heartbeat_interval,
        ));

        tracing::info!(
            url = %url,
            subscription_id,
            entity_filter = ?entity_filter,
            "Subscribed to state_changed events"
        );

        Ok(EventSubscription {
            subscription_id,
            entity_filter: entity_filter.map(str::to_string),
            reader,
            writer,
            heartbeat,
            request_ids,
            state,
        })
    }
}

/// One live `state_changed` subscription
///
/// Dropping the subscription aborts the heartbeat and drops the socket;
/// [`close`](Self::close) additionally sends a close frame.
pub struct EventSubscription {
    subscription_id: u64,
    entity_filter: Option<String>,
    reader: SplitStream<WsStream>,
    writer: WsWriter,
    heartbeat: JoinHandle<()>,
    request_ids: Arc<AtomicU64>,
    state: ConnectionState,
}

impl EventSubscription {
    /// Correlation id of the subscribe request
    #[must_use]
    pub fn subscription_id(&self) -> u64 {
        self.subscription_id
    }

    /// Current connection state (`Streaming` or `Closed`)
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Number of correlation ids handed out so far
    #[must_use]
    pub fn requests_issued(&self) -> u64 {
        self.request_ids.load(Ordering::SeqCst) - 1
    }

    /// Wait for the next matching event
    ///
    /// Messages that are not events for this subscription (pongs, results,
    /// foreign subscriptions, other entities) are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::Closed`] when the server closes the
    /// connection or the stream ends, and [`ConnectionError::Transport`] on
    /// read failures. The subscription is unusable afterwards.
    pub async fn next_event(&mut self) -> Result<StateChangeEvent, ConnectionError> {
        if self.state == ConnectionState::Closed {
            return Err(ConnectionError::Closed);
        }

        loop {
            let frame = match self.reader.next().await {
                Some(Ok(frame)) => frame,
                Some(Err(e)) => {
                    self.mark_closed();
                    return Err(e.into());
                }
                None => {
                    self.mark_closed();
                    return Err(ConnectionError::Closed);
                }
            };

            match frame {
                Message::Text(text) => {
                    if let Some(event) = decode_event(
                        &text,
                        self.subscription_id,
                        self.entity_filter.as_deref(),
                    ) {
                        return Ok(event);
                    }
                    tracing::trace!(len = text.len(), "Discarded message");
                }
                Message::Close(frame) => {
                    tracing::debug!(?frame, "Server closed the event connection");
                    self.mark_closed();
                    return Err(ConnectionError::Closed);
                }
                _ => {}
            }
        }
    }

    /// Stop the heartbeat and close the connection
    ///
    /// Close failures are ignored; the socket may already be gone.
    pub async fn close(mut self) {
        self.mark_closed();
        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.close().await {
            tracing::trace!(error = %e, "Ignoring close failure");
        }
    }

    fn mark_closed(&mut self) {
        if self.state != ConnectionState::Closed {
            tracing::debug!(from = %self.state, "Event connection closed");
        }
        self.state = ConnectionState::Closed;
        self.heartbeat.abort();
    }
}

impl Drop for EventSubscription {
    fn drop(&mut self) {
        self.heartbeat.abort();
    }
}

impl fmt::Debug for EventSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSubscription")
            .field("subscription_id", &self.subscription_id)
            .field("entity_filter", &self.entity_filter)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

fn transition(state: &mut ConnectionState, next: ConnectionState) {
    tracing::debug!(from = %state, to = %next, "Event connection state");
    *state = next;
}

async fn send_message(ws: &mut WsStream, message: &OutboundMessage) -> Result<(), ConnectionError> {
    let payload = message
        .to_json()
        .map_err(|e| ConnectionError::Protocol(format!("failed to encode request: {e}")))?;
    ws.send(Message::Text(payload)).await?;
    Ok(())
}

/// Next text message during the handshake; control frames are skipped
async fn recv_message(ws: &mut WsStream) -> Result<InboundMessage, ConnectionError> {
    loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => {
                return serde_json::from_str(&text).map_err(|e| {
                    ConnectionError::Protocol(format!("malformed message ({e}): {text}"))
                });
            }
            Some(Ok(Message::Close(_))) | None => return Err(ConnectionError::Closed),
            Some(Ok(_)) => {}
            Some(Err(e)) => return Err(e.into()),
        }
    }
}

async fn close_quietly(ws: &mut WsStream) {
    if let Err(e) = ws.close(None).await {
        tracing::trace!(error = %e, "Ignoring close failure");
    }
}

async fn heartbeat_loop(writer: WsWriter, request_ids: Arc<AtomicU64>, interval: Duration) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let id = request_ids.fetch_add(1, Ordering::SeqCst);
        let Ok(payload) = (OutboundMessage::Ping { id }).to_json() else {
            return;
        };
        let result = writer.lock().await.send(Message::Text(payload)).await;
        if let Err(e) = result {
            tracing::debug!(error = %e, id, "Heartbeat ping failed, stopping heartbeat");
            return;
        }
        tracing::trace!(id, "Heartbeat ping sent");
    }
}
