//! Home Assistant WebSocket message types
//!
//! # Exchange
//!
//! ```text
//! server: {"type":"auth_required","ha_version":"2024.6.0"}
//! client: {"type":"auth","access_token":"..."}
//! server: {"type":"auth_ok"}
//! client: {"id":1,"type":"subscribe_events","event_type":"state_changed"}
//! server: {"id":1,"type":"result","success":true,"result":null}
//! server: {"id":1,"type":"event","event":{"event_type":"state_changed","data":{...}}}
//! client: {"id":2,"type":"ping"}
//! server: {"id":2,"type":"pong"}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Event type the client subscribes to
pub const STATE_CHANGED: &str = "state_changed";

/// Messages sent by the client
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    /// Answer to `auth_required`
    Auth {
        /// Long-lived access token
        access_token: String,
    },
    /// Subscribe to one event type
    SubscribeEvents {
        /// Correlation id
        id: u64,
        /// Event type filter
        event_type: String,
    },
    /// Application level keepalive
    Ping {
        /// Correlation id
        id: u64,
    },
}

impl OutboundMessage {
    /// Serialize to the JSON text frame payload
    ///
    /// # Errors
    ///
    /// Returns the serializer error (not expected for these shapes).
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Messages received from the server
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    /// First message of every connection
    AuthRequired {
        /// Server version, informational
        #[serde(default)]
        ha_version: Option<String>,
    },
    /// Token accepted
    AuthOk {
        /// Server version, informational
        #[serde(default)]
        ha_version: Option<String>,
    },
    /// Token rejected
    AuthInvalid {
        /// Reason given by the server
        #[serde(default)]
        message: Option<String>,
    },
    /// Reply to a command
    Result {
        /// Correlation id
        id: u64,
        /// Whether the command succeeded
        #[serde(default)]
        success: bool,
        /// Error details on failure
        #[serde(default)]
        error: Option<Value>,
    },
    /// Event pushed for a subscription
    Event {
        /// Subscription id
        id: u64,
        /// Event body
        event: EventBody,
    },
    /// Reply to a ping
    Pong {
        /// Correlation id
        id: u64,
    },
    /// Anything else
    #[serde(other)]
    Other,
}

/// Body of an `event` message
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct EventBody {
    /// Event type, `state_changed` for our subscription
    #[serde(default)]
    pub event_type: Option<String>,
    /// Event payload
    #[serde(default)]
    pub data: Value,
}

/// Snapshot of one entity's state
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityState {
    /// Entity id, e.g. `media_player.living_room`
    #[serde(default)]
    pub entity_id: String,
    /// State string (`playing`, `paused`, `idle`, ...)
    #[serde(default)]
    pub state: Option<String>,
    /// Entity attributes
    #[serde(default)]
    pub attributes: Map<String, Value>,
    /// Last state change timestamp
    #[serde(default)]
    pub last_changed: Option<String>,
    /// Last update timestamp
    #[serde(default)]
    pub last_updated: Option<String>,
}

impl EntityState {
    /// Whether the entity reports `playing` (case-insensitive)
    #[must_use]
    pub fn is_playing(&self) -> bool {
        self.state
            .as_deref()
            .is_some_and(|state| state.eq_ignore_ascii_case("playing"))
    }

    /// String attribute lookup
    #[must_use]
    pub fn attribute_str(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(Value::as_str)
    }

    /// Picture URL advertised by the entity, if any
    ///
    /// `entity_picture` wins over `entity_picture_local`; empty strings are
    /// ignored.
    #[must_use]
    pub fn picture_path(&self) -> Option<&str> {
        self.attribute_str("entity_picture")
            .filter(|s| !s.is_empty())
            .or_else(|| self.attribute_str("entity_picture_local").filter(|s| !s.is_empty()))
    }
}

/// Playing classification for an optional snapshot; absence is "not playing"
#[must_use]
pub fn is_playing(state: Option<&EntityState>) -> bool {
    state.is_some_and(EntityState::is_playing)
}

/// A decoded `state_changed` event
#[derive(Clone, Debug, PartialEq)]
pub struct StateChangeEvent {
    /// Entity that changed
    pub entity_id: String,
    /// State before the change
    pub old_state: Option<EntityState>,
    /// State after the change (`None` when the entity was removed)
    pub new_state: Option<EntityState>,
    /// Full message envelope as received
    pub raw: Value,
}

impl StateChangeEvent {
    /// Whether the new state is `playing`
    #[must_use]
    pub fn is_playing(&self) -> bool {
        is_playing(self.new_state.as_ref())
    }
}

/// Decode one streaming text frame
///
/// Returns `None` for anything that is not an event for `subscription_id`,
/// lacks an entity id, fails the optional `entity_filter`, or is not JSON.
#[must_use]
pub fn decode_event(
    text: &str,
    subscription_id: u64,
    entity_filter: Option<&str>,
) -> Option<StateChangeEvent> {
    let raw: Value = serde_json::from_str(text).ok()?;
    let InboundMessage::Event { id, event } = InboundMessage::deserialize(&raw).ok()? else {
        return None;
    };
    if id != subscription_id {
        return None;
    }

    let data = event.data.as_object()?;
    let entity_id = data
        .get("entity_id")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())?;
    if entity_filter.is_some_and(|wanted| wanted != entity_id) {
        return None;
    }

    let snapshot = |key: &str| {
        data.get(key)
            .filter(|v| !v.is_null())
            .and_then(|v| EntityState::deserialize(v).ok())
    };

    Some(StateChangeEvent {
        entity_id: entity_id.to_string(),
        old_state: snapshot("old_state"),
        new_state: snapshot("new_state"),
        raw,
    })
}
