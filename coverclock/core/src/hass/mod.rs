//! Home Assistant Integration
//!
//! Two independent channels to the same Home Assistant instance:
//!
//! - **Push** ([`client`], [`supervisor`]): an authenticated WebSocket
//!   subscription to `state_changed` events, kept alive forever by the
//!   [`Supervisor`] and surfaced as [`WatchEvent`]s.
//! - **Pull** ([`rest`]): synchronous state and picture fetches through a
//!   [`StateSource`], used for resync and cover art.
//!
//! # Failure Domains
//!
//! Connection failures ([`ConnectionError`]) only ever end one connection;
//! the supervisor is the sole retry authority. Fetch failures
//! ([`FetchError`]) only ever end one render decision.

pub mod client;
pub mod error;
pub mod protocol;
pub mod rest;
pub mod supervisor;
pub mod url;

#[cfg(test)]
pub(crate) mod test_utils;

pub use client::{ConnectionState, EventSubscription, HassClient};
pub use error::{ConnectionError, FetchError};
pub use protocol::{decode_event, is_playing, EntityState, StateChangeEvent};
pub use rest::{HttpStateSource, StateSource};
pub use supervisor::{Supervisor, WatchEvent};
pub use url::BaseUrl;
