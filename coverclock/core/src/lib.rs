//! Coverclock Core - Cover Art / Clock Display Orchestration
//!
//! This crate decides what a single small display should show: the album
//! cover of a Home Assistant media player while it is playing, and a
//! sprite-sheet clock face otherwise. It is independent of the physical
//! display; finished frames are handed to a [`DisplaySink`].
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────┐   WatchEvent    ┌──────────────────────┐
//! │  Reconnect Supervisor│ ──────────────► │  Display Orchestrator│
//! │  ┌────────────────┐  │   (mpsc)        │  ┌────────────────┐  │
//! │  │  HassClient    │  │                 │  │  RenderState   │  │
//! │  │  (WebSocket)   │  │                 │  │  + DisplaySink │  │
//! │  └────────────────┘  │                 │  │  (one Mutex)   │  │
//! └──────────────────────┘                 │  └────────────────┘  │
//!                                          │        ▲   ▲         │
//!                 StateSource (REST) ──────┘        │   │ idle tick
//!                                                   │   │
//!                                          resync / fallback
//! ```
//!
//! # Key Types
//!
//! - [`HassClient`]: authenticated `state_changed` subscription with heartbeat
//! - [`Supervisor`]: keeps a subscription alive forever, emitting [`WatchEvent`]s
//! - [`Orchestrator`]: cover/clock state machine with dedup and throttling
//! - [`HttpStateSource`]: REST access to entity state and picture bytes
//! - [`WatchSettings`]: everything the core needs, supplied by the caller
//!
//! # Module Overview
//!
//! - [`hass`]: Home Assistant WebSocket client, supervisor and REST source
//! - [`display`]: clock sprites, image preparation, fingerprints, sinks
//! - [`orchestrator`]: render decisions and the main event loop
//! - [`config`]: validated settings with floor clamping
//!
//! The core never reads files or environment variables; the daemon does that.

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod display;
pub mod hass;
pub mod orchestrator;

// Re-exports for convenience
pub use config::{
    ConfigError, DisplaySettings, HassSettings, TimeZoneSetting, TimingSettings, WatchSettings,
};
pub use display::{
    clock_index, ContentFingerprint, DisplaySink, FitMode, LocalWallClock, PngFileSink,
    PrepareError, PrepareOptions, SinkError, SpriteSheet, WallClock,
};
pub use hass::{
    BaseUrl, ConnectionError, ConnectionState, EntityState, EventSubscription, FetchError,
    HassClient, HttpStateSource, StateChangeEvent, StateSource, Supervisor, WatchEvent,
};
pub use orchestrator::{
    DisplayMode, Orchestrator, OrchestratorConfig, RenderOutcome, RenderState, SkipReason,
};
