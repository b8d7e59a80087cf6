//! Display Orchestrator
//!
//! Decides what the display shows and pushes it through the sink. Three
//! triggers feed it:
//!
//! - [`WatchEvent`]s from the supervisor (connects, state changes, drops)
//! - the idle clock tick
//! - its own resync on startup
//!
//! # Render Lock
//!
//! One `tokio::sync::Mutex` guards the [`RenderState`] and the sink
//! together. Every decision (including the cover fetch it depends on) and
//! every send happens while holding it, so renders never overlap and state
//! always describes the frame that was last sent.
//!
//! # Cover Path
//!
//! ```text
//! in Cover and sent < min interval ago ──► skip (throttled, nothing fetched)
//! fetch picture ── failure ──────────────► clock path, forced
//! in Cover and same fingerprint ─────────► skip (unchanged)
//! prepare ── failure ────────────────────► clock path, forced
//! send ──► mode = Cover, fingerprint, timestamp, clock index cleared
//! ```
//!
//! `forced` does not bypass either skip on this path. A forced request for
//! the cover already on screen is skipped as unchanged even after the
//! minimum interval has passed, so two identical covers are never sent back
//! to back. Forcing only matters for the clock path.
//!
//! # Clock Path
//!
//! Renders unless already in Clock mode showing the same frame index and
//! the request is not forced.
//!
//! # Resync
//!
//! Resync fetches the entity state and re-renders. Its first render after
//! a discontinuity (startup, or any `Disconnected`) is forced; further
//! resyncs with nothing in between are ordinary, deduplicated renders.

use std::fmt;
use std::time::Duration;

use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::{Instant, MissedTickBehavior};

use crate::config::{WatchSettings, MIN_CLOCK_INTERVAL};
use crate::display::{
    clock_index, prepare_bytes, prepare_image, ContentFingerprint, DisplaySink, PrepareOptions,
    SpriteSheet, WallClock,
};
use crate::hass::supervisor::shutdown_requested;
use crate::hass::{StateSource, WatchEvent};

/// Which content currently owns the display
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DisplayMode {
    /// Sprite clock face
    #[default]
    Clock,
    /// Album cover
    Cover,
}

impl fmt::Display for DisplayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Clock => f.write_str("clock"),
            Self::Cover => f.write_str("cover"),
        }
    }
}

/// What was last sent to the display
///
/// `last_clock_frame_index` is `None` whenever `mode` is `Cover`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RenderState {
    /// Current mode
    pub mode: DisplayMode,
    /// Fingerprint of the last cover sent
    pub last_cover_fingerprint: Option<ContentFingerprint>,
    /// When the last cover was sent
    pub last_cover_sent_at: Option<Instant>,
    /// Clock frame index last sent while in Clock mode
    pub last_clock_frame_index: Option<u8>,
}

/// Why nothing was sent
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipReason {
    /// In Cover mode and inside the minimum cover interval
    Throttled,
    /// In Cover mode and the picture did not change
    UnchangedCover,
    /// In Clock mode and the frame index did not change
    UnchangedClockFrame,
    /// Idle tick while a cover is showing
    ShowingCover,
    /// Event for an entity other than the watched one
    OtherEntity,
}

/// Result of one render decision
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RenderOutcome {
    /// A cover was sent
    CoverSent(ContentFingerprint),
    /// A clock frame was sent
    ClockSent(u8),
    /// Nothing was sent
    Skipped(SkipReason),
    /// The sink rejected the frame; render state is unchanged
    SinkFailed,
    /// The clock frame could not be prepared; render state is unchanged
    PrepareFailed,
}

impl RenderOutcome {
    /// Whether a frame reached the sink
    #[must_use]
    pub fn is_sent(&self) -> bool {
        matches!(self, Self::CoverSent(_) | Self::ClockSent(_))
    }

    fn is_failure(&self) -> bool {
        matches!(self, Self::SinkFailed | Self::PrepareFailed)
    }
}

/// Orchestrator parameters
#[derive(Clone, Debug, PartialEq)]
pub struct OrchestratorConfig {
    /// Watched entity
    pub entity_id: String,
    /// Minimum time between two cover renders while in Cover mode
    pub min_cover_interval: Duration,
    /// Idle clock tick (floor 50 ms)
    pub clock_interval: Duration,
    /// Delay handed to every sink call
    pub send_delay: Duration,
    /// Preparation of cover art
    pub cover_options: PrepareOptions,
    /// Preparation of clock sprites
    pub clock_options: PrepareOptions,
}

impl OrchestratorConfig {
    /// Derive orchestrator parameters from validated settings
    #[must_use]
    pub fn from_settings(settings: &WatchSettings) -> Self {
        let timing = settings.timing.clamped();
        Self {
            entity_id: settings.hass.entity_id.clone(),
            min_cover_interval: timing.min_cover_interval,
            clock_interval: timing.clock_interval,
            send_delay: timing.send_delay,
            cover_options: settings.display.cover_options(),
            clock_options: settings.display.clock_options(),
        }
    }
}

struct RenderSlot<D> {
    state: RenderState,
    sink: D,
    resync_pending: bool,
}

/// Cover / clock state machine over one display sink
pub struct Orchestrator<S, D> {
    config: OrchestratorConfig,
    source: S,
    sprites: SpriteSheet,
    wall_clock: Box<dyn WallClock>,
    slot: Mutex<RenderSlot<D>>,
}

impl<S, D> Orchestrator<S, D>
where
    S: StateSource,
    D: DisplaySink,
{
    /// Create an orchestrator in Clock mode with no frame shown yet
    pub fn new(
        config: OrchestratorConfig,
        source: S,
        sink: D,
        sprites: SpriteSheet,
        wall_clock: impl WallClock + 'static,
    ) -> Self {
        Self {
            config,
            source,
            sprites,
            wall_clock: Box::new(wall_clock),
            slot: Mutex::new(RenderSlot {
                state: RenderState::default(),
                sink,
                resync_pending: true,
            }),
        }
    }

    /// Snapshot of the render state
    pub async fn render_state(&self) -> RenderState {
        self.slot.lock().await.state.clone()
    }

    /// Run the cover path
    pub async fn show_cover(&self, forced: bool) -> RenderOutcome {
        let mut slot = self.slot.lock().await;
        self.cover_locked(&mut slot, forced).await
    }

    /// Run the clock path
    pub async fn show_clock(&self, forced: bool) -> RenderOutcome {
        let mut slot = self.slot.lock().await;
        self.clock_locked(&mut slot, forced).await
    }

    /// Route a known play state to the cover or clock path
    pub async fn apply_state(&self, playing: bool, forced: bool) -> RenderOutcome {
        let mut slot = self.slot.lock().await;
        if playing {
            self.cover_locked(&mut slot, forced).await
        } else {
            self.clock_locked(&mut slot, forced).await
        }
    }

    /// Idle tick: advance the clock face while in Clock mode
    pub async fn idle_tick(&self) -> RenderOutcome {
        let mut slot = self.slot.lock().await;
        if slot.state.mode == DisplayMode::Cover {
            return RenderOutcome::Skipped(SkipReason::ShowingCover);
        }
        self.clock_locked(&mut slot, false).await
    }

    /// Fetch the entity state and render it, forced after a discontinuity
    pub async fn resync(&self) -> RenderOutcome {
        self.render_from_source(true).await
    }

    /// Fetch the entity state and render it without forcing
    pub async fn refresh(&self) -> RenderOutcome {
        self.render_from_source(false).await
    }

    /// React to one supervisor event
    pub async fn handle_event(&self, event: WatchEvent) -> RenderOutcome {
        match event {
            WatchEvent::Connected { epoch } => {
                tracing::info!(epoch, "Event feed connected, resyncing");
                self.resync().await
            }
            WatchEvent::StateChanged(change) => {
                if change.entity_id != self.config.entity_id {
                    return RenderOutcome::Skipped(SkipReason::OtherEntity);
                }
                self.apply_state(change.is_playing(), false).await
            }
            WatchEvent::Disconnected { epoch, reason } => {
                tracing::warn!(epoch, %reason, "Event feed disconnected, refreshing state");
                self.slot.lock().await.resync_pending = true;
                self.refresh().await
            }
        }
    }

    /// Main loop: initial resync, then events and idle ticks until shutdown
    ///
    /// Returns when shutdown is signalled or the event channel closes; a
    /// render in progress always completes first.
    pub async fn run(
        &self,
        mut events: mpsc::Receiver<WatchEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let outcome = self.resync().await;
        tracing::debug!(?outcome, "Initial resync");

        let period = self.config.clock_interval.max(MIN_CLOCK_INTERVAL);
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                () = shutdown_requested(&mut shutdown) => {
                    tracing::info!("Shutdown requested, orchestrator stopping");
                    break;
                }
                event = events.recv() => {
                    let Some(event) = event else {
                        tracing::info!("Event channel closed, orchestrator stopping");
                        break;
                    };
                    let outcome = self.handle_event(event).await;
                    tracing::debug!(?outcome, "Event handled");
                }
                _ = ticker.tick() => {
                    let outcome = self.idle_tick().await;
                    if outcome.is_sent() {
                        tracing::debug!(?outcome, "Clock advanced");
                    }
                }
            }
        }
    }

    async fn render_from_source(&self, resync: bool) -> RenderOutcome {
        let playing = match self.source.fetch_state(&self.config.entity_id).await {
            Ok(state) => Some(state.is_playing()),
            Err(e) => {
                tracing::warn!(
                    entity_id = %self.config.entity_id,
                    error = %e,
                    "State fetch failed, showing clock"
                );
                None
            }
        };

        let mut slot = self.slot.lock().await;
        let Some(playing) = playing else {
            return self.clock_locked(&mut slot, false).await;
        };

        let forced = resync && std::mem::take(&mut slot.resync_pending);
        let outcome = if playing {
            self.cover_locked(&mut slot, forced).await
        } else {
            self.clock_locked(&mut slot, forced).await
        };
        if forced && outcome.is_failure() {
            slot.resync_pending = true;
        }
        outcome
    }

    async fn cover_locked(&self, slot: &mut RenderSlot<D>, forced: bool) -> RenderOutcome {
        let in_cover = slot.state.mode == DisplayMode::Cover;

        if in_cover {
            if let Some(sent_at) = slot.state.last_cover_sent_at {
                let elapsed = sent_at.elapsed();
                if elapsed < self.config.min_cover_interval {
                    tracing::debug!(
                        elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                        forced,
                        "Cover render throttled"
                    );
                    return RenderOutcome::Skipped(SkipReason::Throttled);
                }
            }
        }

        let bytes = match self.source.fetch_picture(&self.config.entity_id).await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(error = %e, "Cover fetch failed, falling back to clock");
                return self.clock_locked(slot, true).await;
            }
        };

        let fingerprint = ContentFingerprint::of(&bytes);
        if in_cover && slot.state.last_cover_fingerprint == Some(fingerprint) {
            tracing::debug!(%fingerprint, forced, "Cover unchanged");
            return RenderOutcome::Skipped(SkipReason::UnchangedCover);
        }

        let options = self.config.cover_options;
        let prepared = tokio::task::spawn_blocking(move || prepare_bytes(&bytes, &options)).await;
        let frame = match prepared {
            Ok(Ok(frame)) => frame,
            Ok(Err(e)) => {
                tracing::warn!(%fingerprint, error = %e, "Cover could not be prepared, falling back to clock");
                return self.clock_locked(slot, true).await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Cover preparation aborted, falling back to clock");
                return self.clock_locked(slot, true).await;
            }
        };

        if let Err(e) = slot.sink.send(&frame, self.config.send_delay).await {
            tracing::warn!(sink = slot.sink.name(), error = %e, "Cover send failed");
            return RenderOutcome::SinkFailed;
        }

        slot.state = RenderState {
            mode: DisplayMode::Cover,
            last_cover_fingerprint: Some(fingerprint),
            last_cover_sent_at: Some(Instant::now()),
            last_clock_frame_index: None,
        };
        if in_cover {
            tracing::info!(%fingerprint, "Cover changed");
        } else {
            tracing::info!(%fingerprint, forced, "Showing cover");
        }
        RenderOutcome::CoverSent(fingerprint)
    }

    async fn clock_locked(&self, slot: &mut RenderSlot<D>, forced: bool) -> RenderOutcome {
        let index = clock_index(self.wall_clock.minute_of_day());
        let was_clock = slot.state.mode == DisplayMode::Clock;

        if !forced && was_clock && slot.state.last_clock_frame_index == Some(index) {
            tracing::trace!(index, "Clock frame unchanged");
            return RenderOutcome::Skipped(SkipReason::UnchangedClockFrame);
        }

        let frame = match prepare_image(self.sprites.frame(index), &self.config.clock_options) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!(index, error = %e, "Clock frame could not be prepared");
                return RenderOutcome::PrepareFailed;
            }
        };

        if let Err(e) = slot.sink.send(&frame, self.config.send_delay).await {
            tracing::warn!(sink = slot.sink.name(), index, error = %e, "Clock send failed");
            return RenderOutcome::SinkFailed;
        }

        slot.state.mode = DisplayMode::Clock;
        slot.state.last_clock_frame_index = Some(index);
        if was_clock {
            tracing::debug!(index, forced, "Clock frame sent");
        } else {
            tracing::info!(index, forced, "Showing clock");
        }
        RenderOutcome::ClockSent(index)
    }
}

impl<S, D> fmt::Debug for Orchestrator<S, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
