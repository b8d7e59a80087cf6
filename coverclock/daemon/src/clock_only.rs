//! Clock-only mode
//!
//! Drives the display from the sprite sheet alone, without Home Assistant.
//! Useful for checking a sprite sheet and the display transforms.

use std::time::Duration;

use clap::ValueEnum;
use thiserror::Error;
use tokio::sync::watch;

use coverclock_core::display::{prepare_image, SPRITE_COUNT};
use coverclock_core::{
    clock_index, DisplaySink, PrepareError, PrepareOptions, SinkError, SpriteSheet, WallClock,
};

/// Which frame to show on each tick
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum ClockMode {
    /// Follow the time of day, sending only when the frame changes
    #[default]
    Realtime,
    /// Step through all 64 frames
    Cycle,
    /// Send one fixed frame and exit
    Index,
}

/// Errors that end a clock-only run
#[derive(Debug, Error)]
pub enum ClockError {
    /// The sprite could not be scaled to the canvas
    #[error(transparent)]
    Prepare(#[from] PrepareError),

    /// The display refused the frame
    #[error(transparent)]
    Sink(#[from] SinkError),
}

/// What to send and how often
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClockPlan {
    /// Frame selection
    pub mode: ClockMode,
    /// Frame for [`ClockMode::Index`]
    pub index: u8,
    /// First frame for [`ClockMode::Cycle`]
    pub start_index: u8,
    /// Frame increment for [`ClockMode::Cycle`], at least 1
    pub step: u8,
    /// Time between ticks
    pub interval: Duration,
    /// Stop after the first frame
    pub once: bool,
}

impl Default for ClockPlan {
    fn default() -> Self {
        Self {
            mode: ClockMode::Realtime,
            index: 0,
            start_index: 0,
            step: 1,
            interval: Duration::from_secs(1),
            once: false,
        }
    }
}

impl ClockPlan {
    /// Clamp indices into the sheet and the step to at least 1
    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.index = self.index.min(SPRITE_COUNT - 1);
        self.start_index = self.start_index.min(SPRITE_COUNT - 1);
        self.step = self.step.max(1);
        self
    }
}

/// Everything a run needs besides the plan
pub struct ClockFace<'a, D> {
    /// Validated sprite sheet
    pub sheet: &'a SpriteSheet,
    /// Canvas and transforms for sprites
    pub options: PrepareOptions,
    /// Frame destination
    pub sink: &'a mut D,
    /// Time source for realtime mode
    pub clock: &'a dyn WallClock,
    /// Delay handed to the sink per frame
    pub send_delay: Duration,
}

/// Run the plan until it completes or shutdown is signalled
///
/// Returns the number of frames sent.
///
/// # Errors
///
/// Stops at the first prepare or sink failure.
pub async fn run<D: DisplaySink>(
    plan: ClockPlan,
    face: ClockFace<'_, D>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<u64, ClockError> {
    let plan = plan.normalized();
    let ClockFace {
        sheet,
        options,
        sink,
        clock,
        send_delay,
    } = face;

    let mut sent = 0u64;
    let mut last_index: Option<u8> = None;
    let mut cycle_index = plan.start_index;

    tracing::info!(mode = ?plan.mode, sink = sink.name(), "Clock-only mode started");

    loop {
        if *shutdown.borrow() {
            break;
        }

        let index = match plan.mode {
            ClockMode::Index => plan.index,
            ClockMode::Cycle => {
                let current = cycle_index;
                let next = (u16::from(cycle_index) + u16::from(plan.step)) % u16::from(SPRITE_COUNT);
                cycle_index = u8::try_from(next).unwrap_or_default();
                current
            }
            ClockMode::Realtime => clock_index(clock.minute_of_day()),
        };

        if plan.mode != ClockMode::Realtime || last_index != Some(index) {
            let frame = prepare_image(sheet.frame(index), &options)?;
            sink.send(&frame, send_delay).await?;
            tracing::debug!(index, "Clock frame sent");
            last_index = Some(index);
            sent += 1;
        }

        if plan.once || plan.mode == ClockMode::Index {
            break;
        }

        tokio::select! {
            biased;
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            () = tokio::time::sleep(plan.interval) => {}
        }
    }

    tracing::info!(frames = sent, "Clock-only mode finished");
    Ok(sent)
}
