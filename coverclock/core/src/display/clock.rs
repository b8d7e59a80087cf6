//! Clock Face
//!
//! The clock is drawn from a sprite sheet laid out as an 8x8 grid of 16x16
//! sprites (64 frames covering a full day, midnight at frame 32). The frame
//! index is a pure function of the minute of day so that the orchestrator
//! can dedup clock renders by index equality.

use chrono::{FixedOffset, Local, Timelike, Utc};
use chrono_tz::Tz;
use image::{DynamicImage, RgbaImage};

use super::prepare::PrepareError;

/// Edge length of one sprite in pixels
pub const SPRITE_SIZE: u32 = 16;

/// Sprites per row in the sheet
pub const SPRITES_PER_ROW: u32 = 8;

/// Number of frames in a full day
pub const SPRITE_COUNT: u8 = 64;

const MINUTES_PER_DAY: u32 = 1440;

/// Frame index for a given minute of the day.
///
/// `floor(((m + 720) mod 1440) / 1440 * 64)`, clamped to `[0, 63]`. Values of
/// `m` beyond one day wrap.
#[must_use]
pub fn clock_index(minute_of_day: u32) -> u8 {
    let normalized = (minute_of_day % MINUTES_PER_DAY + MINUTES_PER_DAY / 2) % MINUTES_PER_DAY;
    let index = normalized * u32::from(SPRITE_COUNT) / MINUTES_PER_DAY;
    // Always < 64, the clamp keeps the contract explicit.
    u8::try_from(index.min(u32::from(SPRITE_COUNT) - 1)).unwrap_or(SPRITE_COUNT - 1)
}

/// Source of local time of day
///
/// Abstracted so tests can pin the clock face to a known frame.
pub trait WallClock: Send + Sync {
    /// Minutes since local midnight, `0..1440`
    fn minute_of_day(&self) -> u32;
}

/// Wall clock backed by the system time
#[derive(Clone, Copy, Debug, Default)]
pub struct LocalWallClock {
    zone: Zone,
}

#[derive(Clone, Copy, Debug, Default)]
enum Zone {
    #[default]
    Host,
    Offset(FixedOffset),
    Named(Tz),
}

impl LocalWallClock {
    /// Use the host's local timezone
    #[must_use]
    pub fn local() -> Self {
        Self { zone: Zone::Host }
    }

    /// Use a fixed UTC offset
    #[must_use]
    pub fn with_offset(offset: FixedOffset) -> Self {
        Self {
            zone: Zone::Offset(offset),
        }
    }

    /// Use a named IANA zone, following its DST rules
    #[must_use]
    pub fn in_zone(tz: Tz) -> Self {
        Self {
            zone: Zone::Named(tz),
        }
    }

    fn minute_at(&self, utc: chrono::DateTime<Utc>) -> u32 {
        let (hour, minute) = match self.zone {
            Zone::Host => {
                let local = utc.with_timezone(&Local);
                (local.hour(), local.minute())
            }
            Zone::Offset(offset) => {
                let local = utc.with_timezone(&offset);
                (local.hour(), local.minute())
            }
            Zone::Named(tz) => {
                let local = utc.with_timezone(&tz);
                (local.hour(), local.minute())
            }
        };
        hour * 60 + minute
    }
}

impl WallClock for LocalWallClock {
    fn minute_of_day(&self) -> u32 {
        self.minute_at(Utc::now())
    }
}

/// A validated clock sprite sheet
#[derive(Clone, Debug)]
pub struct SpriteSheet {
    sheet: RgbaImage,
}

impl SpriteSheet {
    /// Wrap a decoded sheet, checking it is large enough for all 64 sprites
    ///
    /// # Errors
    ///
    /// Returns [`PrepareError::SpriteSheetTooSmall`] if the sheet is smaller
    /// than 128x128.
    pub fn new(sheet: RgbaImage) -> Result<Self, PrepareError> {
        let min_width = SPRITE_SIZE * SPRITES_PER_ROW;
        let min_height = SPRITE_SIZE * (u32::from(SPRITE_COUNT) / SPRITES_PER_ROW);
        if sheet.width() < min_width || sheet.height() < min_height {
            return Err(PrepareError::SpriteSheetTooSmall {
                width: sheet.width(),
                height: sheet.height(),
                min_width,
                min_height,
            });
        }
        Ok(Self { sheet })
    }

    /// Decode a sheet from encoded image bytes
    ///
    /// # Errors
    ///
    /// Returns [`PrepareError::Decode`] for unreadable bytes, or
    /// [`PrepareError::SpriteSheetTooSmall`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PrepareError> {
        let sheet = image::load_from_memory(bytes)?.to_rgba8();
        Self::new(sheet)
    }

    /// Crop the sprite for a frame index (clamped to `[0, 63]`)
    #[must_use]
    pub fn frame(&self, index: u8) -> DynamicImage {
        let index = u32::from(index.min(SPRITE_COUNT - 1));
        let left = (index % SPRITES_PER_ROW) * SPRITE_SIZE;
        let top = (index / SPRITES_PER_ROW) * SPRITE_SIZE;
        let sprite = image::imageops::crop_imm(&self.sheet, left, top, SPRITE_SIZE, SPRITE_SIZE);
        DynamicImage::ImageRgba8(sprite.to_image())
    }
}
