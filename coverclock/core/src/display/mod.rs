//! Display Content
//!
//! Everything between "we know what to show" and "bytes reach the panel":
//! - [`clock`]: time-of-day frame index and sprite sheet cropping
//! - [`prepare`]: decode, rotate/mirror/invert and fit to the canvas
//! - [`fingerprint`]: content digests used for cover dedup
//! - [`sink`]: the output seam ([`DisplaySink`]) and a PNG file sink
//!
//! Frames are plain [`image::RgbImage`] buffers sized to the canvas.

pub mod clock;
pub mod fingerprint;
pub mod prepare;
pub mod sink;

pub use clock::{clock_index, LocalWallClock, SpriteSheet, WallClock, SPRITE_COUNT};
pub use fingerprint::ContentFingerprint;
pub use prepare::{prepare_bytes, prepare_image, FitMode, PrepareError, PrepareOptions};
pub use sink::{DisplaySink, PngFileSink, SinkError};
