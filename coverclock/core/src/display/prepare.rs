//! Image Preparation
//!
//! Turns raw cover bytes (or a clock sprite) into a canvas-sized RGB frame:
//! convert to RGB, rotate, mirror, invert, then fit to the canvas.

use std::fmt;
use std::str::FromStr;

use image::imageops::FilterType;
use image::{DynamicImage, RgbImage};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced while decoding or preparing an image
#[derive(Debug, Error)]
pub enum PrepareError {
    /// The bytes could not be decoded as an image
    #[error("Failed to decode image: {0}")]
    Decode(#[from] image::ImageError),

    /// The clock sprite sheet cannot hold 64 sprites
    #[error(
        "Sprite sheet is too small ({width}x{height}), expected at least {min_width}x{min_height}"
    )]
    SpriteSheetTooSmall {
        /// Actual width
        width: u32,
        /// Actual height
        height: u32,
        /// Required width
        min_width: u32,
        /// Required height
        min_height: u32,
    },

    /// The canvas has a zero dimension
    #[error("Invalid canvas size {0}x{1}")]
    InvalidCanvas(u32, u32),
}

/// How an image is mapped onto the canvas
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FitMode {
    /// Stretch to the canvas, ignoring aspect ratio
    Scale,
    /// Preserve aspect ratio inside the canvas, letterboxed with black
    #[default]
    Fit,
    /// Preserve aspect ratio and fill the canvas, cropping the overflow
    Cover,
}

impl fmt::Display for FitMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scale => write!(f, "scale"),
            Self::Fit => write!(f, "fit"),
            Self::Cover => write!(f, "cover"),
        }
    }
}

impl FromStr for FitMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "scale" => Ok(Self::Scale),
            "fit" => Ok(Self::Fit),
            "cover" => Ok(Self::Cover),
            other => Err(format!(
                "unknown fit mode '{other}' (expected scale, fit or cover)"
            )),
        }
    }
}

/// Parameters for [`prepare_image`]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PrepareOptions {
    /// Target canvas width
    pub width: u32,
    /// Target canvas height
    pub height: u32,
    /// Fit mode
    pub fit: FitMode,
    /// Counter-clockwise rotation in degrees, taken modulo 360
    pub rotate: u16,
    /// Mirror horizontally
    pub mirror: bool,
    /// Invert colors
    pub invert: bool,
    /// Resampling filter
    pub filter: FilterType,
}

impl PrepareOptions {
    /// Options for a canvas with default transforms
    #[must_use]
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            fit: FitMode::default(),
            rotate: 0,
            mirror: false,
            invert: false,
            filter: FilterType::Lanczos3,
        }
    }

    /// Set the fit mode
    #[must_use]
    pub fn with_fit(mut self, fit: FitMode) -> Self {
        self.fit = fit;
        self
    }

    /// Set the rotation in degrees
    #[must_use]
    pub fn with_rotate(mut self, rotate: u16) -> Self {
        self.rotate = rotate;
        self
    }

    /// Set mirror / invert flags
    #[must_use]
    pub fn with_flags(mut self, mirror: bool, invert: bool) -> Self {
        self.mirror = mirror;
        self.invert = invert;
        self
    }

    /// Set the resampling filter
    #[must_use]
    pub fn with_filter(mut self, filter: FilterType) -> Self {
        self.filter = filter;
        self
    }
}

/// Decode raw bytes and prepare them for the canvas
///
/// # Errors
///
/// Returns [`PrepareError`] if the bytes are not an image or the options are
/// invalid.
pub fn prepare_bytes(bytes: &[u8], options: &PrepareOptions) -> Result<RgbImage, PrepareError> {
    let decoded = image::load_from_memory(bytes)?;
    prepare_image(decoded, options)
}

/// Prepare a decoded image for the canvas
///
/// # Errors
///
/// Returns [`PrepareError::InvalidCanvas`] for a zero-sized canvas.
pub fn prepare_image(
    source: DynamicImage,
    options: &PrepareOptions,
) -> Result<RgbImage, PrepareError> {
    if options.width == 0 || options.height == 0 {
        return Err(PrepareError::InvalidCanvas(options.width, options.height));
    }

    let mut image = DynamicImage::ImageRgb8(source.to_rgb8());

    // image rotates clockwise, the configured angle is counter-clockwise
    image = match options.rotate % 360 {
        0 => image,
        90 => image.rotate270(),
        180 => image.rotate180(),
        270 => image.rotate90(),
        degrees => DynamicImage::ImageRgb8(rotate_in_place(&image.to_rgb8(), degrees)),
    };

    if options.mirror {
        image = image.fliph();
    }
    if options.invert {
        image.invert();
    }

    let (width, height) = (options.width, options.height);
    let fitted = match options.fit {
        FitMode::Scale => image.resize_exact(width, height, options.filter).to_rgb8(),
        FitMode::Cover => image
            .resize_to_fill(width, height, options.filter)
            .to_rgb8(),
        FitMode::Fit => {
            let inner = image.resize(width, height, options.filter).to_rgb8();
            let mut canvas = RgbImage::new(width, height);
            let x = (width - inner.width()) / 2;
            let y = (height - inner.height()) / 2;
            image::imageops::overlay(&mut canvas, &inner, i64::from(x), i64::from(y));
            canvas
        }
    };

    Ok(fitted)
}

/// Rotate counter-clockwise about the centre, keeping the image size
///
/// Nearest-neighbour sampling; corners uncovered by the source are black.
fn rotate_in_place(source: &RgbImage, degrees: u16) -> RgbImage {
    let (width, height) = source.dimensions();
    let (sin, cos) = f64::from(degrees).to_radians().sin_cos();
    let cx = f64::from(width) / 2.0;
    let cy = f64::from(height) / 2.0;

    RgbImage::from_fn(width, height, |x, y| {
        let dx = f64::from(x) + 0.5 - cx;
        let dy = f64::from(y) + 0.5 - cy;
        let sx = (cx + dx * cos - dy * sin).floor();
        let sy = (cy + dx * sin + dy * cos).floor();
        if sx < 0.0 || sy < 0.0 || sx >= f64::from(width) || sy >= f64::from(height) {
            return image::Rgb([0, 0, 0]);
        }
        // In range after the bounds check
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let (sx, sy) = (sx as u32, sy as u32);
        *source.get_pixel(sx, sy)
    })
}
