//! Display Sinks
//!
//! The [`DisplaySink`] trait is the only way frames leave the core. Callers
//! never overlap `send` calls; the orchestrator holds its render lock for the
//! whole call.

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use image::RgbImage;
use thiserror::Error;

/// Errors reported by a display sink
#[derive(Debug, Error)]
pub enum SinkError {
    /// Writing to the device or file failed
    #[error("Display I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// The frame could not be encoded for the device
    #[error("Failed to encode frame: {0}")]
    Encode(#[from] image::ImageError),

    /// Device specific failure
    #[error("Display rejected frame: {0}")]
    Rejected(String),
}

/// Output channel for finished, canvas-sized frames
#[async_trait]
pub trait DisplaySink: Send {
    /// Human readable sink name for logs
    fn name(&self) -> &str;

    /// Push one frame, honoring `delay` between transfer stages
    async fn send(&mut self, frame: &RgbImage, delay: Duration) -> Result<(), SinkError>;
}

/// Sink that writes every frame as a PNG file
///
/// The file is written next to the target and renamed into place, so a
/// reader polling the path never sees a partial image.
#[derive(Debug, Clone)]
pub struct PngFileSink {
    path: PathBuf,
    frames_written: u64,
}

impl PngFileSink {
    /// Create a sink writing to `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            frames_written: 0,
        }
    }

    /// Target file path
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of frames successfully written
    #[must_use]
    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    fn staging_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(std::ffi::OsStr::to_os_string)
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl DisplaySink for PngFileSink {
    fn name(&self) -> &str {
        "png-file"
    }

    async fn send(&mut self, frame: &RgbImage, delay: Duration) -> Result<(), SinkError> {
        let mut encoded = Cursor::new(Vec::new());
        frame.write_to(&mut encoded, image::ImageFormat::Png)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let staging = self.staging_path();
        tokio::fs::write(&staging, encoded.into_inner()).await?;
        tokio::fs::rename(&staging, &self.path).await?;
        self.frames_written += 1;

        tracing::trace!(path = ?self.path, frames = self.frames_written, "Frame written");

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }
}
