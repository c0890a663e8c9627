//! Camera capability model
//!
//! Every camera exposes the base motion/zoom/preset operations through
//! [`Camera`]. Optional capabilities are discovered at runtime through the
//! `as_*` accessors, which return `None` when the device does not support them.
//!
//! ```text
//! Camera ─┬─ tilt/pan/zoom/preset + raster stream
//!         ├─ as_jpeg()  -> JpegCamera   (pre-encoded JPEG stream)
//!         └─ as_admin() -> CameraAdmin  (reboot, save preset)
//! ```

pub mod sim;
#[cfg(test)]
pub mod testing;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::CameraError;

pub use sim::{SimCamera, SimCameraConfig, SimCameraFactory};

/// A decoded raster frame
pub type RasterFrame = image::DynamicImage;

/// A live upstream feed: frames plus an out-of-band error signal
///
/// The camera closes `frames` when the feed ends. Errors are transient and do
/// not end the feed on their own.
pub struct FrameStream<T> {
    pub frames: mpsc::Receiver<T>,
    pub errors: mpsc::Receiver<CameraError>,
}

impl<T> FrameStream<T> {
    pub fn new(frames: mpsc::Receiver<T>, errors: mpsc::Receiver<CameraError>) -> Self {
        Self { frames, errors }
    }
}

/// Base camera capability
///
/// Operations are physical device actions and are never retried here.
/// Callers bound each call with their own deadline.
#[async_trait]
pub trait Camera: Send + Sync {
    /// Stable address identifying this camera
    fn remote_addr(&self) -> &str;

    async fn tilt_up(&self) -> Result<(), CameraError>;
    async fn tilt_down(&self) -> Result<(), CameraError>;
    async fn pan_left(&self) -> Result<(), CameraError>;
    async fn pan_right(&self) -> Result<(), CameraError>;
    async fn pan_tilt_stop(&self) -> Result<(), CameraError>;

    async fn zoom_in(&self) -> Result<(), CameraError>;
    async fn zoom_out(&self) -> Result<(), CameraError>;
    async fn zoom_stop(&self) -> Result<(), CameraError>;

    async fn go_to_preset(&self, preset: &str) -> Result<(), CameraError>;

    /// Start a raster frame stream, stopped when `cancel` fires
    async fn stream(&self, cancel: CancellationToken) -> Result<FrameStream<RasterFrame>, CameraError>;

    /// Native JPEG streaming, if the camera supports it
    fn as_jpeg(&self) -> Option<&dyn JpegCamera> {
        None
    }

    /// Administrative operations, if the camera supports them
    fn as_admin(&self) -> Option<&dyn CameraAdmin> {
        None
    }
}

/// Cameras that emit pre-encoded JPEG frames
#[async_trait]
pub trait JpegCamera: Send + Sync {
    async fn stream_jpeg(&self, cancel: CancellationToken) -> Result<FrameStream<Bytes>, CameraError>;
}

/// Cameras that accept administrative commands
#[async_trait]
pub trait CameraAdmin: Send + Sync {
    async fn reboot(&self) -> Result<(), CameraError>;
    async fn set_preset(&self, preset: &str) -> Result<(), CameraError>;
}

/// Creates camera handles by network address
#[async_trait]
pub trait CameraFactory: Send + Sync {
    async fn new_camera(&self, address: &str) -> Result<Arc<dyn Camera>, CameraError>;
}
