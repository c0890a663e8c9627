//! Simulated PTZ camera
//!
//! Renders a moving test pattern whose offset follows the simulated pan/tilt
//! position, so motion commands are visible in the stream. Used when no vendor
//! driver is configured and throughout the test suite.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use image::{DynamicImage, Rgb, RgbImage};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{Camera, CameraAdmin, CameraFactory, FrameStream, JpegCamera, RasterFrame};
use crate::error::CameraError;
use crate::stream::jpeg::{JpegEncoder, DEFAULT_JPEG_QUALITY};

/// Pixels moved per frame while a pan/tilt motion is active
const MOTION_STEP: i32 = 4;

/// Simulated camera configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimCameraConfig {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Emit pre-encoded JPEG frames instead of raster frames
    pub jpeg_native: bool,
    /// Quality used for the native JPEG path
    pub jpeg_quality: u8,
    /// Most cameras the factory keeps at once
    pub max_cameras: usize,
}

impl Default for SimCameraConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 360,
            fps: 15,
            jpeg_native: false,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            max_cameras: 64,
        }
    }
}

impl SimCameraConfig {
    fn frame_interval(&self) -> Duration {
        Duration::from_millis(1000 / u64::from(self.fps.max(1)))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Position {
    pan: i32,
    tilt: i32,
    zoom: i32,
}

#[derive(Debug, Default)]
struct SimState {
    position: Position,
    pan_velocity: i32,
    tilt_velocity: i32,
    zoom_velocity: i32,
    presets: HashMap<String, Position>,
    reboots: u32,
}

impl SimState {
    /// Advance one frame worth of motion
    fn step(&mut self) -> Position {
        self.position.pan += self.pan_velocity;
        self.position.tilt += self.tilt_velocity;
        self.position.zoom = (self.position.zoom + self.zoom_velocity).clamp(0, 100);
        self.position
    }
}

/// A simulated camera reachable at `address`
pub struct SimCamera {
    address: String,
    config: SimCameraConfig,
    state: Arc<Mutex<SimState>>,
    streams_started: AtomicU64,
}

impl SimCamera {
    pub fn new(address: impl Into<String>, config: SimCameraConfig) -> Self {
        Self {
            address: address.into(),
            config,
            state: Arc::new(Mutex::new(SimState::default())),
            streams_started: AtomicU64::new(0),
        }
    }

    /// Number of upstream streams opened so far (raster or JPEG)
    pub fn streams_started(&self) -> u64 {
        self.streams_started.load(Ordering::Relaxed)
    }

    /// Current (pan, tilt, zoom) position
    pub fn position(&self) -> (i32, i32, i32) {
        let p = self.state.lock().position;
        (p.pan, p.tilt, p.zoom)
    }

    pub fn reboots(&self) -> u32 {
        self.state.lock().reboots
    }

    fn set_motion(&self, pan: Option<i32>, tilt: Option<i32>) {
        let mut state = self.state.lock();
        if let Some(pan) = pan {
            state.pan_velocity = pan;
        }
        if let Some(tilt) = tilt {
            state.tilt_velocity = tilt;
        }
    }

    fn set_zoom(&self, velocity: i32) {
        self.state.lock().zoom_velocity = velocity;
    }

    /// Spawn the frame generator; `render` turns a position into one output item
    fn spawn_generator<T, F>(&self, cancel: CancellationToken, mut render: F) -> FrameStream<T>
    where
        T: Send + 'static,
        F: FnMut(u64, Position) -> Result<T, CameraError> + Send + 'static,
    {
        self.streams_started.fetch_add(1, Ordering::Relaxed);

        let (frame_tx, frame_rx) = mpsc::channel(4);
        let (err_tx, err_rx) = mpsc::channel(4);
        let state = self.state.clone();
        let interval = self.config.frame_interval();
        let address = self.address.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            let mut sequence = 0u64;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let position = state.lock().step();
                match render(sequence, position) {
                    Ok(item) => {
                        // Drop rather than queue when the reader lags, like a real sensor
                        if let Err(mpsc::error::TrySendError::Closed(_)) = frame_tx.try_send(item) {
                            break;
                        }
                    }
                    Err(e) => {
                        let _ = err_tx.try_send(e);
                    }
                }
                sequence += 1;
            }

            debug!(camera = %address, frames = sequence, "Simulated stream stopped");
        });

        FrameStream::new(frame_rx, err_rx)
    }
}

/// Render the test pattern for one frame
fn render_pattern(width: u32, height: u32, sequence: u64, position: Position) -> RasterFrame {
    let shift_x = position.pan.rem_euclid(256) as u32;
    let shift_y = position.tilt.rem_euclid(256) as u32;
    let blue = ((sequence * 3) % 256) as u8;
    let scale = 1 + position.zoom as u32 / 25;

    let image = RgbImage::from_fn(width, height, |x, y| {
        let r = ((x * scale + shift_x) % 256) as u8;
        let g = ((y * scale + shift_y) % 256) as u8;
        Rgb([r, g, blue])
    });
    DynamicImage::ImageRgb8(image)
}

#[async_trait]
impl Camera for SimCamera {
    fn remote_addr(&self) -> &str {
        &self.address
    }

    async fn tilt_up(&self) -> Result<(), CameraError> {
        self.set_motion(None, Some(-MOTION_STEP));
        Ok(())
    }

    async fn tilt_down(&self) -> Result<(), CameraError> {
        self.set_motion(None, Some(MOTION_STEP));
        Ok(())
    }

    async fn pan_left(&self) -> Result<(), CameraError> {
        self.set_motion(Some(-MOTION_STEP), None);
        Ok(())
    }

    async fn pan_right(&self) -> Result<(), CameraError> {
        self.set_motion(Some(MOTION_STEP), None);
        Ok(())
    }

    async fn pan_tilt_stop(&self) -> Result<(), CameraError> {
        self.set_motion(Some(0), Some(0));
        Ok(())
    }

    async fn zoom_in(&self) -> Result<(), CameraError> {
        self.set_zoom(1);
        Ok(())
    }

    async fn zoom_out(&self) -> Result<(), CameraError> {
        self.set_zoom(-1);
        Ok(())
    }

    async fn zoom_stop(&self) -> Result<(), CameraError> {
        self.set_zoom(0);
        Ok(())
    }

    async fn go_to_preset(&self, preset: &str) -> Result<(), CameraError> {
        let mut state = self.state.lock();
        let target = state
            .presets
            .get(preset)
            .copied()
            .ok_or_else(|| CameraError::Command(format!("unknown preset {preset:?}")))?;
        state.position = target;
        state.pan_velocity = 0;
        state.tilt_velocity = 0;
        state.zoom_velocity = 0;
        Ok(())
    }

    async fn stream(&self, cancel: CancellationToken) -> Result<FrameStream<RasterFrame>, CameraError> {
        let (width, height) = (self.config.width, self.config.height);
        if width == 0 || height == 0 {
            return Err(CameraError::StreamStart(format!(
                "invalid resolution {width}x{height}"
            )));
        }

        info!(camera = %self.address, width, height, fps = self.config.fps, "Starting simulated raster stream");
        Ok(self.spawn_generator(cancel, move |sequence, position| {
            Ok(render_pattern(width, height, sequence, position))
        }))
    }

    fn as_jpeg(&self) -> Option<&dyn JpegCamera> {
        if self.config.jpeg_native {
            Some(self)
        } else {
            None
        }
    }

    fn as_admin(&self) -> Option<&dyn CameraAdmin> {
        Some(self)
    }
}

#[async_trait]
impl JpegCamera for SimCamera {
    async fn stream_jpeg(&self, cancel: CancellationToken) -> Result<FrameStream<Bytes>, CameraError> {
        let (width, height) = (self.config.width, self.config.height);
        let mut encoder = JpegEncoder::new(self.config.jpeg_quality);

        info!(camera = %self.address, width, height, fps = self.config.fps, "Starting simulated JPEG stream");
        Ok(self.spawn_generator(cancel, move |sequence, position| {
            let frame = render_pattern(width, height, sequence, position);
            encoder.encode(&frame).map_err(CameraError::from)
        }))
    }
}

#[async_trait]
impl CameraAdmin for SimCamera {
    async fn reboot(&self) -> Result<(), CameraError> {
        let mut state = self.state.lock();
        state.reboots += 1;
        state.position = Position::default();
        state.pan_velocity = 0;
        state.tilt_velocity = 0;
        state.zoom_velocity = 0;
        Ok(())
    }

    async fn set_preset(&self, preset: &str) -> Result<(), CameraError> {
        let mut state = self.state.lock();
        let position = state.position;
        state.presets.insert(preset.to_string(), position);
        Ok(())
    }
}

/// Hands out one shared [`SimCamera`] per address
pub struct SimCameraFactory {
    config: SimCameraConfig,
    cameras: Mutex<HashMap<String, Arc<SimCamera>>>,
}

impl SimCameraFactory {
    pub fn new(config: SimCameraConfig) -> Self {
        Self {
            config,
            cameras: Mutex::new(HashMap::new()),
        }
    }

    /// The camera already created for `address`, if any
    pub fn get(&self, address: &str) -> Option<Arc<SimCamera>> {
        self.cameras.lock().get(address).cloned()
    }
}

#[async_trait]
impl CameraFactory for SimCameraFactory {
    async fn new_camera(&self, address: &str) -> Result<Arc<dyn Camera>, CameraError> {
        if address.trim().is_empty() || address.contains(char::is_whitespace) {
            return Err(CameraError::Unreachable {
                address: address.to_string(),
                reason: "invalid camera address".to_string(),
            });
        }

        let mut cameras = self.cameras.lock();
        if let Some(camera) = cameras.get(address) {
            return Ok(camera.clone());
        }

        if cameras.len() >= self.config.max_cameras {
            // Evict handles that only the map still holds
            let before = cameras.len();
            cameras.retain(|_, camera| Arc::strong_count(camera) > 1);
            debug!(evicted = before - cameras.len(), "Evicted unused simulated cameras");
        }
        if cameras.len() >= self.config.max_cameras {
            return Err(CameraError::Unreachable {
                address: address.to_string(),
                reason: format!("too many cameras (limit {})", self.config.max_cameras),
            });
        }

        let camera = Arc::new(SimCamera::new(address, self.config.clone()));
        cameras.insert(address.to_string(), camera.clone());
        Ok(camera)
    }
}
