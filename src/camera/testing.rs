//! Scriptable camera double for stream tests

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use image::{DynamicImage, Rgb, RgbImage};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{Camera, CameraFactory, FrameStream, JpegCamera, RasterFrame};
use crate::error::CameraError;

pub fn raster(width: u32, height: u32) -> RasterFrame {
    DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([40, 80, 120])))
}

/// Senders feeding the most recently opened stream
pub struct Feed {
    pub raster: Option<mpsc::Sender<RasterFrame>>,
    pub jpeg: Option<mpsc::Sender<Bytes>>,
    pub errors: mpsc::Sender<CameraError>,
}

/// Frames emitted on a timer after the stream opens, then the stream closes
#[derive(Clone)]
pub struct Script {
    pub frames: usize,
    pub interval: Duration,
    pub size: (u32, u32),
}

pub struct FakeCamera {
    address: String,
    jpeg_native: bool,
    fail_stream: Option<String>,
    script: Option<Script>,
    feed: Arc<Mutex<Option<Feed>>>,
    stream_calls: AtomicUsize,
    last_cancel: Mutex<Option<CancellationToken>>,
}

impl FakeCamera {
    pub fn new(address: &str) -> Self {
        Self {
            address: address.to_string(),
            jpeg_native: false,
            fail_stream: None,
            script: None,
            feed: Arc::new(Mutex::new(None)),
            stream_calls: AtomicUsize::new(0),
            last_cancel: Mutex::new(None),
        }
    }

    pub fn jpeg_native(mut self) -> Self {
        self.jpeg_native = true;
        self
    }

    pub fn failing(mut self, reason: &str) -> Self {
        self.fail_stream = Some(reason.to_string());
        self
    }

    pub fn scripted(mut self, script: Script) -> Self {
        self.script = Some(script);
        self
    }

    pub fn stream_calls(&self) -> usize {
        self.stream_calls.load(Ordering::SeqCst)
    }

    pub fn last_cancel(&self) -> Option<CancellationToken> {
        self.last_cancel.lock().clone()
    }

    /// Whether the open stream is still attached (not closed or cancelled)
    pub fn is_streaming(&self) -> bool {
        self.feed.lock().is_some()
    }

    pub async fn push_raster(&self, frame: RasterFrame) -> bool {
        let tx = self.feed.lock().as_ref().and_then(|f| f.raster.clone());
        match tx {
            Some(tx) => tx.send(frame).await.is_ok(),
            None => false,
        }
    }

    pub async fn push_jpeg(&self, jpeg: Bytes) -> bool {
        let tx = self.feed.lock().as_ref().and_then(|f| f.jpeg.clone());
        match tx {
            Some(tx) => tx.send(jpeg).await.is_ok(),
            None => false,
        }
    }

    pub async fn push_error(&self, reason: &str) -> bool {
        let tx = self.feed.lock().as_ref().map(|f| f.errors.clone());
        match tx {
            Some(tx) => tx.send(CameraError::Frame(reason.to_string())).await.is_ok(),
            None => false,
        }
    }

    /// Hang up the stream from the camera side
    pub fn close(&self) {
        self.feed.lock().take();
    }

    fn open<T: Send + 'static>(
        &self,
        cancel: CancellationToken,
        wrap: impl FnOnce(mpsc::Sender<T>, mpsc::Sender<CameraError>) -> Feed,
    ) -> Result<FrameStream<T>, CameraError> {
        self.stream_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(reason) = &self.fail_stream {
            return Err(CameraError::StreamStart(reason.clone()));
        }

        let (frame_tx, frame_rx) = mpsc::channel(16);
        let (err_tx, err_rx) = mpsc::channel(16);
        *self.feed.lock() = Some(wrap(frame_tx, err_tx));
        *self.last_cancel.lock() = Some(cancel.clone());

        // A real camera hangs up when its context is cancelled
        let feed = self.feed.clone();
        tokio::spawn(async move {
            cancel.cancelled().await;
            feed.lock().take();
        });

        Ok(FrameStream::new(frame_rx, err_rx))
    }
}

#[async_trait]
impl Camera for FakeCamera {
    fn remote_addr(&self) -> &str {
        &self.address
    }

    async fn tilt_up(&self) -> Result<(), CameraError> {
        Ok(())
    }

    async fn tilt_down(&self) -> Result<(), CameraError> {
        Ok(())
    }

    async fn pan_left(&self) -> Result<(), CameraError> {
        Ok(())
    }

    async fn pan_right(&self) -> Result<(), CameraError> {
        Ok(())
    }

    async fn pan_tilt_stop(&self) -> Result<(), CameraError> {
        Ok(())
    }

    async fn zoom_in(&self) -> Result<(), CameraError> {
        Ok(())
    }

    async fn zoom_out(&self) -> Result<(), CameraError> {
        Ok(())
    }

    async fn zoom_stop(&self) -> Result<(), CameraError> {
        Ok(())
    }

    async fn go_to_preset(&self, _preset: &str) -> Result<(), CameraError> {
        Err(CameraError::Command("no presets".into()))
    }

    async fn stream(&self, cancel: CancellationToken) -> Result<FrameStream<RasterFrame>, CameraError> {
        let stream = self.open(cancel, |tx, errors| Feed {
            raster: Some(tx),
            jpeg: None,
            errors,
        })?;

        if let Some(script) = self.script.clone() {
            let feed = self.feed.clone();
            tokio::spawn(async move {
                for _ in 0..script.frames {
                    tokio::time::sleep(script.interval).await;
                    let tx = feed.lock().as_ref().and_then(|f| f.raster.clone());
                    let Some(tx) = tx else { return };
                    if tx.send(raster(script.size.0, script.size.1)).await.is_err() {
                        return;
                    }
                }
                feed.lock().take();
            });
        }

        Ok(stream)
    }

    fn as_jpeg(&self) -> Option<&dyn JpegCamera> {
        if self.jpeg_native {
            Some(self)
        } else {
            None
        }
    }
}

#[async_trait]
impl JpegCamera for FakeCamera {
    async fn stream_jpeg(&self, cancel: CancellationToken) -> Result<FrameStream<Bytes>, CameraError> {
        self.open(cancel, |tx, errors| Feed {
            raster: None,
            jpeg: Some(tx),
            errors,
        })
    }
}

/// Factory returning one shared fake camera for every address
pub struct FakeFactory {
    pub camera: Arc<FakeCamera>,
}

#[async_trait]
impl CameraFactory for FakeFactory {
    async fn new_camera(&self, _address: &str) -> Result<Arc<dyn Camera>, CameraError> {
        Ok(self.camera.clone())
    }
}
