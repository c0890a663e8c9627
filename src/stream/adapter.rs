//! Frame source adapter
//!
//! Normalizes the two upstream shapes into one JPEG feed:
//!
//! ```text
//! JpegCamera ── stream_jpeg() ───────────────────────────────► frames / errors
//!
//! Camera ───── stream() ─┬─ raster ──► convert task ──jpeg──► frames
//!                        │                 └─ encode errors ─┐
//!                        └─ errors ─────────► merge task ◄───┴─► errors
//! ```
//!
//! All forwarding is `try_send`: when the reader falls behind, frames are
//! dropped instead of stalling the encode loop or the camera connection.
//! Encoding itself runs on the blocking pool.

use bytes::Bytes;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::jpeg::JpegEncoder;
use crate::camera::{Camera, RasterFrame};
use crate::error::CameraError;

/// Adapter tuning
#[derive(Debug, Clone)]
pub struct AdapterConfig {
    /// Capacity of the converted frame and error channels
    pub channel_capacity: usize,
    /// Quality used when encoding raster frames
    pub jpeg_quality: u8,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 2,
            jpeg_quality: super::jpeg::DEFAULT_JPEG_QUALITY,
        }
    }
}

/// A uniform feed of encoded JPEG frames
///
/// `frames` closes when the upstream closes or the adapter is cancelled.
pub struct JpegSource {
    pub frames: mpsc::Receiver<Bytes>,
    pub errors: mpsc::Receiver<CameraError>,
}

/// Open `camera`'s stream as a JPEG feed
///
/// Failing to start the upstream stream is reported here. Cancelling `cancel`
/// stops the upstream stream and any conversion tasks.
pub async fn open_jpeg_source(
    camera: &dyn Camera,
    cancel: CancellationToken,
    config: &AdapterConfig,
) -> Result<JpegSource, CameraError> {
    let key = camera.remote_addr().to_string();

    if let Some(jpeg) = camera.as_jpeg() {
        debug!(camera = %key, "Using native JPEG stream");
        let upstream = jpeg.stream_jpeg(cancel).await?;
        return Ok(JpegSource {
            frames: upstream.frames,
            errors: upstream.errors,
        });
    }

    debug!(camera = %key, quality = config.jpeg_quality, "Using raster stream with JPEG conversion");
    let upstream = camera.stream(cancel.child_token()).await?;

    let capacity = config.channel_capacity.max(1);
    let (frame_tx, frame_rx) = mpsc::channel(capacity);
    let (convert_err_tx, convert_err_rx) = mpsc::channel(capacity);
    let (err_tx, err_rx) = mpsc::channel(capacity);

    tokio::spawn(convert_frames(
        key.clone(),
        upstream.frames,
        frame_tx,
        convert_err_tx,
        JpegEncoder::new(config.jpeg_quality),
        cancel.clone(),
    ));
    tokio::spawn(merge_errors(key, upstream.errors, convert_err_rx, err_tx, cancel));

    Ok(JpegSource {
        frames: frame_rx,
        errors: err_rx,
    })
}

/// What one conversion task did before it stopped
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct ConversionCounts {
    encoded: u64,
    dropped: u64,
    errors_dropped: u64,
}

async fn convert_frames(
    key: String,
    mut raster: mpsc::Receiver<RasterFrame>,
    frames: mpsc::Sender<Bytes>,
    errors: mpsc::Sender<CameraError>,
    mut encoder: JpegEncoder,
    cancel: CancellationToken,
) -> ConversionCounts {
    let mut counts = ConversionCounts::default();

    loop {
        let frame = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            frame = raster.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };

        // Encoding is CPU-bound, keep it off the runtime workers
        let encode = tokio::task::spawn_blocking(move || {
            let result = encoder.encode(&frame);
            (encoder, result)
        });
        let result = match encode.await {
            Ok((returned, result)) => {
                encoder = returned;
                result
            }
            Err(e) => {
                warn!(camera = %key, "JPEG encode task failed: {}", e);
                break;
            }
        };

        match result {
            Ok(jpeg) => match frames.try_send(jpeg) {
                Ok(()) => counts.encoded += 1,
                Err(TrySendError::Full(_)) => {
                    counts.dropped += 1;
                    trace!(camera = %key, "Converted frame dropped, reader is behind");
                }
                Err(TrySendError::Closed(_)) => break,
            },
            Err(e) => match errors.try_send(e.into()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => counts.errors_dropped += 1,
                Err(TrySendError::Closed(_)) => break,
            },
        }
    }

    debug!(
        camera = %key,
        encoded = counts.encoded,
        dropped = counts.dropped,
        errors_dropped = counts.errors_dropped,
        "Frame conversion stopped"
    );
    counts
}

async fn merge_errors(
    key: String,
    mut upstream: mpsc::Receiver<CameraError>,
    mut conversion: mpsc::Receiver<CameraError>,
    out: mpsc::Sender<CameraError>,
    cancel: CancellationToken,
) {
    let mut upstream_open = true;
    let mut conversion_open = true;
    let mut dropped = 0u64;

    while upstream_open || conversion_open {
        let err = tokio::select! {
            _ = cancel.cancelled() => break,
            err = upstream.recv(), if upstream_open => match err {
                Some(err) => err,
                None => {
                    upstream_open = false;
                    continue;
                }
            },
            err = conversion.recv(), if conversion_open => match err {
                Some(err) => err,
                None => {
                    conversion_open = false;
                    continue;
                }
            },
        };

        match out.try_send(err) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => dropped += 1,
            Err(TrySendError::Closed(_)) => break,
        }
    }

    if dropped > 0 {
        debug!(camera = %key, dropped, "Error merge dropped errors while reader was behind");
    }
}
