//! Per-camera frame distributor
//!
//! One [`Distributor`] owns the JPEG feed of one camera and fans every frame
//! out to its subscribers. Delivery is best effort: each subscriber has a small
//! bounded queue, and a full queue drops the frame for that subscriber only.
//!
//! ```text
//! Starting ──► Running ──► Draining ──► Stopped
//!                 │  ▲
//!   frame ────────┘  │ resets error budget
//!   error ───────────┘ (threshold reached ──► Draining)
//!   idle tick, no subscribers ──► Draining
//!   upstream closed ──► Draining
//! ```
//!
//! Draining cancels the adapter, closes every subscriber queue, runs the
//! stop callback (registry removal) and finally fires the done signal.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::adapter::{open_jpeg_source, AdapterConfig, JpegSource};
use crate::camera::Camera;
use crate::error::CameraError;
use crate::utils::LogThrottler;

/// Distributor tuning
#[derive(Debug, Clone)]
pub struct DistributorConfig {
    /// How often the subscriber set is checked for idleness
    pub idle_interval: Duration,
    /// Consecutive frame errors tolerated before the stream is torn down
    pub error_threshold: u32,
    /// Queue depth of each subscriber
    pub subscriber_capacity: usize,
    pub adapter: AdapterConfig,
}

impl Default for DistributorConfig {
    fn default() -> Self {
        Self {
            idle_interval: Duration::from_secs(1),
            error_threshold: 24,
            subscriber_capacity: 4,
            adapter: AdapterConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DistributorState {
    Starting,
    Running,
    Draining,
    Stopped,
}

impl fmt::Display for DistributorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Why a distributor left the running state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Idle,
    ErrorBudget,
    UpstreamClosed,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "no subscribers",
            Self::ErrorBudget => "too many consecutive errors",
            Self::UpstreamClosed => "upstream closed",
        };
        f.write_str(s)
    }
}

/// Called once while draining, before the distributor reports stopped
pub type OnStop = Box<dyn FnOnce(&Arc<Distributor>) + Send + 'static>;

/// Snapshot of a distributor for status endpoints
#[derive(Debug, Clone, Serialize)]
pub struct DistributorStats {
    pub camera: String,
    pub state: DistributorState,
    pub subscribers: usize,
    pub frames_delivered: u64,
    pub frames_dropped: u64,
    pub consecutive_errors: u32,
    pub avg_fps: f64,
    pub avg_frame_size: u64,
    pub started_at: DateTime<Utc>,
    pub uptime_secs: f64,
}

struct Inner {
    state: DistributorState,
    subscribers: HashMap<u64, mpsc::Sender<Bytes>>,
    consecutive_errors: u32,
    next_id: u64,
    stop_reason: Option<StopReason>,
}

pub struct Distributor {
    key: String,
    config: DistributorConfig,
    /// Subscriber set, error budget and state share one lock
    inner: Mutex<Inner>,
    adapter_cancel: CancellationToken,
    done: CancellationToken,
    frames: AtomicU64,
    bytes: AtomicU64,
    dropped: AtomicU64,
    started: Instant,
    started_at: DateTime<Utc>,
    log_throttler: LogThrottler,
}

impl Distributor {
    /// Open `camera`'s feed and start distributing it
    ///
    /// Errors opening the feed are returned here and nothing keeps running.
    /// `on_stop` runs once when the distributor drains.
    pub async fn start(
        camera: Arc<dyn Camera>,
        config: DistributorConfig,
        on_stop: Option<OnStop>,
    ) -> Result<Arc<Self>, CameraError> {
        let key = camera.remote_addr().to_string();
        let adapter_cancel = CancellationToken::new();

        debug!(camera = %key, state = %DistributorState::Starting, "Opening stream");
        let source = match open_jpeg_source(camera.as_ref(), adapter_cancel.clone(), &config.adapter).await {
            Ok(source) => source,
            Err(e) => {
                adapter_cancel.cancel();
                warn!(camera = %key, error = %e, "Unable to open stream");
                return Err(e);
            }
        };

        let distributor = Arc::new(Self {
            key,
            config,
            inner: Mutex::new(Inner {
                state: DistributorState::Running,
                subscribers: HashMap::new(),
                consecutive_errors: 0,
                next_id: 0,
                stop_reason: None,
            }),
            adapter_cancel,
            done: CancellationToken::new(),
            frames: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            started: Instant::now(),
            started_at: Utc::now(),
            log_throttler: LogThrottler::with_secs(5),
        });

        info!(camera = %distributor.key, "Stream started");
        tokio::spawn(distributor.clone().run(source, camera, on_stop));
        Ok(distributor)
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn state(&self) -> DistributorState {
        self.inner.lock().state
    }

    pub fn is_running(&self) -> bool {
        self.state() == DistributorState::Running
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        self.inner.lock().stop_reason
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().subscribers.len()
    }

    /// Resolves once the distributor has fully stopped
    pub async fn stopped(&self) {
        self.done.cancelled().await
    }

    /// Attach a new subscriber, or `None` if the distributor is no longer running
    pub fn subscribe(self: &Arc<Self>) -> Option<Subscription> {
        let capacity = self.config.subscriber_capacity.max(1);
        let mut inner = self.inner.lock();
        if inner.state != DistributorState::Running {
            return None;
        }

        let id = inner.next_id;
        inner.next_id += 1;
        let (tx, rx) = mpsc::channel(capacity);
        inner.subscribers.insert(id, tx);
        let count = inner.subscribers.len();
        drop(inner);

        info!(camera = %self.key, subscriber = id, subscribers = count, "Subscriber added");
        Some(Subscription {
            id,
            frames: rx,
            distributor: self.clone(),
        })
    }

    /// Detach subscriber `id`; unknown ids are ignored
    pub fn unsubscribe(&self, id: u64) {
        let mut inner = self.inner.lock();
        if inner.subscribers.remove(&id).is_some() {
            let count = inner.subscribers.len();
            drop(inner);
            self.log_throttler.clear(&format!("subscriber_full:{}", id));
            info!(camera = %self.key, subscriber = id, subscribers = count, "Subscriber removed");
        }
    }

    pub fn stats(&self) -> DistributorStats {
        let (state, subscribers, consecutive_errors) = {
            let inner = self.inner.lock();
            (inner.state, inner.subscribers.len(), inner.consecutive_errors)
        };
        let frames = self.frames.load(Ordering::Relaxed);
        let bytes = self.bytes.load(Ordering::Relaxed);
        let uptime = self.started.elapsed().as_secs_f64();

        DistributorStats {
            camera: self.key.clone(),
            state,
            subscribers,
            frames_delivered: frames,
            frames_dropped: self.dropped.load(Ordering::Relaxed),
            consecutive_errors,
            avg_fps: if uptime > 0.0 { frames as f64 / uptime } else { 0.0 },
            avg_frame_size: if frames > 0 { bytes / frames } else { 0 },
            started_at: self.started_at,
            uptime_secs: uptime,
        }
    }

    async fn run(self: Arc<Self>, mut source: JpegSource, camera: Arc<dyn Camera>, on_stop: Option<OnStop>) {
        let idle = self.config.idle_interval;
        let mut idle_tick = tokio::time::interval_at(tokio::time::Instant::now() + idle, idle);
        idle_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let reason = loop {
            tokio::select! {
                frame = source.frames.recv() => match frame {
                    Some(frame) => self.broadcast(frame),
                    None => break StopReason::UpstreamClosed,
                },
                Some(err) = source.errors.recv() => {
                    if self.record_error(&err) {
                        break StopReason::ErrorBudget;
                    }
                }
                _ = idle_tick.tick() => {
                    if self.is_idle() {
                        break StopReason::Idle;
                    }
                }
            }
        };

        self.drain(reason);
        drop(source);
        drop(camera);

        if let Some(on_stop) = on_stop {
            on_stop(&self);
        }
        self.finish(reason);
    }

    fn broadcast(&self, frame: Bytes) {
        let len = frame.len() as u64;
        let mut inner = self.inner.lock();
        inner.consecutive_errors = 0;

        let mut closed = Vec::new();
        for (id, tx) in &inner.subscribers {
            match tx.try_send(frame.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    if self.log_throttler.should_log(&format!("subscriber_full:{}", id)) {
                        debug!(camera = %self.key, subscriber = id, "Subscriber is behind, dropping frames");
                    }
                }
                Err(TrySendError::Closed(_)) => closed.push(*id),
            }
        }
        for id in closed {
            inner.subscribers.remove(&id);
        }
        drop(inner);

        self.frames.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(len, Ordering::Relaxed);
    }

    /// Count a frame error; returns `true` once the budget is spent
    fn record_error(&self, err: &CameraError) -> bool {
        let mut inner = self.inner.lock();
        inner.consecutive_errors += 1;
        let count = inner.consecutive_errors;
        let exhausted = count >= self.config.error_threshold;
        if exhausted {
            inner.state = DistributorState::Draining;
        }
        drop(inner);

        if exhausted || self.log_throttler.should_log("frame_error") {
            warn!(
                camera = %self.key,
                error = %err,
                consecutive = count,
                threshold = self.config.error_threshold,
                "Unable to get the next frame"
            );
        }
        exhausted
    }

    fn is_idle(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.subscribers.is_empty() {
            inner.state = DistributorState::Draining;
            true
        } else {
            false
        }
    }

    fn drain(&self, reason: StopReason) {
        self.adapter_cancel.cancel();
        let closed = {
            let mut inner = self.inner.lock();
            inner.state = DistributorState::Draining;
            inner.stop_reason = Some(reason);
            let closed = inner.subscribers.len();
            inner.subscribers.clear();
            closed
        };
        info!(camera = %self.key, reason = %reason, subscribers = closed, "Stream draining");
    }

    fn finish(&self, reason: StopReason) {
        self.inner.lock().state = DistributorState::Stopped;

        let frames = self.frames.load(Ordering::Relaxed);
        let bytes = self.bytes.load(Ordering::Relaxed);
        let duration = self.started.elapsed();
        let secs = duration.as_secs_f64();
        info!(
            camera = %self.key,
            reason = %reason,
            frames,
            dropped = self.dropped.load(Ordering::Relaxed),
            avg_fps = if secs > 0.0 { frames as f64 / secs } else { 0.0 },
            avg_frame_size = if frames > 0 { bytes / frames } else { 0 },
            duration_ms = duration.as_millis() as u64,
            "Stream stopped"
        );
        self.done.cancel();
    }
}

impl fmt::Debug for Distributor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Distributor")
            .field("key", &self.key)
            .field("state", &self.state())
            .finish()
    }
}

/// A subscriber's view of a distributor
///
/// Dropping the subscription unsubscribes it.
pub struct Subscription {
    id: u64,
    frames: mpsc::Receiver<Bytes>,
    distributor: Arc<Distributor>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn camera(&self) -> &str {
        self.distributor.key()
    }

    pub fn distributor(&self) -> &Arc<Distributor> {
        &self.distributor
    }

    /// Next frame, or `None` once the distributor has stopped
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.frames.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.distributor.unsubscribe(self.id);
    }
}
