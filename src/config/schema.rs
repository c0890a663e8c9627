use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::camera::SimCameraConfig;
use crate::error::{AppError, Result};
use crate::stream::{AdapterConfig, DistributorConfig};

/// Main gateway configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Web server settings
    pub web: WebConfig,
    /// Stream engine settings
    pub stream: StreamConfig,
    /// Camera control deadlines
    pub control: ControlConfig,
    /// Simulated camera driver
    pub camera: SimCameraConfig,
}

impl GatewayConfig {
    /// Reject values the stream engine cannot run with
    pub fn validate(&self) -> Result<()> {
        let stream = &self.stream;
        if stream.error_threshold == 0 {
            return Err(AppError::Config("stream.error_threshold must be at least 1".into()));
        }
        if stream.idle_check_ms == 0 {
            return Err(AppError::Config("stream.idle_check_ms must be at least 1".into()));
        }
        if stream.subscriber_capacity == 0 || stream.adapter_capacity == 0 {
            return Err(AppError::Config("stream capacities must be at least 1".into()));
        }
        if stream.session_timeout_secs == 0 {
            return Err(AppError::Config("stream.session_timeout_secs must be at least 1".into()));
        }
        if self.control.command_timeout_ms == 0 || self.control.camera_create_timeout_ms == 0 {
            return Err(AppError::Config("control timeouts must be at least 1ms".into()));
        }
        if self.camera.fps == 0 || self.camera.width == 0 || self.camera.height == 0 {
            return Err(AppError::Config("camera fps and frame size must be non-zero".into()));
        }
        if self.camera.max_cameras == 0 {
            return Err(AppError::Config("camera.max_cameras must be at least 1".into()));
        }
        Ok(())
    }
}

/// Web server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    /// HTTP port
    pub http_port: u16,
    /// Bind address
    pub bind_address: String,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            http_port: 8080,
            bind_address: "0.0.0.0".to_string(),
        }
    }
}

/// Stream engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// How often an unwatched stream is checked for teardown (milliseconds)
    pub idle_check_ms: u64,
    /// Consecutive frame errors tolerated before a stream is torn down
    pub error_threshold: u32,
    /// Frames queued per viewer before frames are dropped for it
    pub subscriber_capacity: usize,
    /// Queue depth between the camera and the JPEG encoder
    pub adapter_capacity: usize,
    /// JPEG quality for cameras that deliver raster frames (1-100)
    pub jpeg_quality: u8,
    /// Maximum lifetime of one viewer session (seconds)
    pub session_timeout_secs: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            idle_check_ms: 1000,
            error_threshold: 24,
            subscriber_capacity: 4,
            adapter_capacity: 2,
            jpeg_quality: 75,
            session_timeout_secs: 600,
        }
    }
}

impl StreamConfig {
    pub fn distributor_config(&self) -> DistributorConfig {
        DistributorConfig {
            idle_interval: Duration::from_millis(self.idle_check_ms),
            error_threshold: self.error_threshold,
            subscriber_capacity: self.subscriber_capacity,
            adapter: AdapterConfig {
                channel_capacity: self.adapter_capacity,
                jpeg_quality: self.jpeg_quality,
            },
        }
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }
}

/// Deadlines for camera calls made on behalf of a request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    pub command_timeout_ms: u64,
    pub camera_create_timeout_ms: u64,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            command_timeout_ms: 5000,
            camera_create_timeout_ms: 3000,
        }
    }
}

impl ControlConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn camera_create_timeout(&self) -> Duration {
        Duration::from_millis(self.camera_create_timeout_ms)
    }
}
