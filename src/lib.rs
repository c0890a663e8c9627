//! ptz-gateway - HTTP gateway for PTZ network cameras
//!
//! Exposes pan/tilt/zoom/preset commands over HTTP and serves each camera's
//! video as MJPEG, sharing one upstream stream between all viewers of a camera.

pub mod camera;
pub mod config;
pub mod error;
pub mod state;
pub mod stream;
pub mod utils;
pub mod web;

pub use error::{AppError, Result};
