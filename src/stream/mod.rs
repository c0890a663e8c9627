//! Stream multiplexing engine
//!
//! # Components
//!
//! - `adapter` - normalizes a camera's feed into JPEG frames
//! - `Distributor` - per-camera fan-out with idle and error-budget teardown
//! - `StreamRegistry` - get-or-create of distributors, coalesced per camera
//! - `SingleFlight` - keyed request coalescing primitive
//! - `mjpeg` - multipart HTTP writer for one viewer
//!
//! ```text
//! Camera ─► adapter ─► Distributor ─┬─► Subscription ─► MJPEG response
//!                                   └─► Subscription ─► MJPEG response
//! ```

pub mod adapter;
pub mod distributor;
pub mod jpeg;
pub mod mjpeg;
pub mod registry;
pub mod singleflight;

pub use adapter::{open_jpeg_source, AdapterConfig, JpegSource};
pub use distributor::{
    Distributor, DistributorConfig, DistributorState, DistributorStats, OnStop, StopReason, Subscription,
};
pub use jpeg::{EncodeError, JpegEncoder};
pub use mjpeg::{mjpeg_response, SessionEnd};
pub use registry::StreamRegistry;
pub use singleflight::SingleFlight;
