use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::camera::CameraFactory;
use crate::config::ConfigStore;
use crate::stream::StreamRegistry;

/// Application-wide state shared across handlers
pub struct AppState {
    /// Configuration store
    pub config: ConfigStore,
    /// Creates camera handles for the `:address` route parameter
    pub cameras: Arc<dyn CameraFactory>,
    /// Live camera streams
    pub streams: Arc<StreamRegistry>,
    /// Cancelled on shutdown; viewer sessions run on child tokens
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Create new application state
    ///
    /// The stream registry is configured from the current `stream` section.
    pub fn new(config: ConfigStore, cameras: Arc<dyn CameraFactory>, shutdown: CancellationToken) -> Arc<Self> {
        let streams = Arc::new(StreamRegistry::new(config.get().stream.distributor_config()));
        Arc::new(Self {
            config,
            cameras,
            streams,
            shutdown,
        })
    }
}
