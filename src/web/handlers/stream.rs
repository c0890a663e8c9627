use std::sync::Arc;

use axum::{extract::State, response::Response, Extension};
use tracing::{info, warn};

use crate::error::Result;
use crate::state::AppState;
use crate::stream::mjpeg_response;
use crate::web::middleware::{CameraHandle, RequestId};

/// MJPEG stream of one camera
///
/// Viewers of the same camera share one upstream stream. Failing to start
/// the stream is answered with a plain-text 500.
pub async fn mjpeg_stream(
    State(state): State<Arc<AppState>>,
    Extension(request_id): Extension<RequestId>,
    Extension(CameraHandle(camera)): Extension<CameraHandle>,
) -> Result<Response> {
    let address = camera.remote_addr().to_string();
    info!(request_id = %request_id.0, camera = %address, "Starting a stream");

    let subscription = match state.streams.subscribe(camera).await {
        Ok(subscription) => subscription,
        Err(e) => {
            warn!(request_id = %request_id.0, camera = %address, error = %e, "Unable to start stream");
            return Err(e);
        }
    };

    let session_timeout = state.config.get().stream.session_timeout();
    Ok(mjpeg_response(subscription, state.shutdown.child_token(), session_timeout))
}
