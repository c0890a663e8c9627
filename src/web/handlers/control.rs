//! Pan, tilt, zoom, preset and admin commands
//!
//! Every command is a single camera call bounded by the control deadline.
//! Commands are never retried.

use std::future::Future;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension,
};
use tracing::{info, warn};

use crate::error::{AppError, CameraError, Result};
use crate::state::AppState;
use crate::web::middleware::{CameraHandle, RequestId};

async fn run_command<F>(state: &AppState, request_id: &RequestId, camera: &str, action: &str, call: F) -> Result<StatusCode>
where
    F: Future<Output = std::result::Result<(), CameraError>>,
{
    let deadline = state.config.get().control.command_timeout();
    info!(request_id = %request_id.0, camera = %camera, "Starting {}", action);

    match tokio::time::timeout(deadline, call).await {
        Ok(Ok(())) => {
            info!(request_id = %request_id.0, camera = %camera, "Done {}", action);
            Ok(StatusCode::OK)
        }
        Ok(Err(e)) => {
            warn!(request_id = %request_id.0, camera = %camera, error = %e, "Unable to {}", action);
            Err(e.into())
        }
        Err(_) => {
            warn!(request_id = %request_id.0, camera = %camera, "Timed out {}", action);
            Err(AppError::Timeout(deadline))
        }
    }
}

pub async fn tilt_up(
    State(state): State<Arc<AppState>>,
    Extension(request_id): Extension<RequestId>,
    Extension(CameraHandle(camera)): Extension<CameraHandle>,
) -> Result<StatusCode> {
    run_command(&state, &request_id, camera.remote_addr(), "tilt up", camera.tilt_up()).await
}

pub async fn tilt_down(
    State(state): State<Arc<AppState>>,
    Extension(request_id): Extension<RequestId>,
    Extension(CameraHandle(camera)): Extension<CameraHandle>,
) -> Result<StatusCode> {
    run_command(&state, &request_id, camera.remote_addr(), "tilt down", camera.tilt_down()).await
}

pub async fn pan_left(
    State(state): State<Arc<AppState>>,
    Extension(request_id): Extension<RequestId>,
    Extension(CameraHandle(camera)): Extension<CameraHandle>,
) -> Result<StatusCode> {
    run_command(&state, &request_id, camera.remote_addr(), "pan left", camera.pan_left()).await
}

pub async fn pan_right(
    State(state): State<Arc<AppState>>,
    Extension(request_id): Extension<RequestId>,
    Extension(CameraHandle(camera)): Extension<CameraHandle>,
) -> Result<StatusCode> {
    run_command(&state, &request_id, camera.remote_addr(), "pan right", camera.pan_right()).await
}

pub async fn pan_tilt_stop(
    State(state): State<Arc<AppState>>,
    Extension(request_id): Extension<RequestId>,
    Extension(CameraHandle(camera)): Extension<CameraHandle>,
) -> Result<StatusCode> {
    run_command(&state, &request_id, camera.remote_addr(), "pan/tilt stop", camera.pan_tilt_stop()).await
}

pub async fn zoom_in(
    State(state): State<Arc<AppState>>,
    Extension(request_id): Extension<RequestId>,
    Extension(CameraHandle(camera)): Extension<CameraHandle>,
) -> Result<StatusCode> {
    run_command(&state, &request_id, camera.remote_addr(), "zoom in", camera.zoom_in()).await
}

pub async fn zoom_out(
    State(state): State<Arc<AppState>>,
    Extension(request_id): Extension<RequestId>,
    Extension(CameraHandle(camera)): Extension<CameraHandle>,
) -> Result<StatusCode> {
    run_command(&state, &request_id, camera.remote_addr(), "zoom out", camera.zoom_out()).await
}

pub async fn zoom_stop(
    State(state): State<Arc<AppState>>,
    Extension(request_id): Extension<RequestId>,
    Extension(CameraHandle(camera)): Extension<CameraHandle>,
) -> Result<StatusCode> {
    run_command(&state, &request_id, camera.remote_addr(), "zoom stop", camera.zoom_stop()).await
}

pub async fn go_to_preset(
    State(state): State<Arc<AppState>>,
    Path((_address, preset)): Path<(String, String)>,
    Extension(request_id): Extension<RequestId>,
    Extension(CameraHandle(camera)): Extension<CameraHandle>,
) -> Result<StatusCode> {
    let action = format!("go to preset {}", preset);
    run_command(&state, &request_id, camera.remote_addr(), &action, camera.go_to_preset(&preset)).await
}

/// Save the current position as a preset (admin capability)
pub async fn set_preset(
    State(state): State<Arc<AppState>>,
    Path((_address, preset)): Path<(String, String)>,
    Extension(request_id): Extension<RequestId>,
    Extension(CameraHandle(camera)): Extension<CameraHandle>,
) -> Result<StatusCode> {
    let admin = camera.as_admin().ok_or(AppError::NotSupported)?;
    let action = format!("save preset {}", preset);
    run_command(&state, &request_id, camera.remote_addr(), &action, admin.set_preset(&preset)).await
}

/// Reboot the camera (admin capability)
pub async fn reboot(
    State(state): State<Arc<AppState>>,
    Extension(request_id): Extension<RequestId>,
    Extension(CameraHandle(camera)): Extension<CameraHandle>,
) -> Result<StatusCode> {
    let admin = camera.as_admin().ok_or(AppError::NotSupported)?;
    run_command(&state, &request_id, camera.remote_addr(), "reboot", admin.reboot()).await
}
