use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{Path, Request, State},
    http::HeaderValue,
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::camera::Camera;
use crate::error::{AppError, CameraError};
use crate::state::AppState;

/// Request id header, read from the client or generated
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Request id of the current request
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

/// Camera resolved from the `:address` route parameter
#[derive(Clone)]
pub struct CameraHandle(pub Arc<dyn Camera>);

/// Attach a request id and log the start and end of every request
pub async fn request_id_middleware(mut request: Request, next: Next) -> Response {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    request.extensions_mut().insert(RequestId(request_id.clone()));

    let span = info_span!(
        "request",
        request_id = %request_id,
        method = %request.method(),
        path = %request.uri().path(),
    );

    async move {
        let started = Instant::now();
        info!("Starting request");

        let mut response = next.run(request).await;

        info!(
            status = response.status().as_u16(),
            took_ms = started.elapsed().as_millis() as u64,
            "Finished request"
        );
        if let Ok(value) = HeaderValue::from_str(&request_id) {
            response.headers_mut().insert(REQUEST_ID_HEADER, value);
        }
        response
    }
    .instrument(span)
    .await
}

/// Resolve the camera for `:address` and store it in the request extensions
pub async fn camera_middleware(
    State(state): State<Arc<AppState>>,
    Path(params): Path<HashMap<String, String>>,
    mut request: Request,
    next: Next,
) -> Response {
    let address = params.get("address").map(|a| a.trim()).unwrap_or_default();
    if address.is_empty() {
        return AppError::BadRequest("camera address is required".into()).into_response();
    }

    let deadline = state.config.get().control.camera_create_timeout();
    let camera = match tokio::time::timeout(deadline, state.cameras.new_camera(address)).await {
        Ok(Ok(camera)) => camera,
        Ok(Err(e)) => {
            warn!(camera = %address, error = %e, "Unable to create camera");
            return AppError::CameraCreate(e).into_response();
        }
        Err(_) => {
            warn!(camera = %address, timeout_ms = deadline.as_millis() as u64, "Timed out creating camera");
            return AppError::CameraCreate(CameraError::Unreachable {
                address: address.to_string(),
                reason: format!("no response within {:?}", deadline),
            })
            .into_response();
        }
    };

    request.extensions_mut().insert(CameraHandle(camera));
    next.run(request).await
}
