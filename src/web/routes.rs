use axum::{middleware, routing::get, Router};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::handlers::{self, control};
use super::middleware::{camera_middleware, request_id_middleware};
use crate::state::AppState;

/// Create the main application router
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let public_routes = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/streams", get(handlers::stream_stats));

    // Per-camera routes; the camera is resolved once the route has matched
    let camera_routes = Router::new()
        .route("/v1/cameras/:address/stream", get(handlers::mjpeg_stream))
        .route("/v1/cameras/:address/tilt/up", get(control::tilt_up))
        .route("/v1/cameras/:address/tilt/down", get(control::tilt_down))
        .route("/v1/cameras/:address/pan/left", get(control::pan_left))
        .route("/v1/cameras/:address/pan/right", get(control::pan_right))
        .route("/v1/cameras/:address/pantilt/stop", get(control::pan_tilt_stop))
        .route("/v1/cameras/:address/zoom/in", get(control::zoom_in))
        .route("/v1/cameras/:address/zoom/out", get(control::zoom_out))
        .route("/v1/cameras/:address/zoom/stop", get(control::zoom_stop))
        .route("/v1/cameras/:address/preset/:preset", get(control::go_to_preset))
        .route("/v1/cameras/:address/preset/:preset/save", get(control::set_preset))
        .route("/v1/cameras/:address/reboot", get(control::reboot))
        .route_layer(middleware::from_fn_with_state(state.clone(), camera_middleware));

    let api_routes = Router::new().merge(public_routes).merge(camera_routes);

    Router::new()
        .nest("/api", api_routes)
        .layer(middleware::from_fn(request_id_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
