mod handlers;
pub mod middleware;
mod routes;

pub use middleware::{CameraHandle, RequestId, REQUEST_ID_HEADER};
pub use routes::create_router;
