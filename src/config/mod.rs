//! Gateway configuration

mod schema;
mod store;

pub use schema::{ControlConfig, GatewayConfig, StreamConfig, WebConfig};
pub use store::ConfigStore;
