use std::path::Path;
use std::sync::Arc;

use super::GatewayConfig;
use crate::error::{AppError, Result};

/// Validated configuration, read once at startup
///
/// Cloning is cheap; every clone shares the same `GatewayConfig`.
#[derive(Clone)]
pub struct ConfigStore {
    config: Arc<GatewayConfig>,
}

impl ConfigStore {
    /// Store holding `config` with no backing file
    pub fn in_memory(config: GatewayConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config: Arc::new(config),
        })
    }

    /// Load the configuration from `path`, or defaults if the file does not exist
    pub async fn load(path: &Path) -> Result<Self> {
        let config = match tokio::fs::read_to_string(path).await {
            Ok(json) => serde_json::from_str::<GatewayConfig>(&json)
                .map_err(|e| AppError::Config(format!("{}: {}", path.display(), e)))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("Config file {} not found, using defaults", path.display());
                GatewayConfig::default()
            }
            Err(e) => {
                return Err(AppError::Config(format!("unable to read {}: {}", path.display(), e)));
            }
        };
        Self::in_memory(config)
    }

    pub fn get(&self) -> Arc<GatewayConfig> {
        self.config.clone()
    }
}
