pub mod settings;

pub use settings::{
    AutoHealConfig, CacheConfig, EndpointConfig, GatewayConfig, RateLimitBackoffConfig,
    RetryConfig, SelectionKind,
};

use crate::error::Result;
use std::path::Path;
use std::sync::Arc;

/// Loads, validates and logs the gateway configuration.
///
/// With a path the JSON file is authoritative and env vars only override the
/// numeric limits; without one the endpoint list comes from `RPC_URL` /
/// `RPC_URL_BACKUP`.
pub fn load_config(path: Option<&Path>) -> Result<Arc<GatewayConfig>> {
    dotenv::dotenv().ok(); // Load .env file if present, ignore errors

    let config = match path {
        Some(path) => {
            let mut config = GatewayConfig::from_file(path)?;
            config.apply_env_overrides();
            config
        }
        None => GatewayConfig::from_env()?,
    };

    config.validate_and_log()?;

    Ok(Arc::new(config))
}
