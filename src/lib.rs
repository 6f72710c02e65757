pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod utils;

pub use api::{ApiResponse, GatewayStats, RpcGateway, RpcTransport, SentTransaction};
pub use config::{load_config, GatewayConfig};
pub use error::{GatewayError, Result};
