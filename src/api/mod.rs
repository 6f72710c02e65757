// src/api/mod.rs
//! RPC Gateway Module
//!
//! Multi-endpoint access to Solana node providers:
//! - Token-bucket rate limiting with a FIFO waiter queue
//! - Weighted round-robin selection over healthy endpoints
//! - Health tracking with quarantine and self-healing
//! - Transaction affinity for send and confirm

pub mod affinity;
pub mod gateway;
pub mod health;
pub mod rate_limiter;
pub mod registry;
pub mod retry;
pub mod scheduler;
pub mod selector;
pub mod transport;

pub use affinity::{SentTransaction, TransactionAffinityRouter};
pub use gateway::{ApiResponse, GatewayStats, RpcGateway};
pub use health::{HealthMonitor, HealthPolicy, HealthStatus, HealthSummary};
pub use rate_limiter::{
    Admission, DrainReport, LimiterStats, RateLimitConfig, TokenBucket, TokenBucketLimiter,
};
pub use registry::{Endpoint, EndpointRegistry, EndpointState, EndpointStats};
pub use retry::RetryPolicy;
pub use scheduler::RepeatingTask;
pub use selector::{ConnectionSelector, ModuloWeighted, SelectionStrategy, SmoothWeighted};
pub use transport::{LatestBlockhash, RpcTransport, SolanaRpcTransport};
