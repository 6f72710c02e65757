// src/api/registry.rs
//! Endpoint Registry
//!
//! Static, config-driven list of remote node endpoints. Each endpoint carries
//! its immutable configuration and a small block of mutable health and usage
//! counters that the health monitor and the gateway update in place.

use crate::config::EndpointConfig;
use crate::error::{GatewayError, Result};
use chrono::{DateTime, Utc};
use log::info;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::Instant;

/// Mutable per-endpoint counters
#[derive(Debug, Clone)]
pub struct EndpointState {
    pub healthy: bool,
    /// Errors since the last cooldown reset
    pub error_count: u32,
    /// Cooldown deadline, set while the endpoint is quarantined
    pub quarantined_until: Option<Instant>,
    pub request_count: u64,
    pub total_errors: u64,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl Default for EndpointState {
    fn default() -> Self {
        Self {
            healthy: true,
            error_count: 0,
            quarantined_until: None,
            request_count: 0,
            total_errors: 0,
            last_used_at: None,
        }
    }
}

/// A remote node endpoint
#[derive(Debug)]
pub struct Endpoint {
    config: EndpointConfig,
    state: RwLock<EndpointState>,
}

impl Endpoint {
    pub fn new(config: EndpointConfig) -> Self {
        Self {
            config,
            state: RwLock::new(EndpointState::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    pub fn stream_url(&self) -> Option<&str> {
        self.config.stream_url.as_deref()
    }

    pub fn api_key(&self) -> Option<&str> {
        self.config.api_key.as_deref()
    }

    pub fn priority(&self) -> u32 {
        self.config.priority
    }

    pub fn weight(&self) -> u32 {
        self.config.weight
    }

    pub fn config(&self) -> &EndpointConfig {
        &self.config
    }

    pub async fn snapshot(&self) -> EndpointState {
        self.state.read().await.clone()
    }

    pub async fn is_marked_healthy(&self) -> bool {
        self.state.read().await.healthy
    }

    /// Count one dispatched request against this endpoint
    pub async fn record_use(&self) {
        let mut state = self.state.write().await;
        state.request_count += 1;
        state.last_used_at = Some(Utc::now());
    }

    pub(crate) fn state(&self) -> &RwLock<EndpointState> {
        &self.state
    }

    pub async fn stats(&self) -> EndpointStats {
        let state = self.snapshot().await;
        let now = Instant::now();
        EndpointStats {
            name: self.config.name.clone(),
            priority: self.config.priority,
            weight: self.config.weight,
            healthy: state.healthy,
            error_count: state.error_count,
            total_errors: state.total_errors,
            request_count: state.request_count,
            last_used_at: state.last_used_at,
            quarantine_remaining_ms: state
                .quarantined_until
                .map(|until| until.saturating_duration_since(now).as_millis() as u64),
        }
    }
}

/// Holds every configured endpoint in configuration order
#[derive(Debug)]
pub struct EndpointRegistry {
    endpoints: Vec<Arc<Endpoint>>,
    index: HashMap<String, usize>,
}

impl EndpointRegistry {
    pub fn new(configs: &[EndpointConfig]) -> Result<Self> {
        if configs.is_empty() {
            return Err(GatewayError::ConfigError(
                "endpoint registry needs at least one endpoint".to_string(),
            ));
        }

        let mut endpoints = Vec::with_capacity(configs.len());
        let mut index = HashMap::with_capacity(configs.len());

        for config in configs {
            if config.weight == 0 {
                return Err(GatewayError::ConfigError(format!(
                    "endpoint {} must have weight >= 1",
                    config.name
                )));
            }
            if index.insert(config.name.clone(), endpoints.len()).is_some() {
                return Err(GatewayError::ConfigError(format!(
                    "duplicate endpoint name: {}",
                    config.name
                )));
            }
            endpoints.push(Arc::new(Endpoint::new(config.clone())));
        }

        info!(
            "Built endpoint registry with {} endpoints: {:?}",
            endpoints.len(),
            endpoints.iter().map(|e| e.name()).collect::<Vec<_>>()
        );

        Ok(Self { endpoints, index })
    }

    pub fn list(&self) -> &[Arc<Endpoint>] {
        &self.endpoints
    }

    pub fn get(&self, name: &str) -> Result<Arc<Endpoint>> {
        self.index
            .get(name)
            .map(|&i| self.endpoints[i].clone())
            .ok_or_else(|| GatewayError::EndpointNotFound(name.to_string()))
    }

    /// Endpoints sorted by priority, configuration order breaking ties
    pub fn by_priority(&self) -> Vec<Arc<Endpoint>> {
        let mut sorted = self.endpoints.clone();
        sorted.sort_by_key(|e| e.priority()); // stable
        sorted
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    pub async fn stats(&self) -> Vec<EndpointStats> {
        let mut stats = Vec::with_capacity(self.endpoints.len());
        for endpoint in &self.endpoints {
            stats.push(endpoint.stats().await);
        }
        stats
    }
}

/// Observability snapshot for one endpoint
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointStats {
    pub name: String,
    pub priority: u32,
    pub weight: u32,
    pub healthy: bool,
    pub error_count: u32,
    pub total_errors: u64,
    pub request_count: u64,
    pub last_used_at: Option<DateTime<Utc>>,
    pub quarantine_remaining_ms: Option<u64>,
}

impl std::fmt::Display for EndpointStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: {} (p{} w{}, {} requests, {} errors, last used: {})",
            self.name,
            if self.healthy { "healthy" } else { "UNHEALTHY" },
            self.priority,
            self.weight,
            self.request_count,
            self.error_count,
            self.last_used_at
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "never".to_string())
        )
    }
}
