// src/api/affinity.rs
//! Transaction affinity: every send lands on one designated primary endpoint,
//! and confirmation goes back to whichever endpoint accepted the send.

use crate::api::health::HealthMonitor;
use crate::api::registry::Endpoint;
use crate::error::{GatewayError, Result};
use log::{info, warn};
use serde::Serialize;
use solana_sdk::signature::Signature;
use std::sync::Arc;

/// Receipt of a submitted transaction, bound to the endpoint that accepted it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SentTransaction {
    #[serde(with = "signature_string")]
    pub signature: Signature,
    pub endpoint: String,
}

mod signature_string {
    use serde::Serializer;
    use solana_sdk::signature::Signature;

    pub fn serialize<S: Serializer>(signature: &Signature, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(signature)
    }
}

pub struct TransactionAffinityRouter {
    health: Arc<HealthMonitor>,
    primary: Arc<Endpoint>,
}

impl TransactionAffinityRouter {
    /// Pins to `primary_name`, or to the first configured endpoint when none is given
    pub fn new(health: Arc<HealthMonitor>, primary_name: Option<&str>) -> Result<Self> {
        let registry = health.registry();
        let primary = match primary_name {
            Some(name) => registry.get(name)?,
            None => registry
                .list()
                .first()
                .cloned()
                .ok_or_else(|| GatewayError::ConfigError("no endpoints configured".to_string()))?,
        };
        info!("Transaction affinity pinned to {}", primary.name());
        Ok(Self { health, primary })
    }

    pub fn designated(&self) -> &Arc<Endpoint> {
        &self.primary
    }

    /// Endpoint for the next send: the designated primary while healthy,
    /// otherwise the best healthy endpoint by priority
    pub async fn primary(&self) -> Result<Arc<Endpoint>> {
        self.health.ensure_available().await?;

        if self.health.check(&self.primary).await {
            return Ok(self.primary.clone());
        }

        for endpoint in self.health.registry().by_priority() {
            if endpoint.name() != self.primary.name() && self.health.check(&endpoint).await {
                warn!(
                    "Primary {} unhealthy, routing transaction to {}",
                    self.primary.name(),
                    endpoint.name()
                );
                return Ok(endpoint);
            }
        }

        Err(GatewayError::EndpointUnavailable(format!(
            "primary {} and every fallback are unhealthy",
            self.primary.name()
        )))
    }

    /// Endpoint that must confirm `receipt`
    pub fn confirming_endpoint(&self, receipt: &SentTransaction) -> Result<Arc<Endpoint>> {
        self.health.registry().get(&receipt.endpoint)
    }
}
