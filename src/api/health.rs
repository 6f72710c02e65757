// src/api/health.rs
//! Endpoint health tracking: error counting, quarantine with a one-shot
//! cooldown, and capped self-healing when every endpoint is down.
//!
//! Cooldown expiry is evaluated lazily on every health query, so no timer
//! task is ever spawned per quarantine.

use crate::api::registry::{Endpoint, EndpointRegistry, EndpointState, EndpointStats};
use crate::config::GatewayConfig;
use crate::error::{GatewayError, Result};
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq)]
pub struct HealthPolicy {
    /// Endpoint is quarantined once `error_count` exceeds this
    pub error_threshold: u32,
    pub cooldown: Duration,
    /// Self-heals allowed per `reset_window`; 0 means unbounded
    pub max_resets: u32,
    pub reset_window: Duration,
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self {
            error_threshold: 3,
            cooldown: Duration::from_secs(60),
            max_resets: 5,
            reset_window: Duration::from_secs(60),
        }
    }
}

impl From<&GatewayConfig> for HealthPolicy {
    fn from(config: &GatewayConfig) -> Self {
        Self {
            error_threshold: config.health_error_threshold,
            cooldown: config.health_cooldown(),
            max_resets: config.auto_heal.max_resets,
            reset_window: Duration::from_millis(config.auto_heal.window_ms),
        }
    }
}

pub struct HealthMonitor {
    registry: Arc<EndpointRegistry>,
    policy: HealthPolicy,
    recent_resets: Mutex<VecDeque<Instant>>,
}

/// Lifts an expired quarantine. Returns true if the endpoint came back.
fn expire_cooldown(name: &str, state: &mut EndpointState, now: Instant) -> bool {
    match state.quarantined_until {
        Some(until) if until <= now => {
            state.healthy = true;
            state.error_count = 0;
            state.quarantined_until = None;
            info!("Endpoint {} cooldown expired, back in rotation", name);
            true
        }
        _ => false,
    }
}

impl HealthMonitor {
    pub fn new(registry: Arc<EndpointRegistry>, policy: HealthPolicy) -> Self {
        info!(
            "Health monitor: threshold {} errors, cooldown {:?}, self-heal cap {} per {:?}",
            policy.error_threshold, policy.cooldown, policy.max_resets, policy.reset_window
        );
        Self {
            registry,
            policy,
            recent_resets: Mutex::new(VecDeque::new()),
        }
    }

    pub fn policy(&self) -> &HealthPolicy {
        &self.policy
    }

    pub fn registry(&self) -> &Arc<EndpointRegistry> {
        &self.registry
    }

    /// Counts a failed call. Returns true when this error put the endpoint into quarantine.
    pub async fn report_error(&self, name: &str) -> Result<bool> {
        let endpoint = self.registry.get(name)?;
        let now = Instant::now();
        let mut state = endpoint.state().write().await;
        expire_cooldown(name, &mut state, now);

        state.error_count += 1;
        state.total_errors += 1;

        if state.healthy && state.error_count > self.policy.error_threshold {
            state.healthy = false;
            state.quarantined_until = Some(now + self.policy.cooldown);
            warn!(
                "Endpoint {} quarantined after {} errors, cooldown {:?}",
                name, state.error_count, self.policy.cooldown
            );
            return Ok(true);
        }

        debug!("Endpoint {} error count: {}", name, state.error_count);
        Ok(false)
    }

    /// Successful calls are recorded but do not clear the error count;
    /// only a served cooldown does.
    pub async fn report_success(&self, name: &str) -> Result<()> {
        let endpoint = self.registry.get(name)?;
        self.check(&endpoint).await;
        Ok(())
    }

    pub async fn is_healthy(&self, name: &str) -> Result<bool> {
        let endpoint = self.registry.get(name)?;
        Ok(self.check(&endpoint).await)
    }

    /// Health of one endpoint, lifting its quarantine if the cooldown has passed
    pub async fn check(&self, endpoint: &Endpoint) -> bool {
        let now = Instant::now();
        {
            let state = endpoint.state().read().await;
            match state.quarantined_until {
                Some(until) if until <= now => {}
                _ => return state.healthy,
            }
        }
        let mut state = endpoint.state().write().await;
        expire_cooldown(endpoint.name(), &mut state, now);
        state.healthy
    }

    /// Healthy endpoints in configuration order
    pub async fn healthy_endpoints(&self) -> Vec<Arc<Endpoint>> {
        let mut healthy = Vec::with_capacity(self.registry.len());
        for endpoint in self.registry.list() {
            if self.check(endpoint).await {
                healthy.push(endpoint.clone());
            }
        }
        healthy
    }

    /// Guarantees at least one healthy endpoint, self-healing the whole set if needed.
    ///
    /// Self-heals are rate-capped; past the cap this fails with
    /// `EndpointUnavailable` until the oldest reset leaves the window.
    pub async fn ensure_available(&self) -> Result<()> {
        for endpoint in self.registry.list() {
            if self.check(endpoint).await {
                return Ok(());
            }
        }

        let now = Instant::now();
        let mut resets = self.recent_resets.lock().await;

        // Another caller may have healed the set while we waited on the lock
        for endpoint in self.registry.list() {
            if self.check(endpoint).await {
                return Ok(());
            }
        }

        while let Some(oldest) = resets.front() {
            if now.saturating_duration_since(*oldest) >= self.policy.reset_window {
                resets.pop_front();
            } else {
                break;
            }
        }

        if self.policy.max_resets > 0 && resets.len() >= self.policy.max_resets as usize {
            let retry_in = resets
                .front()
                .map(|oldest| (*oldest + self.policy.reset_window).saturating_duration_since(now))
                .unwrap_or_default();
            warn!(
                "All {} endpoints unhealthy and self-heal cap reached ({} in {:?})",
                self.registry.len(),
                resets.len(),
                self.policy.reset_window
            );
            return Err(GatewayError::EndpointUnavailable(format!(
                "all {} endpoints unhealthy, self-heal available again in {}ms",
                self.registry.len(),
                retry_in.as_millis()
            )));
        }

        for endpoint in self.registry.list() {
            let mut state = endpoint.state().write().await;
            state.healthy = true;
            state.error_count = 0;
            state.quarantined_until = None;
        }
        resets.push_back(now);

        warn!(
            "All endpoints were unhealthy, reset {} endpoints to healthy (self-heal {} in window)",
            self.registry.len(),
            resets.len()
        );
        Ok(())
    }

    pub async fn summary(&self) -> HealthSummary {
        let mut endpoints = Vec::with_capacity(self.registry.len());
        for endpoint in self.registry.list() {
            self.check(endpoint).await;
            endpoints.push(endpoint.stats().await);
        }

        let now = Instant::now();
        let self_heals_in_window = self
            .recent_resets
            .lock()
            .await
            .iter()
            .filter(|at| now.saturating_duration_since(**at) < self.policy.reset_window)
            .count();

        let total = endpoints.len();
        let healthy = endpoints.iter().filter(|e| e.healthy).count();
        let cap_reached = self.policy.max_resets > 0
            && self_heals_in_window >= self.policy.max_resets as usize;

        HealthSummary {
            status: HealthStatus::from_counts(total, healthy, cap_reached),
            total,
            healthy,
            self_heals_in_window,
            endpoints,
        }
    }

    pub async fn health_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.summary().await)?)
    }
}

/// Aggregate state of the endpoint set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum HealthStatus {
    Operational,
    Degraded,
    Down,
}

impl HealthStatus {
    /// Down when nothing is healthy, or when some endpoints are out and the
    /// self-heal cap leaves no way to bring them back early.
    pub fn from_counts(total: usize, healthy: usize, cap_reached: bool) -> Self {
        if healthy == 0 || (cap_reached && healthy < total) {
            HealthStatus::Down
        } else if healthy < total {
            HealthStatus::Degraded
        } else {
            HealthStatus::Operational
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            HealthStatus::Operational => "operational",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Down => "down",
        };
        write!(f, "{}", label)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthSummary {
    pub status: HealthStatus,
    pub total: usize,
    pub healthy: usize,
    pub self_heals_in_window: usize,
    pub endpoints: Vec<EndpointStats>,
}

impl std::fmt::Display for HealthSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "{}: {}/{} endpoints healthy",
            self.status, self.healthy, self.total
        )?;
        for endpoint in &self.endpoints {
            writeln!(f, "  {}", endpoint)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EndpointConfig;
    use tokio::time::advance;

    fn monitor(max_resets: u32) -> HealthMonitor {
        let registry = Arc::new(
            EndpointRegistry::new(&[
                EndpointConfig::new("a", "https://a.example", 1, 3),
                EndpointConfig::new("b", "https://b.example", 2, 1),
            ])
            .unwrap(),
        );
        HealthMonitor::new(
            registry,
            HealthPolicy {
                error_threshold: 3,
                cooldown: Duration::from_secs(60),
                max_resets,
                reset_window: Duration::from_secs(60),
            },
        )
    }

    async fn fail(monitor: &HealthMonitor, name: &str, times: u32) {
        for _ in 0..times {
            monitor.report_error(name).await.unwrap();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_quarantine_after_threshold_exceeded() {
        let monitor = monitor(5);

        fail(&monitor, "a", 3).await;
        assert!(monitor.is_healthy("a").await.unwrap());

        assert!(monitor.report_error("a").await.unwrap());
        assert!(!monitor.is_healthy("a").await.unwrap());
        assert!(monitor.is_healthy("b").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooldown_restores_with_zero_errors() {
        let monitor = monitor(5);
        fail(&monitor, "a", 4).await;

        advance(Duration::from_secs(59)).await;
        assert!(!monitor.is_healthy("a").await.unwrap());

        advance(Duration::from_secs(1)).await;
        assert!(monitor.is_healthy("a").await.unwrap());

        let state = monitor.registry().get("a").unwrap().snapshot().await;
        assert_eq!(state.error_count, 0);
        assert!(state.quarantined_until.is_none());
        assert_eq!(state.total_errors, 4);
    }

    #[tokio::test]
    async fn test_success_does_not_reset_error_count() {
        let monitor = monitor(5);
        fail(&monitor, "a", 2).await;
        monitor.report_success("a").await.unwrap();

        let state = monitor.registry().get("a").unwrap().snapshot().await;
        assert_eq!(state.error_count, 2);

        // Two more errors still cross the threshold
        fail(&monitor, "a", 2).await;
        assert!(!monitor.is_healthy("a").await.unwrap());
    }

    #[tokio::test]
    async fn test_unknown_endpoint_is_rejected() {
        let monitor = monitor(5);
        assert!(matches!(
            monitor.report_error("nope").await,
            Err(GatewayError::EndpointNotFound(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_self_heal_when_all_unhealthy() {
        let monitor = monitor(5);
        fail(&monitor, "a", 4).await;
        fail(&monitor, "b", 4).await;
        assert!(monitor.healthy_endpoints().await.is_empty());

        monitor.ensure_available().await.unwrap();
        assert_eq!(monitor.healthy_endpoints().await.len(), 2);
        let state = monitor.registry().get("b").unwrap().snapshot().await;
        assert_eq!(state.error_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_self_heal_cap_then_window_clears() {
        let monitor = monitor(2);

        for _ in 0..2 {
            fail(&monitor, "a", 4).await;
            fail(&monitor, "b", 4).await;
            monitor.ensure_available().await.unwrap();
        }

        fail(&monitor, "a", 4).await;
        fail(&monitor, "b", 4).await;
        assert!(matches!(
            monitor.ensure_available().await,
            Err(GatewayError::EndpointUnavailable(_))
        ));

        // Still inside both the cooldown and the reset window
        advance(Duration::from_secs(30)).await;
        assert!(monitor.ensure_available().await.is_err());

        // Cooldown has lapsed, so the endpoints recover by themselves
        advance(Duration::from_secs(30)).await;
        monitor.ensure_available().await.unwrap();
        assert_eq!(monitor.summary().await.self_heals_in_window, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbounded_self_heal() {
        let monitor = monitor(0);
        for _ in 0..20 {
            fail(&monitor, "a", 4).await;
            fail(&monitor, "b", 4).await;
            monitor.ensure_available().await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_health_json_lists_endpoints() {
        let monitor = monitor(5);
        fail(&monitor, "b", 4).await;

        let json: serde_json::Value =
            serde_json::from_str(&monitor.health_json().await.unwrap()).unwrap();
        assert_eq!(json["status"], "degraded");
        assert_eq!(json["total"], 2);
        assert_eq!(json["healthy"], 1);
        assert_eq!(json["endpoints"][1]["name"], "b");
        assert_eq!(json["endpoints"][1]["healthy"], false);
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_follows_healthy_count() {
        let monitor = monitor(5);
        assert_eq!(monitor.summary().await.status, HealthStatus::Operational);

        fail(&monitor, "a", 4).await;
        assert_eq!(monitor.summary().await.status, HealthStatus::Degraded);

        fail(&monitor, "b", 4).await;
        let summary = monitor.summary().await;
        assert_eq!(summary.status, HealthStatus::Down);
        assert!(summary.to_string().starts_with("down: 0/2"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_down_once_self_heal_cap_reached() {
        let monitor = monitor(1);
        fail(&monitor, "a", 4).await;
        fail(&monitor, "b", 4).await;
        monitor.ensure_available().await.unwrap();
        assert_eq!(monitor.summary().await.status, HealthStatus::Operational);

        // One endpoint out again with no self-heal left in the window
        fail(&monitor, "a", 4).await;
        assert_eq!(monitor.summary().await.status, HealthStatus::Down);

        advance(Duration::from_secs(60)).await;
        assert_eq!(monitor.summary().await.status, HealthStatus::Operational);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_heal_once() {
        let monitor = monitor(0);
        fail(&monitor, "a", 4).await;
        fail(&monitor, "b", 4).await;

        let outcomes =
            futures::future::join_all((0..8).map(|_| monitor.ensure_available())).await;
        assert!(outcomes.iter().all(|r| r.is_ok()));
        assert_eq!(monitor.summary().await.self_heals_in_window, 1);
    }
}
