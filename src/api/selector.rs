// src/api/selector.rs
//! Weighted round-robin endpoint selection for reads.
//!
//! The selector owns the round counter and asks a pluggable
//! `SelectionStrategy` which healthy endpoint serves the round.

use crate::api::health::HealthMonitor;
use crate::api::registry::Endpoint;
use crate::config::SelectionKind;
use crate::error::{GatewayError, Result};
use log::{debug, info};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Chooses one of the healthy candidates (configuration order) for a round.
/// Returning `None` lets the selector fall back to priority order.
pub trait SelectionStrategy: Send + Sync {
    fn name(&self) -> &'static str;
    fn pick(&self, round: u64, candidates: &[Arc<Endpoint>]) -> Option<usize>;
}

/// Slice heuristic: an endpoint owns a slice of `weight * k` rounds and is
/// picked during the first half of it. Cheap and stateless but only roughly
/// weighted; equal-weight endpoints shadow each other.
#[derive(Debug, Clone)]
pub struct ModuloWeighted {
    k: u64,
}

impl ModuloWeighted {
    pub fn new(k: u64) -> Self {
        Self { k: k.max(1) }
    }
}

impl SelectionStrategy for ModuloWeighted {
    fn name(&self) -> &'static str {
        "modulo"
    }

    fn pick(&self, round: u64, candidates: &[Arc<Endpoint>]) -> Option<usize> {
        candidates.iter().position(|endpoint| {
            let slice = endpoint.weight() as u64 * self.k;
            round % slice < slice / 2
        })
    }
}

/// Smooth weighted round robin: every endpoint gets exactly its weight share
/// of each `sum(weights)` rounds, interleaved rather than in bursts.
#[derive(Debug, Default)]
pub struct SmoothWeighted {
    current: Mutex<HashMap<String, i64>>,
}

impl SmoothWeighted {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SelectionStrategy for SmoothWeighted {
    fn name(&self) -> &'static str {
        "smooth"
    }

    fn pick(&self, _round: u64, candidates: &[Arc<Endpoint>]) -> Option<usize> {
        if candidates.is_empty() {
            return None;
        }

        let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        let mut total = 0i64;
        let mut best: Option<(usize, i64)> = None;

        for (i, endpoint) in candidates.iter().enumerate() {
            let weight = endpoint.weight() as i64;
            total += weight;
            let score = current.entry(endpoint.name().to_string()).or_insert(0);
            *score += weight;
            if best.map_or(true, |(_, top)| *score > top) {
                best = Some((i, *score));
            }
        }

        let (chosen, _) = best?;
        if let Some(score) = current.get_mut(candidates[chosen].name()) {
            *score -= total;
        }
        Some(chosen)
    }
}

pub struct ConnectionSelector {
    health: Arc<HealthMonitor>,
    strategy: Box<dyn SelectionStrategy>,
    round: AtomicU64,
}

impl ConnectionSelector {
    pub fn new(health: Arc<HealthMonitor>, strategy: Box<dyn SelectionStrategy>) -> Self {
        info!("Connection selector using {} strategy", strategy.name());
        Self {
            health,
            strategy,
            round: AtomicU64::new(0),
        }
    }

    pub fn from_kind(health: Arc<HealthMonitor>, kind: SelectionKind, slice_factor: u64) -> Self {
        let strategy: Box<dyn SelectionStrategy> = match kind {
            SelectionKind::Smooth => Box::new(SmoothWeighted::new()),
            SelectionKind::Modulo => Box::new(ModuloWeighted::new(slice_factor)),
        };
        Self::new(health, strategy)
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    pub fn rounds(&self) -> u64 {
        self.round.load(Ordering::Relaxed)
    }

    /// Next healthy endpoint for a read
    pub async fn next(&self) -> Result<Arc<Endpoint>> {
        self.health.ensure_available().await?;

        let healthy = self.health.healthy_endpoints().await;
        let round = self.round.fetch_add(1, Ordering::Relaxed);

        if let Some(i) = self.strategy.pick(round, &healthy) {
            return Ok(healthy[i].clone());
        }

        let fallback = healthy
            .iter()
            .min_by_key(|endpoint| endpoint.priority())
            .cloned()
            .ok_or_else(|| {
                GatewayError::EndpointUnavailable("no healthy endpoint to select".to_string())
            })?;
        debug!(
            "Round {} not claimed by {} strategy, falling back to {}",
            round,
            self.strategy.name(),
            fallback.name()
        );
        Ok(fallback)
    }
}
