use crate::error::{GatewayError, Result};
use serde::{Deserialize, Serialize};
use solana_sdk::commitment_config::{CommitmentConfig, CommitmentLevel};
use std::collections::HashSet;
use std::env;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// One remote node provider as it appears in configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointConfig {
    pub name: String,
    #[serde(rename = "baseURL", alias = "baseUrl")]
    pub base_url: String,
    #[serde(rename = "streamURL", alias = "streamUrl", default)]
    pub stream_url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_priority")]
    pub priority: u32, // Lower = preferred tier
    #[serde(default = "default_weight")]
    pub weight: u32,
}

impl EndpointConfig {
    pub fn new(name: &str, base_url: &str, priority: u32, weight: u32) -> Self {
        Self {
            name: name.to_string(),
            base_url: base_url.to_string(),
            stream_url: None,
            api_key: None,
            priority,
            weight,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectionKind {
    Smooth,
    Modulo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AutoHealConfig {
    /// 0 disables the cap
    pub max_resets: u32,
    pub window_ms: u64,
}

impl Default for AutoHealConfig {
    fn default() -> Self {
        Self {
            max_resets: 5,
            window_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RateLimitBackoffConfig {
    pub base_ms: u64,
    pub max_ms: u64,
}

impl Default for RateLimitBackoffConfig {
    fn default() -> Self {
        Self {
            base_ms: 500,
            max_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_pct: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            base_delay_ms: 100,
            max_delay_ms: 2_000,
            jitter_pct: 0.25,
        }
    }
}

/// Per-category TTLs for the read cache. A TTL of 0 disables caching for that category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub account_info_ttl_ms: u64,
    pub balance_ttl_ms: u64,
    pub blockhash_ttl_ms: u64,
    pub token_accounts_ttl_ms: u64,
    pub program_accounts_ttl_ms: u64,
    pub token_account_balance_ttl_ms: u64,
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            account_info_ttl_ms: 2_000,
            balance_ttl_ms: 2_000,
            blockhash_ttl_ms: 400, // Roughly one slot
            token_accounts_ttl_ms: 5_000,
            program_accounts_ttl_ms: 10_000,
            token_account_balance_ttl_ms: 2_000,
            max_entries: 10_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    pub endpoints: Vec<EndpointConfig>,
    #[serde(default)]
    pub primary_endpoint: Option<String>,
    #[serde(default = "default_rate_limit_per_window")]
    pub rate_limit_per_window: u32,
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,
    #[serde(default = "default_max_wait_time_ms")]
    pub max_wait_time_ms: u64,
    #[serde(default = "default_scheduler_tick_ms")]
    pub scheduler_tick_ms: u64,
    #[serde(default = "default_health_error_threshold")]
    pub health_error_threshold: u32,
    #[serde(default = "default_health_cooldown_ms")]
    pub health_cooldown_ms: u64,
    #[serde(default)]
    pub auto_heal: AutoHealConfig,
    #[serde(default = "default_selection")]
    pub selection: SelectionKind,
    #[serde(default = "default_modulo_slice_factor")]
    pub modulo_slice_factor: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_commitment")]
    pub commitment: String,
    #[serde(default)]
    pub skip_preflight: bool,
    #[serde(default)]
    pub rate_limit_backoff: RateLimitBackoffConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

fn default_priority() -> u32 {
    1
}
fn default_weight() -> u32 {
    1
}
fn default_rate_limit_per_window() -> u32 {
    225
}
fn default_window_ms() -> u64 {
    60_000
}
fn default_max_wait_time_ms() -> u64 {
    10_000
}
fn default_scheduler_tick_ms() -> u64 {
    100
}
fn default_health_error_threshold() -> u32 {
    3
}
fn default_health_cooldown_ms() -> u64 {
    60_000
}
fn default_selection() -> SelectionKind {
    SelectionKind::Smooth
}
fn default_modulo_slice_factor() -> u64 {
    10
}
fn default_request_timeout_ms() -> u64 {
    30_000
}
fn default_commitment() -> String {
    "confirmed".to_string()
}

impl GatewayConfig {
    /// Config with the given endpoints and every other knob at its default.
    pub fn with_endpoints(endpoints: Vec<EndpointConfig>) -> Self {
        Self {
            endpoints,
            primary_endpoint: None,
            rate_limit_per_window: default_rate_limit_per_window(),
            window_ms: default_window_ms(),
            max_wait_time_ms: default_max_wait_time_ms(),
            scheduler_tick_ms: default_scheduler_tick_ms(),
            health_error_threshold: default_health_error_threshold(),
            health_cooldown_ms: default_health_cooldown_ms(),
            auto_heal: AutoHealConfig::default(),
            selection: default_selection(),
            modulo_slice_factor: default_modulo_slice_factor(),
            request_timeout_ms: default_request_timeout_ms(),
            commitment: default_commitment(),
            skip_preflight: false,
            rate_limit_backoff: RateLimitBackoffConfig::default(),
            retry: RetryConfig::default(),
            cache: CacheConfig::default(),
        }
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            GatewayError::ConfigError(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&raw)
    }

    /// Builds a config from `RPC_URL` plus comma-separated `RPC_URL_BACKUP`.
    /// The primary gets priority 1, backups get priority 2 and up.
    pub fn from_env() -> Result<Self> {
        let primary = env::var("RPC_URL")
            .map_err(|_| GatewayError::ConfigError("RPC_URL is not set".to_string()))?;

        let mut endpoints = vec![EndpointConfig::new("primary", primary.trim(), 1, 3)];
        if let Ok(backups) = env::var("RPC_URL_BACKUP") {
            for (i, url) in backups
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .enumerate()
            {
                endpoints.push(EndpointConfig::new(
                    &format!("backup-{}", i + 1),
                    url,
                    2 + i as u32,
                    1,
                ));
            }
        }

        let mut config = Self::with_endpoints(endpoints);
        config.apply_env_overrides();
        Ok(config)
    }

    /// Numeric overrides that take precedence over the file.
    pub fn apply_env_overrides(&mut self) {
        if let Some(v) = env_parse("RPC_RATE_LIMIT_PER_WINDOW") {
            self.rate_limit_per_window = v;
        }
        if let Some(v) = env_parse("RPC_WINDOW_MS") {
            self.window_ms = v;
        }
        if let Some(v) = env_parse("RPC_MAX_WAIT_MS") {
            self.max_wait_time_ms = v;
        }
        if let Some(v) = env_parse("RPC_REQUEST_TIMEOUT_MS") {
            self.request_timeout_ms = v;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.endpoints.is_empty() {
            return Err(GatewayError::ConfigError(
                "at least one endpoint is required".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for ep in &self.endpoints {
            if !seen.insert(ep.name.as_str()) {
                return Err(GatewayError::ConfigError(format!(
                    "duplicate endpoint name: {}",
                    ep.name
                )));
            }
            if ep.weight == 0 {
                return Err(GatewayError::ConfigError(format!(
                    "endpoint {} must have weight >= 1",
                    ep.name
                )));
            }
            if ep.base_url.is_empty() {
                return Err(GatewayError::ConfigError(format!(
                    "endpoint {} has an empty baseURL",
                    ep.name
                )));
            }
        }

        if let Some(primary) = &self.primary_endpoint {
            if !seen.contains(primary.as_str()) {
                return Err(GatewayError::ConfigError(format!(
                    "primaryEndpoint {} is not a configured endpoint",
                    primary
                )));
            }
        }

        if self.rate_limit_per_window == 0 || self.window_ms == 0 {
            return Err(GatewayError::ConfigError(
                "rateLimitPerWindow and windowMs must be positive".to_string(),
            ));
        }
        if self.scheduler_tick_ms == 0 {
            return Err(GatewayError::ConfigError(
                "schedulerTickMs must be positive".to_string(),
            ));
        }
        if self.selection == SelectionKind::Modulo && self.modulo_slice_factor == 0 {
            return Err(GatewayError::ConfigError(
                "moduloSliceFactor must be positive".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(GatewayError::ConfigError(
                "retry.maxAttempts must be at least 1".to_string(),
            ));
        }
        self.commitment_config()?;

        Ok(())
    }

    pub fn commitment_config(&self) -> Result<CommitmentConfig> {
        CommitmentLevel::from_str(&self.commitment)
            .map(|commitment| CommitmentConfig { commitment })
            .map_err(|_| {
                GatewayError::ConfigError(format!("unknown commitment level: {}", self.commitment))
            })
    }

    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    pub fn max_wait_time(&self) -> Duration {
        Duration::from_millis(self.max_wait_time_ms)
    }

    pub fn scheduler_tick(&self) -> Duration {
        Duration::from_millis(self.scheduler_tick_ms)
    }

    pub fn health_cooldown(&self) -> Duration {
        Duration::from_millis(self.health_cooldown_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn validate_and_log(&self) -> Result<()> {
        self.validate()?;
        log::info!(
            "Gateway configuration loaded: {} endpoints, {} req / {}ms, max wait {}ms, selection {:?}",
            self.endpoints.len(),
            self.rate_limit_per_window,
            self.window_ms,
            self.max_wait_time_ms,
            self.selection
        );
        for ep in &self.endpoints {
            // base URLs often embed credentials, so only names are logged
            log::debug!(
                "  endpoint {} (priority: {}, weight: {}, stream: {})",
                ep.name,
                ep.priority,
                ep.weight,
                ep.stream_url.is_some()
            );
        }
        Ok(())
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SAMPLE: &str = r#"{
        "endpoints": [
            {"name": "helius", "baseURL": "https://mainnet.helius-rpc.com", "priority": 1, "weight": 3, "apiKey": "k"},
            {"name": "triton", "baseURL": "https://triton.example", "streamURL": "wss://triton.example", "priority": 1, "weight": 3},
            {"name": "public", "baseUrl": "https://api.mainnet-beta.solana.com", "priority": 2, "weight": 1}
        ],
        "rateLimitPerWindow": 225,
        "windowMs": 60000,
        "maxWaitTimeMs": 5000,
        "healthErrorThreshold": 3,
        "healthCooldownMs": 60000
    }"#;

    #[test]
    fn test_parse_sample_config() {
        let config = GatewayConfig::from_json_str(SAMPLE).unwrap();
        assert_eq!(config.endpoints.len(), 3);
        assert_eq!(config.endpoints[0].api_key.as_deref(), Some("k"));
        assert_eq!(
            config.endpoints[1].stream_url.as_deref(),
            Some("wss://triton.example")
        );
        assert_eq!(config.endpoints[2].base_url, "https://api.mainnet-beta.solana.com");
        assert_eq!(config.max_wait_time_ms, 5000);
        assert_eq!(config.scheduler_tick_ms, 100);
        assert_eq!(config.selection, SelectionKind::Smooth);
        assert_eq!(config.retry, RetryConfig::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_zero_weight_and_duplicates() {
        let mut config = GatewayConfig::from_json_str(SAMPLE).unwrap();
        config.endpoints[2].weight = 0;
        assert!(matches!(config.validate(), Err(GatewayError::ConfigError(_))));

        let mut config = GatewayConfig::from_json_str(SAMPLE).unwrap();
        config.endpoints[1].name = "helius".to_string();
        assert!(matches!(config.validate(), Err(GatewayError::ConfigError(_))));
    }

    #[test]
    fn test_rejects_unknown_primary_and_commitment() {
        let mut config = GatewayConfig::from_json_str(SAMPLE).unwrap();
        config.primary_endpoint = Some("nope".to_string());
        assert!(config.validate().is_err());

        let mut config = GatewayConfig::from_json_str(SAMPLE).unwrap();
        config.commitment = "sorta".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_commitment_parses() {
        let mut config = GatewayConfig::with_endpoints(vec![EndpointConfig::new("a", "http://a", 1, 1)]);
        config.commitment = "finalized".to_string();
        assert_eq!(config.commitment_config().unwrap(), CommitmentConfig::finalized());
    }

    #[test]
    fn test_empty_endpoints_rejected() {
        let config = GatewayConfig::with_endpoints(vec![]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_nested_sections_use_defaults() {
        let raw = r#"{
            "endpoints": [{"name": "a", "baseURL": "https://a.example"}],
            "retry": {"maxAttempts": 3},
            "autoHeal": {"maxResets": 0},
            "rateLimitBackoff": {"baseMs": 250},
            "cache": {"enabled": true}
        }"#;
        let config = GatewayConfig::from_json_str(raw).unwrap();

        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.base_delay_ms, RetryConfig::default().base_delay_ms);
        assert_eq!(config.auto_heal.max_resets, 0);
        assert_eq!(config.auto_heal.window_ms, 60_000);
        assert_eq!(config.rate_limit_backoff.base_ms, 250);
        assert_eq!(config.rate_limit_backoff.max_ms, 10_000);
        assert_eq!(config.cache.token_account_balance_ttl_ms, 2_000);
        assert!(config.validate().is_ok());
    }
}
