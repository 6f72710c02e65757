// src/api/gateway.rs
//! RPC Gateway facade
//!
//! Single entry point for every node call:
//! - Read cache lookup, then a rate-limit token, then an endpoint
//! - Reads rotate across healthy endpoints; sends and confirms stay pinned
//! - Failures are reported to the health monitor and surfaced with the endpoint
//!   that produced them

use crate::api::affinity::{SentTransaction, TransactionAffinityRouter};
use crate::api::health::{HealthMonitor, HealthPolicy, HealthStatus};
use crate::api::rate_limiter::{Admission, LimiterStats, RateLimitConfig, TokenBucketLimiter};
use crate::api::registry::{Endpoint, EndpointRegistry, EndpointStats};
use crate::api::retry::RetryPolicy;
use crate::api::scheduler::RepeatingTask;
use crate::api::selector::ConnectionSelector;
use crate::api::transport::{LatestBlockhash, RpcTransport, SolanaRpcTransport};
use crate::cache::{CacheCategory, CacheMetrics, ReadCache};
use crate::config::GatewayConfig;
use crate::error::{GatewayError, Result, TransportError};
use log::{debug, info, warn};
use serde::{de::DeserializeOwned, Serialize};
use solana_account_decoder::parse_token::UiTokenAmount;
use solana_client::rpc_filter::RpcFilterType;
use solana_client::rpc_request::TokenAccountsFilter;
use solana_client::rpc_response::RpcKeyedAccount;
use solana_sdk::account::Account;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use solana_sdk::transaction::VersionedTransaction;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Response with metadata
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse<T> {
    pub data: T,
    /// Endpoint that served the call; empty for cache hits
    pub endpoint: String,
    pub latency_ms: u64,
    pub attempt: u32,
    pub from_cache: bool,
}

impl<T> ApiResponse<T> {
    pub fn new(data: T, endpoint: String, latency_ms: u64, attempt: u32) -> Self {
        Self {
            data,
            endpoint,
            latency_ms,
            attempt,
            from_cache: false,
        }
    }

    pub fn cached(data: T) -> Self {
        Self {
            data,
            endpoint: String::new(),
            latency_ms: 0,
            attempt: 0,
            from_cache: true,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> ApiResponse<U> {
        ApiResponse {
            data: f(self.data),
            endpoint: self.endpoint,
            latency_ms: self.latency_ms,
            attempt: self.attempt,
            from_cache: self.from_cache,
        }
    }
}

/// Token-account filter rebuildable per attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OwnerFilter {
    Mint(Pubkey),
    Program(Pubkey),
}

impl OwnerFilter {
    fn from_filter(filter: Option<TokenAccountsFilter>) -> Self {
        match filter {
            Some(TokenAccountsFilter::Mint(mint)) => OwnerFilter::Mint(mint),
            Some(TokenAccountsFilter::ProgramId(program)) => OwnerFilter::Program(program),
            None => OwnerFilter::Program(spl_token::id()),
        }
    }

    fn to_filter(self) -> TokenAccountsFilter {
        match self {
            OwnerFilter::Mint(mint) => TokenAccountsFilter::Mint(mint),
            OwnerFilter::Program(program) => TokenAccountsFilter::ProgramId(program),
        }
    }

    fn cache_param(&self) -> String {
        match self {
            OwnerFilter::Mint(mint) => format!("mint={}", mint),
            OwnerFilter::Program(program) => format!("program={}", program),
        }
    }
}

pub struct RpcGateway {
    config: Arc<GatewayConfig>,
    registry: Arc<EndpointRegistry>,
    limiter: Arc<TokenBucketLimiter>,
    health: Arc<HealthMonitor>,
    selector: ConnectionSelector,
    router: TransactionAffinityRouter,
    cache: ReadCache,
    retry: RetryPolicy,
    transport: Arc<dyn RpcTransport>,
    drain_task: Mutex<Option<RepeatingTask>>,
    shut_down: AtomicBool,
}

impl RpcGateway {
    /// Builds the gateway over `transport` and starts the limiter drain loop.
    /// Must be called from within a tokio runtime.
    pub fn new(config: Arc<GatewayConfig>, transport: Arc<dyn RpcTransport>) -> Result<Self> {
        info!("🏗️ Initializing RPC gateway");
        config.validate()?;
        let registry = Arc::new(EndpointRegistry::new(&config.endpoints)?);
        Self::build(config, registry, transport)
    }

    /// Gateway over real HTTP JSON-RPC clients
    pub fn connect(config: Arc<GatewayConfig>) -> Result<Self> {
        info!("🏗️ Initializing RPC gateway over HTTP");
        config.validate()?;
        let registry = Arc::new(EndpointRegistry::new(&config.endpoints)?);
        let transport = SolanaRpcTransport::new(
            &registry,
            config.commitment_config()?,
            config.request_timeout(),
        )?;
        Self::build(config, registry, Arc::new(transport))
    }

    fn build(
        config: Arc<GatewayConfig>,
        registry: Arc<EndpointRegistry>,
        transport: Arc<dyn RpcTransport>,
    ) -> Result<Self> {
        let limiter = Arc::new(TokenBucketLimiter::new(RateLimitConfig::from(config.as_ref())));
        let health = Arc::new(HealthMonitor::new(
            registry.clone(),
            HealthPolicy::from(config.as_ref()),
        ));
        let selector =
            ConnectionSelector::from_kind(health.clone(), config.selection, config.modulo_slice_factor);
        let router =
            TransactionAffinityRouter::new(health.clone(), config.primary_endpoint.as_deref())?;
        let cache = ReadCache::new(config.cache.clone());
        let retry = RetryPolicy::from_config(&config.retry);

        let drain_limiter = limiter.clone();
        let drain_task = RepeatingTask::spawn(
            "rate-limit-drain",
            config.scheduler_tick(),
            move || {
                let limiter = drain_limiter.clone();
                async move {
                    limiter.drain().await;
                }
            },
        );

        info!(
            "✅ RPC gateway ready: {} endpoints, transactions pinned to {}",
            registry.len(),
            router.designated().name()
        );

        Ok(Self {
            config,
            registry,
            limiter,
            health,
            selector,
            router,
            cache,
            retry,
            transport,
            drain_task: Mutex::new(Some(drain_task)),
            shut_down: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<EndpointRegistry> {
        &self.registry
    }

    pub fn health(&self) -> &Arc<HealthMonitor> {
        &self.health
    }

    pub fn limiter(&self) -> &Arc<TokenBucketLimiter> {
        &self.limiter
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    fn ensure_running(&self) -> Result<()> {
        if self.is_shut_down() {
            Err(GatewayError::ShutDown)
        } else {
            Ok(())
        }
    }

    /// Waits for a rate-limit token
    async fn admit(&self) -> Result<()> {
        self.ensure_running()?;
        match self.limiter.acquire().await {
            Admission::Granted { waited } => {
                if !waited.is_zero() {
                    debug!("Rate-limit token granted after {:?}", waited);
                }
                Ok(())
            }
            Admission::TimedOut { waited } => {
                self.ensure_running()?;
                Err(GatewayError::RateLimitTimeout {
                    waited_ms: waited.as_millis() as u64,
                    max_wait_ms: self.config.max_wait_time_ms,
                })
            }
        }
    }

    /// Issues one call on `endpoint` and feeds the outcome back into health and the limiter
    async fn dispatch<T, F, Fut>(
        &self,
        method: &'static str,
        endpoint: Arc<Endpoint>,
        attempt: u32,
        call: &F,
    ) -> Result<ApiResponse<T>>
    where
        F: Fn(Arc<Endpoint>) -> Fut,
        Fut: Future<Output = std::result::Result<T, TransportError>>,
    {
        endpoint.record_use().await;
        let started = Instant::now();

        match call(endpoint.clone()).await {
            Ok(data) => {
                let latency_ms = started.elapsed().as_millis() as u64;
                self.health.report_success(endpoint.name()).await?;
                self.limiter.on_success().await;
                debug!("{} served by {} in {}ms", method, endpoint.name(), latency_ms);
                Ok(ApiResponse::new(
                    data,
                    endpoint.name().to_string(),
                    latency_ms,
                    attempt,
                ))
            }
            Err(source) => {
                if source.is_rate_limited() {
                    self.limiter.on_rate_limited().await;
                }
                self.health.report_error(endpoint.name()).await?;
                warn!("❌ {} failed on {}: {}", method, endpoint.name(), source);
                Err(GatewayError::Transport {
                    endpoint: endpoint.name().to_string(),
                    method,
                    source,
                })
            }
        }
    }

    async fn read_once<T, F, Fut>(&self, method: &'static str, attempt: u32, call: &F) -> Result<ApiResponse<T>>
    where
        F: Fn(Arc<Endpoint>) -> Fut,
        Fut: Future<Output = std::result::Result<T, TransportError>>,
    {
        // Unavailability must surface before a token is spent
        self.health.ensure_available().await?;
        self.admit().await?;
        let endpoint = self.selector.next().await?;
        self.dispatch(method, endpoint, attempt, call).await
    }

    /// Cache, then token, then selector, then the call; fresh results are cached
    async fn read<T, F, Fut>(
        &self,
        category: CacheCategory,
        params: &[&str],
        call: F,
    ) -> Result<ApiResponse<T>>
    where
        T: Serialize + DeserializeOwned,
        F: Fn(Arc<Endpoint>) -> Fut,
        Fut: Future<Output = std::result::Result<T, TransportError>>,
    {
        self.ensure_running()?;
        if let Some(data) = self.cache.get_json::<T>(category, params) {
            return Ok(ApiResponse::cached(data));
        }

        let method = category.prefix();
        let call = &call;
        let response = self
            .retry
            .execute(method, |attempt| self.read_once(method, attempt, call))
            .await?;

        if let Err(e) = self.cache.set_ex(category, params, &response.data) {
            warn!("Failed to cache {} response: {}", method, e);
        }
        Ok(response)
    }

    pub async fn get_account_info(&self, pubkey: &Pubkey) -> Result<ApiResponse<Option<Account>>> {
        let key = pubkey.to_string();
        let pubkey = *pubkey;
        self.read(CacheCategory::AccountInfo, &[key.as_str()], |endpoint| {
            let transport = self.transport.clone();
            async move { transport.get_account_info(&endpoint, &pubkey).await }
        })
        .await
    }

    pub async fn get_balance(&self, pubkey: &Pubkey) -> Result<ApiResponse<u64>> {
        let key = pubkey.to_string();
        let pubkey = *pubkey;
        self.read(CacheCategory::Balance, &[key.as_str()], |endpoint| {
            let transport = self.transport.clone();
            async move { transport.get_balance(&endpoint, &pubkey).await }
        })
        .await
    }

    pub async fn get_latest_blockhash(&self) -> Result<ApiResponse<LatestBlockhash>> {
        self.read(CacheCategory::Blockhash, &[], |endpoint| {
            let transport = self.transport.clone();
            async move { transport.get_latest_blockhash(&endpoint).await }
        })
        .await
    }

    pub async fn get_token_account_balance(
        &self,
        token_account: &Pubkey,
    ) -> Result<ApiResponse<UiTokenAmount>> {
        let key = token_account.to_string();
        let token_account = *token_account;
        self.read(CacheCategory::TokenAccountBalance, &[key.as_str()], |endpoint| {
            let transport = self.transport.clone();
            async move {
                transport
                    .get_token_account_balance(&endpoint, &token_account)
                    .await
            }
        })
        .await
    }

    /// Token accounts of `owner`; without a filter, all SPL Token program accounts
    pub async fn get_token_accounts_by_owner(
        &self,
        owner: &Pubkey,
        filter: Option<TokenAccountsFilter>,
    ) -> Result<ApiResponse<Vec<RpcKeyedAccount>>> {
        let owner = *owner;
        let filter = OwnerFilter::from_filter(filter);
        let owner_key = owner.to_string();
        let filter_key = filter.cache_param();
        self.read(
            CacheCategory::TokenAccounts,
            &[owner_key.as_str(), filter_key.as_str()],
            |endpoint| {
                let transport = self.transport.clone();
                async move {
                    transport
                        .get_token_accounts_by_owner(&endpoint, &owner, filter.to_filter())
                        .await
                }
            },
        )
        .await
    }

    pub async fn get_program_accounts(
        &self,
        program_id: &Pubkey,
        filters: Option<Vec<RpcFilterType>>,
    ) -> Result<ApiResponse<Vec<(Pubkey, Account)>>> {
        let program_id = *program_id;
        let program_key = program_id.to_string();
        let filters_key = match &filters {
            Some(filters) => serde_json::to_string(filters)?,
            None => String::new(),
        };
        self.read(
            CacheCategory::ProgramAccounts,
            &[program_key.as_str(), filters_key.as_str()],
            |endpoint| {
                let transport = self.transport.clone();
                let filters = filters.clone();
                async move {
                    transport
                        .get_program_accounts(&endpoint, &program_id, filters)
                        .await
                }
            },
        )
        .await
    }

    async fn send_once(
        &self,
        transaction: &VersionedTransaction,
        attempt: u32,
    ) -> Result<ApiResponse<SentTransaction>> {
        self.ensure_running()?;
        self.health.ensure_available().await?;
        self.admit().await?;
        let endpoint = self.router.primary().await?;
        let skip_preflight = self.config.skip_preflight;

        let response = self
            .dispatch("sendTransaction", endpoint, attempt, &|endpoint: Arc<Endpoint>| {
                let transport = self.transport.clone();
                async move {
                    transport
                        .send_transaction(&endpoint, transaction, skip_preflight)
                        .await
                }
            })
            .await?;

        let endpoint = response.endpoint.clone();
        Ok(response.map(|signature| SentTransaction {
            signature,
            endpoint,
        }))
    }

    /// Submits on the affinity endpoint. The receipt names the endpoint that
    /// accepted it; pass it to `confirm_transaction`.
    pub async fn send_transaction(
        &self,
        transaction: &VersionedTransaction,
    ) -> Result<ApiResponse<SentTransaction>> {
        let response = self
            .retry
            .execute("sendTransaction", |attempt| self.send_once(transaction, attempt))
            .await?;
        info!(
            "📤 Transaction {} accepted by {}",
            response.data.signature, response.data.endpoint
        );
        Ok(response)
    }

    async fn confirm_once(
        &self,
        endpoint: Arc<Endpoint>,
        signature: Signature,
        attempt: u32,
    ) -> Result<ApiResponse<bool>> {
        self.admit().await?;
        self.dispatch("confirmTransaction", endpoint, attempt, &|endpoint: Arc<Endpoint>| {
            let transport = self.transport.clone();
            async move { transport.confirm_transaction(&endpoint, &signature).await }
        })
        .await
    }

    /// Confirms on the endpoint that accepted the send, healthy or not
    pub async fn confirm_transaction(&self, receipt: &SentTransaction) -> Result<ApiResponse<bool>> {
        self.ensure_running()?;
        let endpoint = self.router.confirming_endpoint(receipt)?;
        self.retry
            .execute("confirmTransaction", |attempt| {
                self.confirm_once(endpoint.clone(), receipt.signature, attempt)
            })
            .await
    }

    /// Confirms a signature submitted elsewhere, on the current affinity endpoint
    pub async fn confirm_signature(&self, signature: &Signature) -> Result<ApiResponse<bool>> {
        self.ensure_running()?;
        let signature = *signature;
        self.retry
            .execute("confirmTransaction", |attempt| async move {
                let endpoint = self.router.primary().await?;
                self.confirm_once(endpoint, signature, attempt).await
            })
            .await
    }

    pub async fn get_connection_stats(&self) -> Vec<EndpointStats> {
        self.health.summary().await.endpoints
    }

    pub async fn get_stats(&self) -> GatewayStats {
        let health = self.health.summary().await;
        GatewayStats {
            status: health.status,
            endpoints: health.endpoints,
            limiter: self.limiter.stats().await,
            cache: self.cache.metrics(),
            selection: self.selector.strategy_name(),
            selection_rounds: self.selector.rounds(),
            transaction_endpoint: self.router.designated().name().to_string(),
        }
    }

    pub async fn health_json(&self) -> Result<String> {
        self.health.health_json().await
    }

    /// Stops the drain loop, releases queued callers and clears the cache.
    /// Every later call fails with `ShutDown`.
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("🛑 Shutting down RPC gateway");

        if let Some(task) = self.drain_task.lock().await.take() {
            task.stop().await;
        }
        self.limiter.close().await;
        self.cache.clear();

        info!("✅ RPC gateway shut down");
    }
}

/// Gateway-wide observability snapshot
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayStats {
    pub status: HealthStatus,
    pub endpoints: Vec<EndpointStats>,
    pub limiter: LimiterStats,
    pub cache: CacheMetrics,
    pub selection: &'static str,
    pub selection_rounds: u64,
    pub transaction_endpoint: String,
}

impl std::fmt::Display for GatewayStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "📊 RPC Gateway Statistics ({}):", self.status)?;
        writeln!(
            f,
            "  Selection: {} ({} rounds), transactions on {}",
            self.selection, self.selection_rounds, self.transaction_endpoint
        )?;
        writeln!(f, "  Rate limit: {}", self.limiter)?;
        writeln!(f, "  Cache: {}", self.cache)?;
        writeln!(f, "  Endpoints:")?;
        for endpoint in &self.endpoints {
            writeln!(f, "    {}", endpoint)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owner_filter_defaults_to_spl_token() {
        let filter = OwnerFilter::from_filter(None);
        assert_eq!(filter, OwnerFilter::Program(spl_token::id()));
        assert_eq!(
            filter.cache_param(),
            "program=TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA"
        );

        let mint = Pubkey::new_unique();
        let filter = OwnerFilter::from_filter(Some(TokenAccountsFilter::Mint(mint)));
        assert!(matches!(filter.to_filter(), TokenAccountsFilter::Mint(m) if m == mint));
    }

    #[test]
    fn test_response_map_keeps_metadata() {
        let response = ApiResponse::new(7u64, "helius".to_string(), 12, 2).map(|v| v * 2);
        assert_eq!(response.data, 14);
        assert_eq!(response.endpoint, "helius");
        assert_eq!(response.attempt, 2);
        assert!(!response.from_cache);

        let cached = ApiResponse::cached("x");
        assert!(cached.from_cache);
        assert_eq!(cached.attempt, 0);
    }
}
