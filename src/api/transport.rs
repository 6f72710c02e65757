// src/api/transport.rs
//! Network seam between the gateway and the node providers.
//!
//! `RpcTransport` issues exactly one call against one endpoint. It knows
//! nothing about rate limits, health or caching; the gateway layers those on.

use crate::api::registry::{Endpoint, EndpointRegistry};
use crate::error::{Result, TransportError, TransportErrorKind};
use crate::utils::{redact_url, with_api_key};
use async_trait::async_trait;
use dashmap::DashMap;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use solana_account_decoder::parse_token::UiTokenAmount;
use solana_account_decoder::UiAccountEncoding;
use solana_client::nonblocking::rpc_client::RpcClient as NonBlockingRpcClient;
use solana_client::rpc_config::{
    RpcAccountInfoConfig, RpcProgramAccountsConfig, RpcSendTransactionConfig,
};
use solana_client::rpc_filter::RpcFilterType;
use solana_client::rpc_request::TokenAccountsFilter;
use solana_client::rpc_response::RpcKeyedAccount;
use solana_sdk::account::Account;
use solana_sdk::commitment_config::CommitmentConfig;
use solana_sdk::hash::Hash;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use solana_sdk::transaction::VersionedTransaction;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LatestBlockhash {
    pub blockhash: Hash,
    pub last_valid_block_height: u64,
}

/// One RPC call against one endpoint
#[async_trait]
pub trait RpcTransport: Send + Sync {
    async fn get_account_info(
        &self,
        endpoint: &Endpoint,
        pubkey: &Pubkey,
    ) -> std::result::Result<Option<Account>, TransportError>;

    async fn get_balance(
        &self,
        endpoint: &Endpoint,
        pubkey: &Pubkey,
    ) -> std::result::Result<u64, TransportError>;

    async fn get_latest_blockhash(
        &self,
        endpoint: &Endpoint,
    ) -> std::result::Result<LatestBlockhash, TransportError>;

    async fn get_token_account_balance(
        &self,
        endpoint: &Endpoint,
        token_account: &Pubkey,
    ) -> std::result::Result<UiTokenAmount, TransportError>;

    async fn get_token_accounts_by_owner(
        &self,
        endpoint: &Endpoint,
        owner: &Pubkey,
        filter: TokenAccountsFilter,
    ) -> std::result::Result<Vec<RpcKeyedAccount>, TransportError>;

    async fn get_program_accounts(
        &self,
        endpoint: &Endpoint,
        program_id: &Pubkey,
        filters: Option<Vec<RpcFilterType>>,
    ) -> std::result::Result<Vec<(Pubkey, Account)>, TransportError>;

    async fn send_transaction(
        &self,
        endpoint: &Endpoint,
        transaction: &VersionedTransaction,
        skip_preflight: bool,
    ) -> std::result::Result<Signature, TransportError>;

    async fn confirm_transaction(
        &self,
        endpoint: &Endpoint,
        signature: &Signature,
    ) -> std::result::Result<bool, TransportError>;
}

/// JSON-RPC over HTTP using one non-blocking solana client per endpoint
pub struct SolanaRpcTransport {
    clients: DashMap<String, Arc<NonBlockingRpcClient>>,
    commitment: CommitmentConfig,
}

impl SolanaRpcTransport {
    pub fn new(
        registry: &EndpointRegistry,
        commitment: CommitmentConfig,
        request_timeout: Duration,
    ) -> Result<Self> {
        let clients = DashMap::with_capacity(registry.len());
        for endpoint in registry.list() {
            let url = with_api_key(endpoint.base_url(), endpoint.api_key()).map_err(|e| {
                crate::error::GatewayError::ConfigError(format!(
                    "endpoint {} has an invalid baseURL: {}",
                    endpoint.name(),
                    e
                ))
            })?;
            let client =
                NonBlockingRpcClient::new_with_timeout_and_commitment(url, request_timeout, commitment);
            info!(
                "🔗 RPC client for {} at {} (timeout {:?})",
                endpoint.name(),
                redact_url(endpoint.base_url()),
                request_timeout
            );
            clients.insert(endpoint.name().to_string(), Arc::new(client));
        }

        Ok(Self {
            clients,
            commitment,
        })
    }

    fn client(&self, endpoint: &Endpoint) -> std::result::Result<Arc<NonBlockingRpcClient>, TransportError> {
        self.clients
            .get(endpoint.name())
            .map(|client| client.value().clone())
            .ok_or_else(|| {
                TransportError::new(
                    TransportErrorKind::Other,
                    format!("no RPC client for endpoint {}", endpoint.name()),
                )
            })
    }

    pub fn commitment(&self) -> CommitmentConfig {
        self.commitment
    }
}

#[async_trait]
impl RpcTransport for SolanaRpcTransport {
    async fn get_account_info(
        &self,
        endpoint: &Endpoint,
        pubkey: &Pubkey,
    ) -> std::result::Result<Option<Account>, TransportError> {
        let response = self
            .client(endpoint)?
            .get_account_with_commitment(pubkey, self.commitment)
            .await?;
        Ok(response.value)
    }

    async fn get_balance(
        &self,
        endpoint: &Endpoint,
        pubkey: &Pubkey,
    ) -> std::result::Result<u64, TransportError> {
        let response = self
            .client(endpoint)?
            .get_balance_with_commitment(pubkey, self.commitment)
            .await?;
        Ok(response.value)
    }

    async fn get_latest_blockhash(
        &self,
        endpoint: &Endpoint,
    ) -> std::result::Result<LatestBlockhash, TransportError> {
        let (blockhash, last_valid_block_height) = self
            .client(endpoint)?
            .get_latest_blockhash_with_commitment(self.commitment)
            .await?;
        Ok(LatestBlockhash {
            blockhash,
            last_valid_block_height,
        })
    }

    async fn get_token_account_balance(
        &self,
        endpoint: &Endpoint,
        token_account: &Pubkey,
    ) -> std::result::Result<UiTokenAmount, TransportError> {
        let response = self
            .client(endpoint)?
            .get_token_account_balance_with_commitment(token_account, self.commitment)
            .await?;
        Ok(response.value)
    }

    async fn get_token_accounts_by_owner(
        &self,
        endpoint: &Endpoint,
        owner: &Pubkey,
        filter: TokenAccountsFilter,
    ) -> std::result::Result<Vec<RpcKeyedAccount>, TransportError> {
        let response = self
            .client(endpoint)?
            .get_token_accounts_by_owner_with_commitment(owner, filter, self.commitment)
            .await?;
        Ok(response.value)
    }

    async fn get_program_accounts(
        &self,
        endpoint: &Endpoint,
        program_id: &Pubkey,
        filters: Option<Vec<RpcFilterType>>,
    ) -> std::result::Result<Vec<(Pubkey, Account)>, TransportError> {
        let config = RpcProgramAccountsConfig {
            filters,
            account_config: RpcAccountInfoConfig {
                encoding: Some(UiAccountEncoding::Base64),
                data_slice: None,
                commitment: Some(self.commitment),
                min_context_slot: None,
            },
            with_context: Some(false),
        };
        let accounts = self
            .client(endpoint)?
            .get_program_accounts_with_config(program_id, config)
            .await?;
        debug!(
            "getProgramAccounts({}) on {} returned {} accounts",
            program_id,
            endpoint.name(),
            accounts.len()
        );
        Ok(accounts)
    }

    async fn send_transaction(
        &self,
        endpoint: &Endpoint,
        transaction: &VersionedTransaction,
        skip_preflight: bool,
    ) -> std::result::Result<Signature, TransportError> {
        let config = RpcSendTransactionConfig {
            skip_preflight,
            preflight_commitment: Some(self.commitment.commitment),
            ..RpcSendTransactionConfig::default()
        };
        Ok(self
            .client(endpoint)?
            .send_transaction_with_config(transaction, config)
            .await?)
    }

    async fn confirm_transaction(
        &self,
        endpoint: &Endpoint,
        signature: &Signature,
    ) -> std::result::Result<bool, TransportError> {
        let response = self
            .client(endpoint)?
            .confirm_transaction_with_commitment(signature, self.commitment)
            .await?;
        Ok(response.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EndpointConfig;

    #[tokio::test]
    async fn test_builds_one_client_per_endpoint() {
        let mut keyed = EndpointConfig::new("helius", "https://mainnet.helius-rpc.com/", 1, 3);
        keyed.api_key = Some("secret".to_string());
        let registry = EndpointRegistry::new(&[
            keyed,
            EndpointConfig::new("public", "https://api.mainnet-beta.solana.com", 2, 1),
        ])
        .unwrap();

        let transport = SolanaRpcTransport::new(
            &registry,
            CommitmentConfig::confirmed(),
            Duration::from_secs(5),
        )
        .unwrap();

        let helius = registry.get("helius").unwrap();
        assert_eq!(
            transport.client(&helius).unwrap().url(),
            "https://mainnet.helius-rpc.com/?api-key=secret"
        );
        assert_eq!(transport.commitment(), CommitmentConfig::confirmed());
    }

    #[test]
    fn test_rejects_invalid_url() {
        let registry =
            EndpointRegistry::new(&[EndpointConfig::new("bad", "not a url", 1, 1)]).unwrap();
        assert!(
            SolanaRpcTransport::new(&registry, CommitmentConfig::confirmed(), Duration::from_secs(1))
                .is_err()
        );
    }
}
