//! Chain RPC client with timeout and failover.
//!
//! # Responsibilities
//! - Connect to the chain's JSON-RPC endpoints
//! - Read the EntryPoint nonce and the deployment status of an account
//! - Handle timeouts and network errors by moving to the next provider

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{aliases::U192, Address, Bytes, U256};
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::TransactionRequest;
use alloy::sol;
use alloy::sol_types::SolCall;
use async_trait::async_trait;
use tokio::time::timeout;

use crate::chain::types::{AccountStateSource, ChainError, ChainId, ChainResult, OnChainState};
use crate::config::ChainConfig;

sol! {
    interface IEntryPoint {
        function getNonce(address sender, uint192 key) external view returns (uint256 nonce);
    }
}

/// Chain RPC client wrapper with failover support.
#[derive(Clone)]
pub struct ChainClient {
    /// Primary provider first, then failovers.
    providers: Vec<Arc<dyn Provider + Send + Sync>>,
    chain_id: u64,
    entry_point: Address,
    rpc_url: String,
    timeout_duration: Duration,
}

impl ChainClient {
    /// Build providers for a chain. Does no I/O.
    pub fn connect(config: &ChainConfig) -> ChainResult<Self> {
        let mut providers = Vec::new();

        let primary_url: url::Url = config.rpc_url.parse().map_err(|e: url::ParseError| {
            ChainError::InvalidUrl {
                url: config.rpc_url.clone(),
                reason: e.to_string(),
            }
        })?;
        providers.push(
            Arc::new(ProviderBuilder::new().connect_http(primary_url)) as Arc<dyn Provider + Send + Sync>
        );

        for url_str in &config.failover_urls {
            match url_str.parse::<url::Url>() {
                Ok(url) => providers.push(
                    Arc::new(ProviderBuilder::new().connect_http(url)) as Arc<dyn Provider + Send + Sync>
                ),
                Err(_) => tracing::warn!(url = %url_str, "Ignoring invalid failover RPC URL"),
            }
        }

        Ok(Self {
            providers,
            chain_id: config.chain_id,
            entry_point: config.entry_point,
            rpc_url: config.rpc_url.clone(),
            timeout_duration: Duration::from_secs(config.rpc_timeout_secs),
        })
    }

    /// Verify the connected chain ID matches configuration.
    pub async fn verify_chain_id(&self) -> ChainResult<()> {
        let chain_id = self.get_chain_id().await?;
        if chain_id.0 != self.chain_id {
            return Err(ChainError::ChainMismatch {
                expected: self.chain_id,
                actual: chain_id.0,
            });
        }
        Ok(())
    }

    /// Get the chain ID from the RPC.
    pub async fn get_chain_id(&self) -> ChainResult<ChainId> {
        for (i, provider) in self.providers.iter().enumerate() {
            match timeout(self.timeout_duration, provider.get_chain_id()).await {
                Ok(Ok(result)) => return Ok(ChainId(result)),
                Ok(Err(e)) => {
                    tracing::warn!(provider_idx = i, error = %e, "RPC error, trying next provider");
                }
                Err(_) => {
                    tracing::warn!(provider_idx = i, "RPC timeout, trying next provider");
                }
            }
        }
        Err(ChainError::Rpc("All RPC providers failed".to_string()))
    }

    /// Read `EntryPoint.getNonce(sender, 0)`.
    pub async fn get_nonce(&self, sender: Address) -> ChainResult<U256> {
        let call = IEntryPoint::getNonceCall {
            sender,
            key: U192::ZERO,
        };
        let tx = TransactionRequest::default()
            .to(self.entry_point)
            .input(Bytes::from(call.abi_encode()).into());

        let mut timed_out = false;
        for (i, provider) in self.providers.iter().enumerate() {
            match timeout(self.timeout_duration, provider.call(tx.clone())).await {
                Ok(Ok(data)) => {
                    return IEntryPoint::getNonceCall::abi_decode_returns(&data)
                        .map_err(|e| ChainError::Contract(format!("getNonce: {}", e)));
                }
                Ok(Err(e)) => tracing::warn!(provider_idx = i, error = %e, "RPC error"),
                Err(_) => {
                    timed_out = true;
                    tracing::warn!(provider_idx = i, "RPC timeout");
                }
            }
        }
        Err(self.exhausted(timed_out, "nonce"))
    }

    /// Whether contract code exists at `address`.
    pub async fn is_deployed(&self, address: Address) -> ChainResult<bool> {
        let mut timed_out = false;
        for (i, provider) in self.providers.iter().enumerate() {
            match timeout(self.timeout_duration, provider.get_code_at(address)).await {
                Ok(Ok(code)) => return Ok(!code.is_empty()),
                Ok(Err(e)) => tracing::warn!(provider_idx = i, error = %e, "RPC error"),
                Err(_) => {
                    timed_out = true;
                    tracing::warn!(provider_idx = i, "RPC timeout");
                }
            }
        }
        Err(self.exhausted(timed_out, "code"))
    }

    fn exhausted(&self, timed_out: bool, what: &str) -> ChainError {
        if timed_out && self.providers.len() == 1 {
            ChainError::Timeout(self.timeout_duration.as_secs())
        } else {
            ChainError::Rpc(format!("All providers failed to get {}", what))
        }
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }
}

#[async_trait]
impl AccountStateSource for ChainClient {
    async fn account_state(&self, address: Address) -> ChainResult<OnChainState> {
        let (nonce, deployed) = tokio::try_join!(self.get_nonce(address), self.is_deployed(address))?;
        tracing::debug!(chain_id = self.chain_id, %address, %nonce, deployed, "Read account state");
        Ok(OnChainState { nonce, deployed })
    }
}

impl std::fmt::Debug for ChainClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainClient")
            .field("rpc_url", &self.rpc_url)
            .field("chain_id", &self.chain_id)
            .field("providers", &self.providers.len())
            .field("timeout", &self.timeout_duration)
            .finish()
    }
}
