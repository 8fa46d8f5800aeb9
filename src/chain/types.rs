//! Chain-specific types and error definitions.

use alloy::primitives::{Address, U256};
use async_trait::async_trait;
use thiserror::Error;

/// Chain ID type for strong typing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChainId(pub u64);

impl From<u64> for ChainId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl From<ChainId> for u64 {
    fn from(id: ChainId) -> Self {
        id.0
    }
}

/// Errors that can occur while reading chain state.
#[derive(Debug, Error)]
pub enum ChainError {
    /// RPC connection or request failed.
    #[error("RPC error: {0}")]
    Rpc(String),

    /// RPC request timed out.
    #[error("RPC timeout after {0} seconds")]
    Timeout(u64),

    /// Configured RPC URL could not be parsed.
    #[error("Invalid RPC URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    /// Contract call returned data that does not decode.
    #[error("Contract call failed: {0}")]
    Contract(String),

    /// Chain configuration mismatch.
    #[error("Chain ID mismatch: expected {expected}, got {actual}")]
    ChainMismatch { expected: u64, actual: u64 },
}

/// Result type for chain operations.
pub type ChainResult<T> = Result<T, ChainError>;

/// Authoritative on-chain view of a smart account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OnChainState {
    /// Next EntryPoint nonce for the default key.
    pub nonce: U256,
    /// Whether account code exists at the address.
    pub deployed: bool,
}

/// Source of `(nonce, deployed)` for an account address.
#[async_trait]
pub trait AccountStateSource: Send + Sync {
    async fn account_state(&self, address: Address) -> ChainResult<OnChainState>;
}
