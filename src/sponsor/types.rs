//! Sponsorship request and denial types.

use alloy::primitives::{Address, Bytes, U256};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why sponsorship was not granted.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SponsorshipDenied {
    #[error("sponsorship limit exceeded: {0}")]
    LimitExceeded(String),

    #[error("sponsorship not available on chain {0}")]
    UnsupportedChain(u64),

    #[error("sponsorship service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("sponsorship rejected: {0}")]
    Rejected(String),

    #[error("invalid sponsorship response: {0}")]
    InvalidResponse(String),
}

impl SponsorshipDenied {
    pub fn is_retryable(&self) -> bool {
        matches!(self, SponsorshipDenied::ServiceUnavailable(_))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SponsorshipDenied::LimitExceeded(_) => "limit_exceeded",
            SponsorshipDenied::UnsupportedChain(_) => "unsupported_chain",
            SponsorshipDenied::ServiceUnavailable(_) => "service_unavailable",
            SponsorshipDenied::Rejected(_) => "rejected",
            SponsorshipDenied::InvalidResponse(_) => "invalid_response",
        }
    }
}

/// Whether and how to request sponsorship for one operation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SponsorshipPolicy {
    pub enabled: bool,
    /// Opaque paymaster context (e.g. a sponsorship policy id).
    pub context: Option<serde_json::Value>,
}

impl SponsorshipPolicy {
    pub fn enabled() -> Self {
        Self {
            enabled: true,
            context: None,
        }
    }

    pub fn disabled() -> Self {
        Self::default()
    }
}

/// `pm_sponsorUserOperation` result as returned by the paymaster.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SponsorshipQuote {
    pub paymaster: Option<Address>,
    pub paymaster_data: Option<Bytes>,
    pub paymaster_verification_gas_limit: Option<U256>,
    pub paymaster_post_op_gas_limit: Option<U256>,
    pub pre_verification_gas: Option<U256>,
    pub verification_gas_limit: Option<U256>,
    pub call_gas_limit: Option<U256>,
}
