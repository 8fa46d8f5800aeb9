//! Relay handles, receipts and rejection kinds.

use std::time::Duration;

use alloy::primitives::{B256, U256};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Identifies a relay-accepted operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationHandle {
    pub hash: B256,
    pub chain_id: u64,
}

/// Lifecycle of a submitted operation. Ordered; never moves backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationState {
    Submitted,
    Pending,
    Included,
    Failed,
}

impl OperationState {
    pub fn is_terminal(self) -> bool {
        matches!(self, OperationState::Included | OperationState::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OperationState::Submitted => "submitted",
            OperationState::Pending => "pending",
            OperationState::Included => "included",
            OperationState::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum FailureReason {
    /// Included on-chain, but execution reverted.
    OnChainRevert { reason: Option<String> },
    /// The relay lost track of the operation before inclusion.
    RelayDropped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationReceipt {
    pub handle: OperationHandle,
    pub state: OperationState,
    pub transaction_hash: Option<B256>,
    pub block_number: Option<u64>,
    pub gas_used: Option<U256>,
    pub failure: Option<FailureReason>,
}

impl OperationReceipt {
    pub fn submitted(handle: OperationHandle) -> Self {
        Self {
            handle,
            state: OperationState::Submitted,
            transaction_hash: None,
            block_number: None,
            gas_used: None,
            failure: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

/// Classified relay rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RejectionKind {
    NonceConflict,
    InsufficientSponsorship,
    InvalidSignature,
    MalformedOperation,
    Other,
}

impl RejectionKind {
    /// Map a bundler JSON-RPC error. ERC-7769 codes win; otherwise the first
    /// EntryPoint `AAxx` reason token decides.
    pub fn classify(code: i64, message: &str) -> Self {
        match code {
            -32501 | -32504 => return RejectionKind::InsufficientSponsorship,
            -32507 => return RejectionKind::InvalidSignature,
            _ => {}
        }
        match entry_point_reason(message) {
            Some(25) => RejectionKind::NonceConflict,
            Some(24) => RejectionKind::InvalidSignature,
            Some(30..=39) => RejectionKind::InsufficientSponsorship,
            Some(_) => RejectionKind::Other,
            None if mentions(message, "nonce") => RejectionKind::NonceConflict,
            None if code == -32602 => RejectionKind::MalformedOperation,
            None => RejectionKind::Other,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RejectionKind::NonceConflict => "nonce_conflict",
            RejectionKind::InsufficientSponsorship => "insufficient_sponsorship",
            RejectionKind::InvalidSignature => "invalid_signature",
            RejectionKind::MalformedOperation => "malformed_operation",
            RejectionKind::Other => "other",
        }
    }
}

/// The number of the first standalone `AAxx` token in `message`.
fn entry_point_reason(message: &str) -> Option<u8> {
    message
        .split(|c: char| !c.is_ascii_alphanumeric())
        .find_map(|token| {
            let digits = token.strip_prefix("AA")?;
            if digits.len() == 2 && digits.bytes().all(|b| b.is_ascii_digit()) {
                digits.parse().ok()
            } else {
                None
            }
        })
}

fn mentions(message: &str, word: &str) -> bool {
    message
        .split(|c: char| !c.is_ascii_alphanumeric())
        .any(|token| token.eq_ignore_ascii_case(word))
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("relay rejected operation ({kind:?}, code {code}): {message}")]
pub struct RelayRejection {
    pub kind: RejectionKind,
    pub code: i64,
    pub message: String,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SubmitError {
    /// The relay refused the operation; no handle exists.
    #[error(transparent)]
    Rejected(#[from] RelayRejection),

    #[error("relay unavailable: {0}")]
    Unavailable(String),

    /// Disposition unknown: the relay may hold the operation. Resubmitting the
    /// same signed operation is safe; building a new one is not.
    #[error("relay did not answer within {0:?}")]
    TimedOut(Duration),
}

impl SubmitError {
    pub fn rejection_kind(&self) -> Option<RejectionKind> {
        match self {
            SubmitError::Rejected(r) => Some(r.kind),
            _ => None,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PollError {
    #[error("relay unavailable: {0}")]
    Unavailable(String),

    #[error("relay did not answer within {0:?}")]
    TimedOut(Duration),

    #[error("invalid relay response: {0}")]
    InvalidResponse(String),

    #[error("no relay configured for chain {0}")]
    UnknownChain(u64),
}
