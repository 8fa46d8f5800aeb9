//! Relay subsystem.
//!
//! # Data Flow
//! ```text
//! SignedOperation
//!     → submitter.rs (dedup by hash + signature)
//!     → bundler.rs (eth_sendUserOperation) → OperationHandle
//!
//! OperationHandle
//!     → submitter.rs (cached terminal receipt?)
//!     → bundler.rs (eth_getUserOperationReceipt, eth_getUserOperationByHash)
//!     → OperationReceipt (forward-only state)
//! ```
//!
//! # Design Decisions
//! - One submitter per chain; it owns the receipt state for its handles
//! - Rejections are classified here so callers can decide whether to rebuild

pub mod bundler;
pub mod submitter;
pub mod types;

pub use bundler::{BundlerRpc, GasEstimate, RelayService, TransactionReceiptRpc, UserOperationReceiptRpc};
pub use submitter::RelaySubmitter;
pub use types::{
    FailureReason, OperationHandle, OperationReceipt, OperationState, PollError, RejectionKind,
    RelayRejection, SubmitError,
};
