//! Transaction pipeline.
//!
//! # Data Flow
//! ```text
//! SendRequest
//!     → registry.rs (chain context) + directory (account, signing credential)
//!     → locks.rs (account lock acquired)
//!     → AccountStateSource (nonce, deployed) → OperationBuilder → SponsorshipClient
//!     → PreparedOperation { hash = challenge }
//!     → Authenticator::get_assertion (bounded, cancellable)
//!     → verify client data → SignatureCodec → RelaySubmitter::submit
//!     → account lock released → OperationHandle
//!
//! Message signing:
//!     eip191_hash_message(message) as challenge → Authenticator::get_assertion
//!     → verify client data → SignatureCodec → MessageSignature (no lock, no relay)
//! ```
//!
//! # Design Decisions
//! - Different accounts run in parallel; one account is strictly serialized
//! - Every failure carries an `ErrorClass`; encoding and relay errors are never generalized

pub mod error;
pub mod executor;
pub mod locks;
pub mod registry;

pub use error::{ErrorClass, PipelineError, PipelineResult};
pub use executor::{
    ChainSponsorshipStats, MessageSignature, PasskeyCheck, PreparedOperation, SendOutcome,
    SendRequest, TransactionPipeline,
};
pub use locks::{AccountGuard, AccountLocks};
pub use registry::{follow_config, reload, ChainContext, ChainRegistry};
