//! Operation subsystem.
//!
//! # Data Flow
//! ```text
//! AccountState + TransactionIntent + GasPolicy
//!     → builder.rs (execute call data, init-code, gas resolution)
//!     → UnsignedOperation (types.rs)
//!     → hash.rs (EntryPoint v0.7 hash = passkey challenge)
//!     → SignedOperation → rpc.rs (JSON wire format for bundler/paymaster)
//! ```

pub mod builder;
pub mod hash;
pub mod rpc;
pub mod types;

pub use builder::{BuildError, OperationBuilder};
pub use rpc::UserOperationRpc;
pub use types::{
    GasPolicy, IntentError, IntentRequest, SignedOperation, SponsorshipPayload,
    TransactionIntent, UnsignedOperation,
};
