//! HTTP API subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → server.rs (Axum router, request ID, tracing, timeout, body limit)
//!     → account.rs (registration, credential binding, lookup, message signing)
//!     → operations.rs (prepare → ceremony.rs parks it; receipts; gas estimates)
//!     → ceremony.rs (assertion completes the send, DELETE cancels it)
//!     → chains.rs (supported chains, paymaster config and counters)
//!     → error.rs (PipelineError → status + classified JSON body)
//! ```
//!
//! # Design Decisions
//! - Binary WebAuthn fields travel as base64url strings
//! - Handlers hold no state of their own; everything lives in the pipeline

pub mod account;
pub mod ceremony;
pub mod chains;
pub mod error;
pub mod operations;
pub mod server;
pub mod tls;

pub use ceremony::CeremonyBroker;
pub use error::{ApiError, ApiResult};
pub use server::{ApiServer, AppState, X_REQUEST_ID};
pub use tls::load_tls_config;
