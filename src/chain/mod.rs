//! Chain state subsystem.
//!
//! # Data Flow
//! ```text
//! ChainConfig (RPC URL + failovers, EntryPoint)
//!     → client.rs (alloy providers with per-call timeout and failover)
//!     → EntryPoint.getNonce(sender, 0) + eth_getCode(sender)
//!     → OnChainState consumed by the pipeline before every build
//! ```
//!
//! # Design Decisions
//! - The chain is the only authority for nonce and deployment status
//! - All RPC calls have configurable timeouts
//! - Providers are tried in order; the first answer wins

pub mod client;
pub mod types;

pub use client::ChainClient;
pub use types::{AccountStateSource, ChainError, ChainId, ChainResult, OnChainState};
