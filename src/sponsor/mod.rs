//! Sponsorship subsystem.
//!
//! # Data Flow
//! ```text
//! UnsignedOperation (unsponsored)
//!     → client.rs (policy check; UnsupportedChain without a paymaster endpoint)
//!     → paymaster.rs (pm_sponsorUserOperation with a placeholder signature)
//!     → client.rs (validate, merge) → new UnsignedOperation
//! ```
//!
//! # Design Decisions
//! - Runs strictly before signing; the merged operation is what gets hashed
//! - Denials are surfaced to the caller, never swallowed
//! - Counters live with the chain, not the client, so reloads keep them

pub mod client;
pub mod paymaster;
pub mod stats;
pub mod types;

pub use client::{apply_quote, SponsorshipClient};
pub use paymaster::{PaymasterRpc, SponsorshipService};
pub use stats::{SponsorshipStats, StatsSnapshot};
pub use types::{SponsorshipDenied, SponsorshipPolicy, SponsorshipQuote};
