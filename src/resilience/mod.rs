//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Call to a collaborator:
//!     → timeouts.rs (enforce per-service deadline)
//!     → On retryable failure: caller consults backoff.rs before rebuilding
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every external call has a deadline
//! - Only idempotent calls (poll, estimate) are retried blindly
//! - A timed-out submit is resent unchanged; a rejected one needs a rebuild

pub mod backoff;
pub mod timeouts;
