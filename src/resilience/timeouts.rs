//! Timeout enforcement.
//!
//! # Responsibilities
//! - Wrap collaborator calls (paymaster, bundler, chain RPC) with a deadline
//! - Report timeouts as a distinct outcome, never as a transport failure
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities
//! - A timed-out submit has unknown disposition; callers decide recovery

use std::future::IntoFuture;
use std::time::Duration;

use tokio::time::timeout;

/// The wrapped future did not finish before its deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("deadline of {0:?} elapsed")]
pub struct DeadlineElapsed(pub Duration);

/// Await `fut` for at most `limit`.
pub async fn with_deadline<F>(limit: Duration, fut: F) -> Result<F::Output, DeadlineElapsed>
where
    F: IntoFuture,
{
    timeout(limit, fut).await.map_err(|_| DeadlineElapsed(limit))
}
