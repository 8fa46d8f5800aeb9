//! Submission and receipt tracking.
//!
//! # Responsibilities
//! - Submit signed operations; classify relay rejections
//! - Return the original handle for a repeated submission of the same blob
//! - Track each handle through `submitted → pending → included | failed`
//!
//! # Design Decisions
//! - States only move forward; terminal receipts are cached and returned verbatim
//! - Poll transport errors leave the tracked state untouched
//! - An accepted operation the relay stops knowing about for
//!   `drop_after_misses` consecutive polls is reported as dropped
//! - A send without an answer is in doubt: before it is resent, and when its
//!   resend is refused, the relay is asked for the operation hash first
//! - Hashes nobody submitted are never tracked; every entry expires after `retention`

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use alloy::primitives::{keccak256, Address, B256};
use dashmap::DashMap;

use crate::observability::metrics;
use crate::passkey::SignatureCodec;
use crate::relay::bundler::{GasEstimate, RelayService, UserOperationReceiptRpc};
use crate::relay::types::{
    FailureReason, OperationHandle, OperationReceipt, OperationState, PollError, RejectionKind,
    RelayRejection, SubmitError,
};
use crate::resilience::backoff::Backoff;
use crate::resilience::timeouts::with_deadline;
use crate::rpc::RpcError;
use crate::userop::{SignedOperation, UnsignedOperation, UserOperationRpc};

/// How long submissions and receipts are remembered by default.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(3600);

struct Tracked {
    receipt: OperationReceipt,
    /// The relay has, or may have, accepted this operation.
    acknowledged: bool,
    misses: u32,
    touched: Instant,
}

struct Submission {
    handle: OperationHandle,
    at: Instant,
}

enum Observation {
    Final(OperationReceipt),
    Known,
    Unknown,
}

/// Per-chain relay client with submission dedup and receipt state.
pub struct RelaySubmitter {
    relay: Arc<dyn RelayService>,
    chain_id: u64,
    entry_point: Address,
    timeout: Duration,
    drop_after_misses: u32,
    retention: Duration,
    /// keccak256(operation hash || signature) → handle.
    submissions: DashMap<B256, Submission>,
    /// Same key, for sends whose outcome is unknown.
    in_doubt: DashMap<B256, Instant>,
    tracked: DashMap<B256, Tracked>,
    next_prune: Mutex<Instant>,
}

impl RelaySubmitter {
    pub fn new(
        relay: Arc<dyn RelayService>,
        chain_id: u64,
        entry_point: Address,
        timeout: Duration,
        drop_after_misses: u32,
    ) -> Self {
        Self {
            relay,
            chain_id,
            entry_point,
            timeout,
            drop_after_misses: drop_after_misses.max(1),
            retention: DEFAULT_RETENTION,
            submissions: DashMap::new(),
            in_doubt: DashMap::new(),
            tracked: DashMap::new(),
            next_prune: Mutex::new(Instant::now()),
        }
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention.max(Duration::from_millis(1));
        self
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub fn entry_point(&self) -> Address {
        self.entry_point
    }

    /// Handles with receipt state held in memory.
    pub fn tracked_count(&self) -> usize {
        self.tracked.len()
    }

    /// Submit `signed` via `eth_sendUserOperation`.
    pub async fn submit(&self, signed: &SignedOperation) -> Result<OperationHandle, SubmitError> {
        self.maybe_prune();
        let op_hash = signed.operation.hash(self.entry_point, self.chain_id);
        let key = keccak256([op_hash.as_slice(), signed.signature.as_bytes()].concat());

        if let Some(submission) = self.submissions.get(&key) {
            tracing::debug!(hash = %submission.handle.hash, "Operation already submitted, reusing handle");
            return Ok(submission.handle);
        }

        let in_doubt = self.in_doubt.contains_key(&key);
        if in_doubt {
            if let Some(handle) = self.find_accepted(op_hash).await {
                tracing::info!(%op_hash, "Earlier unanswered submit was accepted");
                return Ok(self.accept(key, handle, signed));
            }
        }

        let request = UserOperationRpc::from(signed);
        let outcome = match with_deadline(
            self.timeout,
            self.relay.send_user_operation(&request, self.entry_point),
        )
        .await
        {
            Err(elapsed) => Err(SubmitError::TimedOut(elapsed.0)),
            Ok(result) => result.map_err(classify_submit_error),
        };

        let hash = match outcome {
            Ok(hash) => hash,
            Err(SubmitError::Rejected(rejection)) => {
                // A resend may be refused because the first send went through.
                if in_doubt {
                    if let Some(handle) = self.find_accepted(op_hash).await {
                        tracing::info!(
                            %op_hash,
                            kind = rejection.kind.as_str(),
                            "Resend refused, earlier submit was accepted"
                        );
                        return Ok(self.accept(key, handle, signed));
                    }
                }
                metrics::record_relay_rejection(rejection.kind.as_str());
                tracing::warn!(
                    chain_id = self.chain_id,
                    %op_hash,
                    kind = rejection.kind.as_str(),
                    message = %rejection.message,
                    "Relay rejected operation"
                );
                return Err(SubmitError::Rejected(rejection));
            }
            Err(error) => {
                tracing::warn!(chain_id = self.chain_id, %op_hash, error = %error, "Relay submit outcome unknown");
                self.in_doubt.insert(key, Instant::now());
                self.track(op_hash);
                return Err(error);
            }
        };

        if hash != op_hash {
            tracing::warn!(relay_hash = %hash, local_hash = %op_hash, "Relay returned a different operation hash");
        }
        let handle = OperationHandle {
            hash,
            chain_id: self.chain_id,
        };
        Ok(self.accept(key, handle, signed))
    }

    fn accept(&self, key: B256, handle: OperationHandle, signed: &SignedOperation) -> OperationHandle {
        self.in_doubt.remove(&key);
        self.submissions.insert(
            key,
            Submission {
                handle,
                at: Instant::now(),
            },
        );
        self.track(handle.hash);

        metrics::record_operation_submitted(self.chain_id);
        tracing::info!(chain_id = self.chain_id, hash = %handle.hash, sender = %signed.operation.sender, "Operation submitted");
        handle
    }

    fn track(&self, hash: B256) {
        let handle = OperationHandle {
            hash,
            chain_id: self.chain_id,
        };
        self.tracked.entry(hash).or_insert_with(|| Tracked {
            receipt: OperationReceipt::submitted(handle),
            acknowledged: true,
            misses: 0,
            touched: Instant::now(),
        });
    }

    /// Handle for `op_hash` if the relay knows it; lookup failures count as unknown.
    async fn find_accepted(&self, op_hash: B256) -> Option<OperationHandle> {
        let handle = OperationHandle {
            hash: op_hash,
            chain_id: self.chain_id,
        };
        match self.observe(handle).await {
            Ok(Observation::Unknown) => None,
            Ok(observation) => {
                self.record(handle, observation);
                Some(handle)
            }
            Err(e) => {
                tracing::debug!(%op_hash, error = %e, "Lookup of unanswered submit failed");
                None
            }
        }
    }

    /// Current receipt for `handle`.
    pub async fn poll(&self, handle: &OperationHandle) -> Result<OperationReceipt, PollError> {
        if handle.chain_id != self.chain_id {
            return Err(PollError::UnknownChain(handle.chain_id));
        }
        if let Some(tracked) = self.tracked.get(&handle.hash) {
            if tracked.receipt.is_terminal() {
                return Ok(tracked.receipt.clone());
            }
        }

        let observation = self.observe(*handle).await?;
        self.maybe_prune();
        Ok(self.record(*handle, observation))
    }

    async fn observe(&self, handle: OperationHandle) -> Result<Observation, PollError> {
        let receipt = self
            .bounded(self.relay.get_user_operation_receipt(handle.hash))
            .await?;
        if let Some(receipt) = receipt {
            return Ok(Observation::Final(receipt_from_rpc(handle, receipt)));
        }
        let known = self
            .bounded(self.relay.get_user_operation_by_hash(handle.hash))
            .await?;
        Ok(if known.is_some() {
            Observation::Known
        } else {
            Observation::Unknown
        })
    }

    /// Poll until the receipt is terminal or `max_polls` is reached.
    pub async fn await_receipt(
        &self,
        handle: &OperationHandle,
        backoff: Backoff,
        max_polls: u32,
    ) -> Result<OperationReceipt, PollError> {
        let mut last = None;
        for attempt in 1..=max_polls.max(1) {
            match self.poll(handle).await {
                Ok(receipt) if receipt.is_terminal() => return Ok(receipt),
                Ok(receipt) => last = Some(Ok(receipt)),
                Err(e) => {
                    tracing::debug!(hash = %handle.hash, attempt, error = %e, "Receipt poll failed");
                    last = Some(Err(e));
                }
            }
            if attempt < max_polls {
                tokio::time::sleep(backoff.delay(attempt)).await;
            }
        }
        last.unwrap_or_else(|| Ok(OperationReceipt::submitted(*handle)))
    }

    /// Gas estimate for `op`, simulated with a placeholder signature.
    pub async fn estimate_gas(&self, op: &UnsignedOperation) -> Result<GasEstimate, SubmitError> {
        let request = UserOperationRpc::new(op, SignatureCodec::dummy().to_bytes());
        match with_deadline(
            self.timeout,
            self.relay.estimate_user_operation_gas(&request, self.entry_point),
        )
        .await
        {
            Err(elapsed) => Err(SubmitError::TimedOut(elapsed.0)),
            Ok(result) => result.map_err(classify_submit_error),
        }
    }

    async fn bounded<T>(
        &self,
        call: impl std::future::Future<Output = Result<T, RpcError>>,
    ) -> Result<T, PollError> {
        match with_deadline(self.timeout, call).await {
            Err(elapsed) => Err(PollError::TimedOut(elapsed.0)),
            Ok(Err(RpcError::InvalidResponse(reason))) => Err(PollError::InvalidResponse(reason)),
            Ok(Err(e)) => Err(PollError::Unavailable(e.to_string())),
            Ok(Ok(value)) => Ok(value),
        }
    }

    fn record(&self, handle: OperationHandle, observation: Observation) -> OperationReceipt {
        let mut entry = match self.tracked.get_mut(&handle.hash) {
            Some(entry) => entry,
            None => match observation {
                // Nothing to remember about a hash nobody submitted.
                Observation::Unknown => return OperationReceipt::submitted(handle),
                _ => self.tracked.entry(handle.hash).or_insert_with(|| Tracked {
                    receipt: OperationReceipt::submitted(handle),
                    acknowledged: false,
                    misses: 0,
                    touched: Instant::now(),
                }),
            },
        };
        let tracked = entry.value_mut();
        if tracked.receipt.is_terminal() {
            return tracked.receipt.clone();
        }
        tracked.touched = Instant::now();

        match observation {
            Observation::Final(receipt) => {
                metrics::record_receipt(receipt.state.as_str());
                tracing::info!(hash = %handle.hash, state = receipt.state.as_str(), "Operation settled");
                tracked.receipt = receipt;
            }
            Observation::Known => {
                tracked.acknowledged = true;
                tracked.misses = 0;
                tracked.receipt.state = tracked.receipt.state.max(OperationState::Pending);
            }
            Observation::Unknown if tracked.acknowledged => {
                tracked.misses += 1;
                if tracked.misses >= self.drop_after_misses {
                    tracing::warn!(hash = %handle.hash, misses = tracked.misses, "Relay dropped operation");
                    metrics::record_receipt("dropped");
                    tracked.receipt.state = OperationState::Failed;
                    tracked.receipt.failure = Some(FailureReason::RelayDropped);
                }
            }
            Observation::Unknown => {}
        }
        tracked.receipt.clone()
    }

    /// Forget submissions and receipts not touched within `retention`.
    pub fn prune(&self) -> usize {
        let now = Instant::now();
        let retention = self.retention;
        let before = self.tracked.len() + self.submissions.len() + self.in_doubt.len();
        self.tracked.retain(|_, t| now.duration_since(t.touched) < retention);
        self.submissions.retain(|_, s| now.duration_since(s.at) < retention);
        self.in_doubt.retain(|_, at| now.duration_since(*at) < retention);
        let removed =
            before.saturating_sub(self.tracked.len() + self.submissions.len() + self.in_doubt.len());
        if removed > 0 {
            tracing::debug!(chain_id = self.chain_id, removed, "Pruned relay state");
        }
        removed
    }

    fn maybe_prune(&self) {
        let now = Instant::now();
        {
            let Ok(mut next) = self.next_prune.try_lock() else {
                return;
            };
            if now < *next {
                return;
            }
            *next = now + self.retention / 4;
        }
        self.prune();
    }
}

fn classify_submit_error(error: RpcError) -> SubmitError {
    match error {
        RpcError::Remote { code, message, .. } => SubmitError::Rejected(RelayRejection {
            kind: RejectionKind::classify(code, &message),
            code,
            message,
        }),
        RpcError::Timeout(limit) => SubmitError::TimedOut(limit),
        other => SubmitError::Unavailable(other.to_string()),
    }
}

fn receipt_from_rpc(handle: OperationHandle, rpc: UserOperationReceiptRpc) -> OperationReceipt {
    OperationReceipt {
        handle,
        state: if rpc.success {
            OperationState::Included
        } else {
            OperationState::Failed
        },
        transaction_hash: Some(rpc.receipt.transaction_hash),
        block_number: rpc.receipt.block_number.map(|b| b.saturating_to::<u64>()),
        gas_used: rpc.actual_gas_used,
        failure: (!rpc.success).then(|| FailureReason::OnChainRevert { reason: rpc.reason }),
    }
}
