//! Sponsorship attachment.
//!
//! # Responsibilities
//! - Request sponsorship strictly before signing
//! - Validate the paymaster's answer and merge it into a new operation
//! - Surface every denial with a reason; never fall back to unsponsored silently

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Address, U256};

use crate::observability::metrics;
use crate::passkey::SignatureCodec;
use crate::resilience::timeouts::with_deadline;
use crate::rpc::RpcError;
use crate::sponsor::paymaster::SponsorshipService;
use crate::sponsor::stats::SponsorshipStats;
use crate::sponsor::types::{SponsorshipDenied, SponsorshipPolicy, SponsorshipQuote};
use crate::userop::{SponsorshipPayload, UnsignedOperation, UserOperationRpc};

/// Per-chain sponsorship client.
#[derive(Clone)]
pub struct SponsorshipClient {
    service: Option<Arc<dyn SponsorshipService>>,
    chain_id: u64,
    entry_point: Address,
    timeout: Duration,
    stats: Arc<SponsorshipStats>,
}

impl SponsorshipClient {
    /// `service` is `None` when the chain has no paymaster endpoint.
    pub fn new(
        service: Option<Arc<dyn SponsorshipService>>,
        chain_id: u64,
        entry_point: Address,
        timeout: Duration,
    ) -> Self {
        Self {
            service,
            chain_id,
            entry_point,
            timeout,
            stats: Arc::new(SponsorshipStats::new()),
        }
    }

    /// Share counters with an earlier client for the same chain.
    pub fn with_stats(mut self, stats: Arc<SponsorshipStats>) -> Self {
        self.stats = stats;
        self
    }

    pub fn stats(&self) -> Arc<SponsorshipStats> {
        self.stats.clone()
    }

    pub fn is_available(&self) -> bool {
        self.service.is_some()
    }

    /// Attach sponsorship to `op`, or return it unchanged if the policy is disabled.
    pub async fn sponsor(
        &self,
        op: UnsignedOperation,
        policy: &SponsorshipPolicy,
    ) -> Result<UnsignedOperation, SponsorshipDenied> {
        if !policy.enabled {
            return Ok(op);
        }
        let Some(service) = &self.service else {
            metrics::record_sponsorship("unsupported_chain");
            self.stats.record_denied();
            return Err(SponsorshipDenied::UnsupportedChain(self.chain_id));
        };

        let request = UserOperationRpc::new(&op, SignatureCodec::dummy().to_bytes());
        let outcome = with_deadline(
            self.timeout,
            service.sponsor_operation(&request, self.entry_point, policy.context.as_ref()),
        )
        .await;

        let result = match outcome {
            Err(elapsed) => Err(SponsorshipDenied::ServiceUnavailable(format!(
                "no answer within {:?}",
                elapsed.0
            ))),
            Ok(Err(e)) => Err(self.classify(e)),
            Ok(Ok(quote)) => apply_quote(op, quote),
        };

        match &result {
            Ok(sponsored) => {
                metrics::record_sponsorship("granted");
                self.stats.record_granted(sponsored);
                tracing::info!(
                    chain_id = self.chain_id,
                    sender = %sponsored.sender,
                    paymaster = ?sponsored.sponsorship.as_ref().map(|s| s.paymaster),
                    "Sponsorship granted"
                );
            }
            Err(denied) => {
                metrics::record_sponsorship(denied.as_str());
                self.stats.record_denied();
                tracing::warn!(chain_id = self.chain_id, reason = %denied, "Sponsorship denied");
            }
        }
        result
    }

    fn classify(&self, error: RpcError) -> SponsorshipDenied {
        if error.is_unavailable() {
            return SponsorshipDenied::ServiceUnavailable(error.to_string());
        }
        match error {
            RpcError::Remote { message, .. } => {
                let lower = message.to_lowercase();
                if is_spending_cap(&lower) {
                    SponsorshipDenied::LimitExceeded(message)
                } else if lower.contains("chain")
                    && (lower.contains("unsupported") || lower.contains("not supported"))
                {
                    SponsorshipDenied::UnsupportedChain(self.chain_id)
                } else {
                    SponsorshipDenied::Rejected(message)
                }
            }
            RpcError::InvalidResponse(reason) => SponsorshipDenied::InvalidResponse(reason),
            other => SponsorshipDenied::Rejected(other.to_string()),
        }
    }
}

/// Wording paymasters use for a per-user or per-policy spending cap.
const SPENDING_CAP_PHRASES: &[&str] = &[
    "spending limit",
    "spend limit",
    "daily limit",
    "monthly limit",
    "sponsorship limit",
    "policy limit",
    "user limit",
    "quota",
    "budget",
];

/// Gas-limit complaints ("callGasLimit too low") are not spending caps.
fn is_spending_cap(lower: &str) -> bool {
    !lower.contains("gas") && SPENDING_CAP_PHRASES.iter().any(|p| lower.contains(p))
}

fn to_gas(value: Option<U256>, field: &str) -> Result<Option<u128>, SponsorshipDenied> {
    value
        .map(|v| {
            u128::try_from(v)
                .map_err(|_| SponsorshipDenied::InvalidResponse(format!("{} out of range", field)))
        })
        .transpose()
}

/// Merge a paymaster quote into a new operation.
pub fn apply_quote(
    op: UnsignedOperation,
    quote: SponsorshipQuote,
) -> Result<UnsignedOperation, SponsorshipDenied> {
    let paymaster = quote
        .paymaster
        .filter(|p| *p != Address::ZERO)
        .ok_or_else(|| SponsorshipDenied::InvalidResponse("missing paymaster".to_string()))?;

    Ok(UnsignedOperation {
        sponsorship: Some(SponsorshipPayload {
            paymaster,
            paymaster_data: quote.paymaster_data.unwrap_or_default(),
        }),
        paymaster_verification_gas_limit: to_gas(
            quote.paymaster_verification_gas_limit,
            "paymasterVerificationGasLimit",
        )?
        .unwrap_or(op.paymaster_verification_gas_limit),
        paymaster_post_op_gas_limit: to_gas(
            quote.paymaster_post_op_gas_limit,
            "paymasterPostOpGasLimit",
        )?
        .unwrap_or(op.paymaster_post_op_gas_limit),
        pre_verification_gas: to_gas(quote.pre_verification_gas, "preVerificationGas")?
            .unwrap_or(op.pre_verification_gas),
        verification_gas_limit: to_gas(quote.verification_gas_limit, "verificationGasLimit")?
            .unwrap_or(op.verification_gas_limit),
        call_gas_limit: to_gas(quote.call_gas_limit, "callGasLimit")?.unwrap_or(op.call_gas_limit),
        ..op
    })
}
