//! Sponsorship counters.
//!
//! Counts what a chain's paymaster has granted since the service started.
//! Gas is the sum of the limits on each sponsored operation, which bounds
//! what the paymaster can be charged for it.

use std::sync::atomic::{AtomicU64, Ordering};

use alloy::primitives::Address;
use dashmap::DashSet;
use serde::Serialize;

use crate::account::types::unix_now;
use crate::userop::UnsignedOperation;

/// Live counters for one chain. Shared across config reloads.
#[derive(Debug, Default)]
pub struct SponsorshipStats {
    granted: AtomicU64,
    denied: AtomicU64,
    gas_sponsored: AtomicU64,
    senders: DashSet<Address>,
    /// Unix seconds of the last grant or denial; 0 before the first.
    last_updated: AtomicU64,
}

/// Point-in-time copy of [`SponsorshipStats`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub total_transactions: u64,
    pub denied: u64,
    pub total_gas_sponsored: u64,
    pub active_users: u64,
    pub last_updated: Option<u64>,
}

impl SponsorshipStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_granted(&self, op: &UnsignedOperation) {
        let gas = op
            .call_gas_limit
            .saturating_add(op.verification_gas_limit)
            .saturating_add(op.pre_verification_gas)
            .saturating_add(op.paymaster_verification_gas_limit)
            .saturating_add(op.paymaster_post_op_gas_limit);
        let gas = u64::try_from(gas).unwrap_or(u64::MAX);

        self.granted.fetch_add(1, Ordering::Relaxed);
        let _ = self
            .gas_sponsored
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |total| {
                Some(total.saturating_add(gas))
            });
        self.senders.insert(op.sender);
        self.touch();
    }

    pub fn record_denied(&self) {
        self.denied.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    fn touch(&self) {
        self.last_updated.store(unix_now(), Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let last_updated = self.last_updated.load(Ordering::Relaxed);
        StatsSnapshot {
            total_transactions: self.granted.load(Ordering::Relaxed),
            denied: self.denied.load(Ordering::Relaxed),
            total_gas_sponsored: self.gas_sponsored.load(Ordering::Relaxed),
            active_users: self.senders.len() as u64,
            last_updated: (last_updated > 0).then_some(last_updated),
        }
    }
}

impl StatsSnapshot {
    /// Sum per-chain snapshots. Senders are per chain, so users add up.
    pub fn merge(&mut self, other: &StatsSnapshot) {
        self.total_transactions += other.total_transactions;
        self.denied += other.denied;
        self.total_gas_sponsored = self.total_gas_sponsored.saturating_add(other.total_gas_sponsored);
        self.active_users += other.active_users;
        self.last_updated = self.last_updated.max(other.last_updated);
    }
}
