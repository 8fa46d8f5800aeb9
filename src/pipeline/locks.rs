//! Account-scoped mutual exclusion.

use std::sync::Arc;

use alloy::primitives::Address;
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// One async mutex per account address.
///
/// A guard spans nonce read → build → sponsor → sign → submit, so at most one
/// operation per account is under construction at a time. Guards are owned so
/// they can outlive the request that started a ceremony. Entries nobody holds
/// or waits on are dropped on the next acquire.
#[derive(Debug, Default)]
pub struct AccountLocks {
    locks: DashMap<Address, Arc<Mutex<()>>>,
}

pub type AccountGuard = OwnedMutexGuard<()>;

impl AccountLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, address: Address) -> AccountGuard {
        self.prune();
        let lock = self.locks.entry(address).or_default().clone();
        lock.lock_owned().await
    }

    /// Acquire without waiting; `None` if the account is busy.
    pub fn try_acquire(&self, address: Address) -> Option<AccountGuard> {
        let lock = self.locks.entry(address).or_default().clone();
        lock.try_lock_owned().ok()
    }

    /// Drop locks with no guard and no waiter. The map holds the only
    /// reference to those, and a later acquire recreates them.
    pub fn prune(&self) -> usize {
        let before = self.locks.len();
        self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        before - self.locks.len()
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
