//! Account data model.

use std::time::{SystemTime, UNIX_EPOCH};

use alloy::primitives::{Address, Bytes, U256};
use serde::{Deserialize, Serialize};

use crate::passkey::{CredentialId, PublicKey};

/// A passkey bound to an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    pub credential_id: CredentialId,
    pub public_key: PublicKey,
    /// Binding time (seconds since epoch).
    pub bound_at: u64,
}

/// A counterfactual smart account owned by a passkey.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    /// Owning principal.
    pub identity: String,
    pub chain_id: u64,
    /// Derived from the owner credential; never changes.
    pub address: Address,
    /// Owner credential first.
    pub credentials: Vec<Credential>,
    /// Creation time (seconds since epoch).
    pub created_at: u64,
}

impl Account {
    pub fn new(identity: String, chain_id: u64, address: Address, owner: Credential) -> Self {
        Self {
            identity,
            chain_id,
            address,
            created_at: owner.bound_at,
            credentials: vec![owner],
        }
    }

    /// The credential whose key the address was derived from.
    pub fn owner(&self) -> Option<&Credential> {
        self.credentials.first()
    }

    pub fn credential(&self, id: &CredentialId) -> Option<&Credential> {
        self.credentials.iter().find(|c| &c.credential_id == id)
    }

    pub fn has_credential(&self, id: &CredentialId) -> bool {
        self.credential(id).is_some()
    }
}

/// What the operation builder needs to know about an account.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AccountState {
    pub address: Option<Address>,
    pub nonce: U256,
    pub deployed: bool,
    /// Factory deployment call; required while undeployed.
    pub init_code: Bytes,
}

pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
