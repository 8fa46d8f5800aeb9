//! Operation records and intents.

use std::str::FromStr;

use alloy::primitives::{Address, Bytes, B256, U256};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::passkey::SignatureBlob;

/// Paymaster attachment produced by sponsorship.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SponsorshipPayload {
    pub paymaster: Address,
    pub paymaster_data: Bytes,
}

/// A fully specified operation, not yet signed.
///
/// Values are never mutated in place; sponsorship builds a new one before
/// any hash is taken.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedOperation {
    pub sender: Address,
    pub nonce: U256,
    /// `factory || factoryData`; empty once the account is deployed.
    pub init_code: Bytes,
    pub call_data: Bytes,
    pub call_gas_limit: u128,
    pub verification_gas_limit: u128,
    pub paymaster_verification_gas_limit: u128,
    pub paymaster_post_op_gas_limit: u128,
    pub pre_verification_gas: u128,
    pub max_fee_per_gas: u128,
    pub max_priority_fee_per_gas: u128,
    pub sponsorship: Option<SponsorshipPayload>,
}

impl UnsignedOperation {
    /// Split the init-code into factory and factory data.
    pub fn factory_parts(&self) -> Option<(Address, Bytes)> {
        if self.init_code.len() < 20 {
            return None;
        }
        Some((
            Address::from_slice(&self.init_code[..20]),
            Bytes::copy_from_slice(&self.init_code[20..]),
        ))
    }

    /// `verificationGasLimit << 128 | callGasLimit`.
    pub fn account_gas_limits(&self) -> B256 {
        pack_u128_pair(self.verification_gas_limit, self.call_gas_limit)
    }

    /// `maxPriorityFeePerGas << 128 | maxFeePerGas`.
    pub fn gas_fees(&self) -> B256 {
        pack_u128_pair(self.max_priority_fee_per_gas, self.max_fee_per_gas)
    }

    /// `paymaster || pmVerificationGasLimit (16) || pmPostOpGasLimit (16) || paymasterData`.
    pub fn paymaster_and_data(&self) -> Bytes {
        match &self.sponsorship {
            None => Bytes::new(),
            Some(payload) => {
                let mut out = Vec::with_capacity(52 + payload.paymaster_data.len());
                out.extend_from_slice(payload.paymaster.as_slice());
                out.extend_from_slice(&self.paymaster_verification_gas_limit.to_be_bytes());
                out.extend_from_slice(&self.paymaster_post_op_gas_limit.to_be_bytes());
                out.extend_from_slice(&payload.paymaster_data);
                out.into()
            }
        }
    }

    /// The EntryPoint operation hash; this is the passkey challenge.
    pub fn hash(&self, entry_point: Address, chain_id: u64) -> B256 {
        crate::userop::hash::operation_hash(self, entry_point, chain_id)
    }

    pub fn sign(self, signature: SignatureBlob) -> SignedOperation {
        SignedOperation {
            operation: self,
            signature,
        }
    }
}

fn pack_u128_pair(high: u128, low: u128) -> B256 {
    let mut out = [0u8; 32];
    out[..16].copy_from_slice(&high.to_be_bytes());
    out[16..].copy_from_slice(&low.to_be_bytes());
    B256::from(out)
}

/// An operation with its encoded passkey signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedOperation {
    pub operation: UnsignedOperation,
    pub signature: SignatureBlob,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IntentError {
    #[error("invalid destination address '{0}'")]
    InvalidAddress(String),

    #[error("invalid value '{0}'")]
    InvalidValue(String),

    #[error("invalid call data: {0}")]
    InvalidData(String),
}

/// A call the user wants the account to make.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionIntent {
    pub to: Address,
    pub value: U256,
    pub data: Bytes,
}

impl TransactionIntent {
    /// Parse boundary strings: hex address, decimal or `0x` hex value, hex data.
    pub fn parse(to: &str, value: &str, data: &str) -> Result<Self, IntentError> {
        let to = Address::from_str(to.trim()).map_err(|_| IntentError::InvalidAddress(to.to_string()))?;

        let value = value.trim();
        let value = if value.is_empty() {
            U256::ZERO
        } else {
            U256::from_str(value).map_err(|_| IntentError::InvalidValue(value.to_string()))?
        };

        let data = data.trim();
        let data = if data.is_empty() || data == "0x" {
            Bytes::new()
        } else {
            Bytes::from(alloy::primitives::hex::decode(data).map_err(|e| IntentError::InvalidData(e.to_string()))?)
        };

        Ok(Self { to, value, data })
    }
}

/// Wire form of an intent as accepted by the API and CLI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentRequest {
    pub to: String,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub data: String,
}

impl TryFrom<&IntentRequest> for TransactionIntent {
    type Error = IntentError;

    fn try_from(request: &IntentRequest) -> Result<Self, Self::Error> {
        TransactionIntent::parse(&request.to, &request.value, &request.data)
    }
}

/// Per-operation gas overrides. Unset fields fall back to configured defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GasPolicy {
    pub call_gas_limit: Option<u128>,
    pub verification_gas_limit: Option<u128>,
    pub pre_verification_gas: Option<u128>,
    pub paymaster_verification_gas_limit: Option<u128>,
    pub paymaster_post_op_gas_limit: Option<u128>,
    pub max_fee_per_gas: Option<u128>,
    pub max_priority_fee_per_gas: Option<u128>,
}
