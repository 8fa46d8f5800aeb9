//! Bundler/paymaster JSON wire format for v0.7 operations.

use alloy::primitives::{Address, Bytes, U256};
use serde::{Deserialize, Serialize};

use crate::userop::types::{SignedOperation, UnsignedOperation};

/// Unpacked operation as sent over JSON-RPC. Quantities are hex strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserOperationRpc {
    pub sender: Address,
    pub nonce: U256,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub factory: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub factory_data: Option<Bytes>,
    pub call_data: Bytes,
    pub call_gas_limit: U256,
    pub verification_gas_limit: U256,
    pub pre_verification_gas: U256,
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paymaster: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paymaster_verification_gas_limit: Option<U256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paymaster_post_op_gas_limit: Option<U256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paymaster_data: Option<Bytes>,
    pub signature: Bytes,
}

impl UserOperationRpc {
    pub fn new(op: &UnsignedOperation, signature: Bytes) -> Self {
        let (factory, factory_data) = match op.factory_parts() {
            Some((factory, data)) => (Some(factory), Some(data)),
            None => (None, None),
        };
        let sponsorship = op.sponsorship.as_ref();

        Self {
            sender: op.sender,
            nonce: op.nonce,
            factory,
            factory_data,
            call_data: op.call_data.clone(),
            call_gas_limit: U256::from(op.call_gas_limit),
            verification_gas_limit: U256::from(op.verification_gas_limit),
            pre_verification_gas: U256::from(op.pre_verification_gas),
            max_fee_per_gas: U256::from(op.max_fee_per_gas),
            max_priority_fee_per_gas: U256::from(op.max_priority_fee_per_gas),
            paymaster: sponsorship.map(|s| s.paymaster),
            paymaster_verification_gas_limit: sponsorship
                .map(|_| U256::from(op.paymaster_verification_gas_limit)),
            paymaster_post_op_gas_limit: sponsorship
                .map(|_| U256::from(op.paymaster_post_op_gas_limit)),
            paymaster_data: sponsorship.map(|s| s.paymaster_data.clone()),
            signature,
        }
    }
}

impl From<&SignedOperation> for UserOperationRpc {
    fn from(signed: &SignedOperation) -> Self {
        Self::new(&signed.operation, signed.signature.to_bytes())
    }
}
