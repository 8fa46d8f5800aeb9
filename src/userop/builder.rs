//! Operation construction.
//!
//! # Responsibilities
//! - Encode the intent into the account's `execute` call
//! - Populate init-code while the account is undeployed
//! - Resolve every gas field from the policy or the configured defaults
//!
//! # Design Decisions
//! - No I/O: nonce and deployment status arrive in `AccountState`
//! - Identical inputs produce byte-identical operations
//! - Call format version 1: `execute(address,uint256,bytes)` on the account

use alloy::primitives::{Address, Bytes, U256};
use alloy::sol;
use alloy::sol_types::SolCall;
use thiserror::Error;

use crate::account::AccountState;
use crate::config::GasConfig;
use crate::userop::types::{GasPolicy, IntentError, TransactionIntent, UnsignedOperation};

sol! {
    function execute(address dest, uint256 value, bytes func) external;
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BuildError {
    #[error("account not ready: {0}")]
    AccountNotReady(String),

    #[error("invalid gas policy: {0}")]
    InvalidGas(String),

    #[error(transparent)]
    Intent(#[from] IntentError),
}

/// Builds unsigned operations against configured gas defaults.
#[derive(Debug, Clone)]
pub struct OperationBuilder {
    defaults: GasConfig,
}

impl OperationBuilder {
    pub fn new(defaults: GasConfig) -> Self {
        Self { defaults }
    }

    pub fn defaults(&self) -> &GasConfig {
        &self.defaults
    }

    /// ABI-encode `execute(to, value, data)`.
    pub fn encode_call(intent: &TransactionIntent) -> Bytes {
        executeCall {
            dest: intent.to,
            value: intent.value,
            func: intent.data.clone(),
        }
        .abi_encode()
        .into()
    }

    pub fn build(
        &self,
        state: &AccountState,
        intent: &TransactionIntent,
        policy: &GasPolicy,
    ) -> Result<UnsignedOperation, BuildError> {
        let sender = state
            .address
            .filter(|a| *a != Address::ZERO)
            .ok_or_else(|| BuildError::AccountNotReady("no account address".to_string()))?;

        let init_code = if state.deployed {
            Bytes::new()
        } else if state.init_code.is_empty() {
            return Err(BuildError::AccountNotReady(
                "account is not deployed and has no init code".to_string(),
            ));
        } else {
            state.init_code.clone()
        };

        let d = &self.defaults;
        let max_fee_per_gas = policy.max_fee_per_gas.unwrap_or(d.max_fee_per_gas);
        let max_priority_fee_per_gas = policy
            .max_priority_fee_per_gas
            .unwrap_or(d.max_priority_fee_per_gas);
        if max_priority_fee_per_gas > max_fee_per_gas {
            return Err(BuildError::InvalidGas(format!(
                "priority fee {} exceeds max fee {}",
                max_priority_fee_per_gas, max_fee_per_gas
            )));
        }

        Ok(UnsignedOperation {
            sender,
            nonce: state.nonce,
            init_code,
            call_data: Self::encode_call(intent),
            call_gas_limit: policy.call_gas_limit.unwrap_or(d.call_gas_limit),
            verification_gas_limit: policy
                .verification_gas_limit
                .unwrap_or(d.verification_gas_limit),
            paymaster_verification_gas_limit: policy
                .paymaster_verification_gas_limit
                .unwrap_or(d.paymaster_verification_gas_limit),
            paymaster_post_op_gas_limit: policy
                .paymaster_post_op_gas_limit
                .unwrap_or(d.paymaster_post_op_gas_limit),
            pre_verification_gas: policy.pre_verification_gas.unwrap_or(d.pre_verification_gas),
            max_fee_per_gas,
            max_priority_fee_per_gas,
            sponsorship: None,
        })
    }
}

/// Decode an `execute` call back into its parts.
pub fn decode_call(call_data: &[u8]) -> Option<(Address, U256, Bytes)> {
    executeCall::abi_decode(call_data)
        .ok()
        .map(|call| (call.dest, call.value, call.func))
}
