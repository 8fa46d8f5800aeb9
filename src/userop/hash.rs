//! EntryPoint v0.7 operation hashing.

use alloy::primitives::{keccak256, Address, B256, U256};
use alloy::sol_types::SolValue;

use crate::userop::types::UnsignedOperation;

/// `keccak256(abi.encode(keccak256(pack(op)), entryPoint, chainId))`.
///
/// The packed form hashes the dynamic fields (`initCode`, `callData`,
/// `paymasterAndData`) and carries the gas limits and fees as two packed
/// 32-byte words.
pub fn operation_hash(op: &UnsignedOperation, entry_point: Address, chain_id: u64) -> B256 {
    let packed = (
        op.sender,
        op.nonce,
        keccak256(&op.init_code),
        keccak256(&op.call_data),
        op.account_gas_limits(),
        U256::from(op.pre_verification_gas),
        op.gas_fees(),
        keccak256(op.paymaster_and_data()),
    )
        .abi_encode();

    keccak256((keccak256(packed), entry_point, U256::from(chain_id)).abi_encode())
}
