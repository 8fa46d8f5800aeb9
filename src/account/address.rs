//! Counterfactual account address derivation.
//!
//! # Responsibilities
//! - Canonicalize a credential public key into the factory's byte form
//! - Compute the CREATE2 address the factory will deploy to
//! - Produce the matching deployment init-code
//!
//! # Design Decisions
//! - Pure and deterministic: no I/O, no clock, no randomness
//! - The salt commits to the chain id, so one passkey yields a distinct address per chain

use alloy::primitives::{keccak256, Address, Bytes, B256, U256};
use alloy::sol;
use alloy::sol_types::SolCall;
use thiserror::Error;

use crate::config::ChainConfig;
use crate::passkey::PublicKey;

sol! {
    function createAccount(bytes publicKey, uint256 chainId) external returns (address account);
}

const RSA_EXPONENT_WIDTH: usize = 32;
const RSA_MODULUS_WIDTH: usize = 512;
const RSA_MIN_BITS: usize = 1024;
const RSA_MAX_BITS: usize = 4096;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeriveError {
    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),
}

/// Canonical byte form of a credential key, as passed to `createAccount`.
///
/// ES256: `x || y`. RS256: exponent left-padded to 32 bytes, then modulus
/// left-padded to 512 bytes.
pub fn canonical_key(key: &PublicKey) -> Result<Vec<u8>, DeriveError> {
    match key {
        PublicKey::Es256 { x, y } => {
            if x.is_zero() || y.is_zero() {
                return Err(DeriveError::InvalidPublicKey(
                    "P-256 coordinate is zero".to_string(),
                ));
            }
            let mut out = Vec::with_capacity(64);
            out.extend_from_slice(x.as_slice());
            out.extend_from_slice(y.as_slice());
            Ok(out)
        }
        PublicKey::Rs256 { n, e } => {
            let n = strip_leading_zeros(n);
            let e = strip_leading_zeros(e);

            let bits = bit_length(n);
            if !(RSA_MIN_BITS..=RSA_MAX_BITS).contains(&bits) {
                return Err(DeriveError::InvalidPublicKey(format!(
                    "RSA modulus of {} bits, expected {}..={}",
                    bits, RSA_MIN_BITS, RSA_MAX_BITS
                )));
            }
            if e.is_empty() || e.len() > RSA_EXPONENT_WIDTH {
                return Err(DeriveError::InvalidPublicKey(
                    "RSA exponent is zero or wider than 32 bytes".to_string(),
                ));
            }

            let mut out = vec![0u8; RSA_EXPONENT_WIDTH + RSA_MODULUS_WIDTH];
            out[RSA_EXPONENT_WIDTH - e.len()..RSA_EXPONENT_WIDTH].copy_from_slice(e);
            out[RSA_EXPONENT_WIDTH + RSA_MODULUS_WIDTH - n.len()..].copy_from_slice(n);
            Ok(out)
        }
    }
}

fn strip_leading_zeros(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len());
    &bytes[start..]
}

fn bit_length(stripped: &[u8]) -> usize {
    match stripped.first() {
        Some(first) => (stripped.len() - 1) * 8 + (8 - first.leading_zeros() as usize),
        None => 0,
    }
}

/// CREATE2 address calculator bound to one factory deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressDeriver {
    factory: Address,
    init_code_hash: B256,
}

impl AddressDeriver {
    pub fn new(factory: Address, init_code_hash: B256) -> Self {
        Self {
            factory,
            init_code_hash,
        }
    }

    pub fn from_chain(config: &ChainConfig) -> Self {
        Self::new(config.factory, config.account_init_code_hash)
    }

    pub fn factory(&self) -> Address {
        self.factory
    }

    /// `keccak256(canonical_key || chain_id as 32-byte big-endian)`.
    pub fn salt(key: &PublicKey, chain_id: u64) -> Result<B256, DeriveError> {
        let mut preimage = canonical_key(key)?;
        preimage.extend_from_slice(&U256::from(chain_id).to_be_bytes::<32>());
        Ok(keccak256(preimage))
    }

    /// The address the factory deploys the account to.
    pub fn derive(&self, key: &PublicKey, chain_id: u64) -> Result<Address, DeriveError> {
        let salt = Self::salt(key, chain_id)?;
        Ok(self.factory.create2(salt, self.init_code_hash))
    }

    /// `factory || createAccount(publicKey, chainId)`.
    pub fn init_code(&self, key: &PublicKey, chain_id: u64) -> Result<Bytes, DeriveError> {
        let call = createAccountCall {
            publicKey: canonical_key(key)?.into(),
            chainId: U256::from(chain_id),
        };
        let mut out = self.factory.to_vec();
        out.extend_from_slice(&call.abi_encode());
        Ok(out.into())
    }
}
