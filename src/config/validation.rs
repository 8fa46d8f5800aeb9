//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, addresses parse, URLs parse)
//! - Detect duplicate chain definitions
//! - Refuse reloads that would move already-derived account addresses
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: WalletConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;

use crate::config::schema::{ChainConfig, WalletConfig};

/// A single semantic problem found in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: String,
    /// Human readable explanation.
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Validate a parsed configuration, collecting every error.
pub fn validate_config(config: &WalletConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.server.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "server.bind_address",
            format!("'{}' is not a socket address", config.server.bind_address),
        ));
    }
    if config.server.request_timeout_secs <= config.authenticator.ceremony_timeout_secs {
        errors.push(ValidationError::new(
            "server.request_timeout_secs",
            "must be greater than authenticator.ceremony_timeout_secs",
        ));
    }
    if config.authenticator.ceremony_timeout_secs == 0 {
        errors.push(ValidationError::new(
            "authenticator.ceremony_timeout_secs",
            "must be greater than zero",
        ));
    }
    if config.relay.timeout_secs == 0 {
        errors.push(ValidationError::new("relay.timeout_secs", "must be greater than zero"));
    }
    if config.relay.receipt_retention_secs == 0 {
        errors.push(ValidationError::new(
            "relay.receipt_retention_secs",
            "must be greater than zero",
        ));
    }
    if config.sponsorship.timeout_secs == 0 {
        errors.push(ValidationError::new(
            "sponsorship.timeout_secs",
            "must be greater than zero",
        ));
    }
    if config.retries.max_attempts == 0 {
        errors.push(ValidationError::new("retries.max_attempts", "must be at least 1"));
    }
    if config.gas.max_priority_fee_per_gas > config.gas.max_fee_per_gas {
        errors.push(ValidationError::new(
            "gas.max_priority_fee_per_gas",
            "must not exceed gas.max_fee_per_gas",
        ));
    }
    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            "is not a socket address",
        ));
    }

    if config.chains.is_empty() {
        errors.push(ValidationError::new("chains", "at least one chain is required"));
    }

    let mut seen = HashSet::new();
    for (i, chain) in config.chains.iter().enumerate() {
        if !seen.insert(chain.chain_id) {
            errors.push(ValidationError::new(
                format!("chains[{}].chain_id", i),
                format!("duplicate chain id {}", chain.chain_id),
            ));
        }
        validate_chain(i, chain, &mut errors);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Check that `next` can replace the running `current` configuration.
///
/// Account addresses are derived from a chain's factory, account init-code
/// hash and EntryPoint, so those stay fixed for chains that remain configured.
pub fn validate_reload(current: &WalletConfig, next: &WalletConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    for (i, chain) in next.chains.iter().enumerate() {
        let Some(old) = current.chain(chain.chain_id) else {
            continue;
        };
        let field = |name: &str| format!("chains[{}].{}", i, name);
        if chain.factory != old.factory {
            errors.push(ValidationError::new(
                field("factory"),
                format!("cannot change from {} while accounts may exist", old.factory),
            ));
        }
        if chain.account_init_code_hash != old.account_init_code_hash {
            errors.push(ValidationError::new(
                field("account_init_code_hash"),
                "cannot change while accounts may exist",
            ));
        }
        if chain.entry_point != old.entry_point {
            errors.push(ValidationError::new(
                field("entry_point"),
                format!("cannot change from {} on a running service", old.entry_point),
            ));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_chain(index: usize, chain: &ChainConfig, errors: &mut Vec<ValidationError>) {
    let field = |name: &str| format!("chains[{}].{}", index, name);

    if chain.chain_id == 0 {
        errors.push(ValidationError::new(field("chain_id"), "must be non-zero"));
    }
    if chain.rpc_timeout_secs == 0 {
        errors.push(ValidationError::new(field("rpc_timeout_secs"), "must be greater than zero"));
    }
    if chain.factory.is_zero() {
        errors.push(ValidationError::new(field("factory"), "must not be the zero address"));
    }
    if chain.entry_point.is_zero() {
        errors.push(ValidationError::new(field("entry_point"), "must not be the zero address"));
    }

    let mut check_url = |name: &str, value: &str| {
        if value.parse::<url::Url>().is_err() {
            errors.push(ValidationError::new(field(name), format!("'{}' is not a URL", value)));
        }
    };
    check_url("rpc_url", &chain.rpc_url);
    check_url("bundler_url", &chain.bundler_url);
    if let Some(paymaster) = &chain.paymaster_url {
        check_url("paymaster_url", paymaster);
    }
    for url in &chain.failover_urls {
        check_url("failover_urls", url);
    }
}
