//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the wallet
//! service. All types derive Serde traits for deserialization from config files.

use alloy::primitives::{address, Address, B256};
use serde::{Deserialize, Serialize};

/// Canonical ERC-4337 v0.7 EntryPoint deployment.
pub const DEFAULT_ENTRY_POINT: Address = address!("0000000071727De22E5E9d8BAf0edAc6f37da032");

/// Root configuration for the wallet service.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct WalletConfig {
    /// HTTP API listener configuration (bind address, TLS).
    pub server: ServerConfig,

    /// Chains the service can derive accounts and relay operations on.
    pub chains: Vec<ChainConfig>,

    /// Default gas policy used when an intent leaves a field unset.
    pub gas: GasConfig,

    /// Relay (bundler) client settings.
    pub relay: RelayConfig,

    /// Sponsorship (paymaster) client settings.
    pub sponsorship: SponsorshipConfig,

    /// Passkey ceremony settings.
    pub authenticator: AuthenticatorConfig,

    /// Rebuild-and-retry configuration.
    pub retries: RetryConfig,

    /// Account directory settings.
    pub directory: DirectoryConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl WalletConfig {
    /// Look up the configuration for a chain id.
    pub fn chain(&self, chain_id: u64) -> Option<&ChainConfig> {
        self.chains.iter().find(|c| c.chain_id == chain_id)
    }
}

/// HTTP API listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Optional TLS configuration. Passkey origins require HTTPS outside localhost.
    pub tls: Option<TlsConfig>,

    /// Request timeout in seconds. Must exceed the ceremony timeout.
    pub request_timeout_secs: u64,

    /// Maximum request body size in bytes.
    pub max_body_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            tls: None,
            request_timeout_secs: 90,
            max_body_size: 256 * 1024,
        }
    }
}

/// TLS configuration for the listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to certificate file (PEM).
    pub cert_path: String,

    /// Path to private key file (PEM).
    pub key_path: String,
}

/// Per-chain configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChainConfig {
    /// Chain ID (e.g., 11155111 for Sepolia).
    pub chain_id: u64,

    /// Human readable network name.
    #[serde(default)]
    pub name: String,

    /// JSON-RPC endpoint URL used for nonce and deployment lookups.
    pub rpc_url: String,

    /// Failover JSON-RPC endpoint URLs.
    #[serde(default)]
    pub failover_urls: Vec<String>,

    /// Bundler JSON-RPC endpoint URL.
    pub bundler_url: String,

    /// Paymaster JSON-RPC endpoint URL. Sponsorship is unsupported without one.
    #[serde(default)]
    pub paymaster_url: Option<String>,

    /// Whether operations on this chain request sponsorship by default.
    #[serde(default = "default_true")]
    pub sponsorship_enabled: bool,

    /// EntryPoint contract address.
    #[serde(default = "default_entry_point")]
    pub entry_point: Address,

    /// Account factory contract address.
    pub factory: Address,

    /// keccak256 of the account proxy creation code deployed by the factory.
    pub account_init_code_hash: B256,

    /// RPC request timeout in seconds.
    #[serde(default = "default_rpc_timeout")]
    pub rpc_timeout_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_entry_point() -> Address {
    DEFAULT_ENTRY_POINT
}

fn default_rpc_timeout() -> u64 {
    10
}

/// Gas defaults, all denominated in gas units or wei.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GasConfig {
    pub call_gas_limit: u128,
    pub verification_gas_limit: u128,
    pub pre_verification_gas: u128,
    pub paymaster_verification_gas_limit: u128,
    pub paymaster_post_op_gas_limit: u128,
    pub max_fee_per_gas: u128,
    pub max_priority_fee_per_gas: u128,

    /// Ask the bundler for limits instead of using the defaults above.
    pub estimate: bool,
}

impl Default for GasConfig {
    fn default() -> Self {
        Self {
            call_gas_limit: 100_000,
            verification_gas_limit: 500_000,
            pre_verification_gas: 50_000,
            paymaster_verification_gas_limit: 0,
            paymaster_post_op_gas_limit: 0,
            max_fee_per_gas: 1_000_000_000,
            max_priority_fee_per_gas: 1_000_000_000,
            estimate: false,
        }
    }
}

/// Relay client configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Timeout for a single bundler request in seconds.
    pub timeout_secs: u64,

    /// Consecutive unknown polls after which a pending operation counts as dropped.
    pub drop_after_misses: u32,

    /// How long submissions and receipts are remembered, in seconds.
    pub receipt_retention_secs: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 15,
            drop_after_misses: 5,
            receipt_retention_secs: 3600,
        }
    }
}

/// Sponsorship client configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SponsorshipConfig {
    /// Timeout for a single paymaster request in seconds.
    pub timeout_secs: u64,
}

impl Default for SponsorshipConfig {
    fn default() -> Self {
        Self { timeout_secs: 10 }
    }
}

/// Passkey ceremony configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthenticatorConfig {
    /// Upper bound on a single create/get ceremony in seconds.
    pub ceremony_timeout_secs: u64,
}

impl Default for AuthenticatorConfig {
    fn default() -> Self {
        Self {
            ceremony_timeout_secs: 60,
        }
    }
}

/// Retry configuration for rebuild-after-rejection and receipt polling.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of build/sign/submit attempts per intent.
    pub max_attempts: u32,

    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 8_000,
        }
    }
}

/// Account directory configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct DirectoryConfig {
    /// JSON snapshot written on shutdown and loaded on startup.
    pub snapshot_path: Option<String>,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// "pretty" or "json".
    pub log_format: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
