//! Passkey smart-wallet service library.

pub mod account;
pub mod chain;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod passkey;
pub mod pipeline;
pub mod relay;
pub mod resilience;
pub mod rpc;
pub mod sponsor;
pub mod userop;

pub use config::schema::WalletConfig;
pub use http::ApiServer;
pub use lifecycle::Shutdown;
pub use pipeline::TransactionPipeline;
