//! Paymaster JSON-RPC service.

use std::time::Duration;

use alloy::primitives::Address;
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::rpc::{JsonRpcClient, RpcError};
use crate::sponsor::types::SponsorshipQuote;
use crate::userop::UserOperationRpc;

/// A gas-sponsorship service.
#[async_trait]
pub trait SponsorshipService: Send + Sync {
    /// Ask the paymaster to sponsor `op` (carrying a placeholder signature).
    async fn sponsor_operation(
        &self,
        op: &UserOperationRpc,
        entry_point: Address,
        context: Option<&Value>,
    ) -> Result<SponsorshipQuote, RpcError>;
}

/// `pm_sponsorUserOperation` over HTTPS.
#[derive(Debug)]
pub struct PaymasterRpc {
    rpc: JsonRpcClient,
}

impl PaymasterRpc {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            rpc: JsonRpcClient::new(url, timeout),
        }
    }

    pub fn url(&self) -> &str {
        self.rpc.url()
    }
}

#[async_trait]
impl SponsorshipService for PaymasterRpc {
    async fn sponsor_operation(
        &self,
        op: &UserOperationRpc,
        entry_point: Address,
        context: Option<&Value>,
    ) -> Result<SponsorshipQuote, RpcError> {
        let params = match context {
            Some(context) => json!([op, entry_point, context]),
            None => json!([op, entry_point]),
        };
        self.rpc.call("pm_sponsorUserOperation", params).await
    }
}
