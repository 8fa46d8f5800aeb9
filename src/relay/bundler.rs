//! Bundler JSON-RPC service.

use std::time::Duration;

use alloy::primitives::{Address, B256, U256, U64};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::rpc::{JsonRpcClient, RpcError};
use crate::userop::UserOperationRpc;

/// `eth_getUserOperationReceipt` result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserOperationReceiptRpc {
    pub user_op_hash: B256,
    pub success: bool,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub actual_gas_used: Option<U256>,
    pub receipt: TransactionReceiptRpc,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionReceiptRpc {
    pub transaction_hash: B256,
    #[serde(default)]
    pub block_number: Option<U64>,
}

/// `eth_estimateUserOperationGas` result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GasEstimate {
    pub pre_verification_gas: U256,
    pub verification_gas_limit: U256,
    pub call_gas_limit: U256,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paymaster_verification_gas_limit: Option<U256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paymaster_post_op_gas_limit: Option<U256>,
}

/// An ERC-4337 relay (bundler).
#[async_trait]
pub trait RelayService: Send + Sync {
    async fn send_user_operation(
        &self,
        op: &UserOperationRpc,
        entry_point: Address,
    ) -> Result<B256, RpcError>;

    async fn get_user_operation_receipt(
        &self,
        hash: B256,
    ) -> Result<Option<UserOperationReceiptRpc>, RpcError>;

    /// Whether the relay still knows the operation (mempool or mined).
    async fn get_user_operation_by_hash(&self, hash: B256) -> Result<Option<Value>, RpcError>;

    async fn estimate_user_operation_gas(
        &self,
        op: &UserOperationRpc,
        entry_point: Address,
    ) -> Result<GasEstimate, RpcError>;
}

/// Bundler endpoint over HTTPS.
#[derive(Debug)]
pub struct BundlerRpc {
    rpc: JsonRpcClient,
}

impl BundlerRpc {
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
impl RelayService for BundlerRpc {
    async fn send_user_operation(
        &self,
        op: &UserOperationRpc,
        entry_point: Address,
    ) -> Result<B256, RpcError> {
        self.rpc
            .call("eth_sendUserOperation", json!([op, entry_point]))
            .await
    }

    async fn get_user_operation_receipt(
        &self,
        hash: B256,
    ) -> Result<Option<UserOperationReceiptRpc>, RpcError> {
        self.rpc
            .call("eth_getUserOperationReceipt", json!([hash]))
            .await
    }

    async fn get_user_operation_by_hash(&self, hash: B256) -> Result<Option<Value>, RpcError> {
        self.rpc
            .call("eth_getUserOperationByHash", json!([hash]))
            .await
    }

    async fn estimate_user_operation_gas(
        &self,
        op: &UserOperationRpc,
        entry_point: Address,
    ) -> Result<GasEstimate, RpcError> {
        self.rpc
            .call("eth_estimateUserOperationGas", json!([op, entry_point]))
            .await
    }
}
