//! Operation endpoints.
//!
//! A send is two requests: `POST /api/operations` builds and sponsors the
//! operation and returns the challenge; the assertion is posted to the
//! ceremony endpoint. The account stays locked in between.

use std::str::FromStr;

use alloy::primitives::{Bytes, B256};
use axum::{
    extract::{Path, Query, State},
    Json,
};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::http::error::{ApiError, ApiResult};
use crate::http::server::AppState;
use crate::passkey::CredentialId;
use crate::pipeline::SendRequest;
use crate::relay::{GasEstimate, OperationHandle, OperationReceipt};
use crate::sponsor::SponsorshipPolicy;
use crate::userop::{GasPolicy, TransactionIntent, UserOperationRpc};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartOperationRequest {
    pub identity: String,
    pub chain_id: u64,
    pub to: String,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub data: String,
    #[serde(default)]
    pub gas: GasPolicy,
    #[serde(default)]
    pub sponsorship: Option<SponsorshipPolicy>,
    #[serde(default)]
    pub credential_id: Option<CredentialId>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartOperationResponse {
    pub ceremony_id: Uuid,
    /// base64url operation hash, for `navigator.credentials.get`.
    pub challenge: String,
    pub user_op_hash: B256,
    pub credential_id: CredentialId,
    pub chain_id: u64,
    pub expires_in_secs: u64,
    pub sponsored: bool,
    pub user_operation: UserOperationRpc,
}

/// `POST /api/operations`
pub async fn start_operation(
    State(state): State<AppState>,
    Json(request): Json<StartOperationRequest>,
) -> ApiResult<Json<StartOperationResponse>> {
    let intent = TransactionIntent::parse(&request.to, &request.value, &request.data)
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let send = SendRequest {
        identity: request.identity,
        chain_id: request.chain_id,
        intent,
        gas: request.gas,
        sponsorship: request.sponsorship,
        credential_id: request.credential_id,
    };
    let prepared = state.pipeline.prepare(&send).await?;

    let hash = prepared.hash;
    let credential_id = prepared.credential_id.clone();
    let chain_id = prepared.chain_id;
    let expires_in_secs = prepared.ceremony_timeout.as_secs();
    let sponsored = prepared.operation.sponsorship.is_some();
    let user_operation = UserOperationRpc::new(&prepared.operation, Bytes::new());

    let ceremony_id = state.ceremonies.open(prepared);
    tracing::info!(ceremony = %ceremony_id, %hash, "Signing ceremony opened");

    Ok(Json(StartOperationResponse {
        ceremony_id,
        challenge: URL_SAFE_NO_PAD.encode(hash),
        user_op_hash: hash,
        credential_id,
        chain_id,
        expires_in_secs,
        sponsored,
        user_operation,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptQuery {
    pub chain_id: u64,
}

/// `GET /api/bundler/userop/{hash}?chainId=`
pub async fn get_receipt(
    State(state): State<AppState>,
    Path(hash): Path<String>,
    Query(query): Query<ReceiptQuery>,
) -> ApiResult<Json<OperationReceipt>> {
    let hash = B256::from_str(&hash)
        .map_err(|_| ApiError::BadRequest(format!("invalid operation hash '{}'", hash)))?;
    let handle = OperationHandle {
        hash,
        chain_id: query.chain_id,
    };
    Ok(Json(state.pipeline.poll(&handle).await?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EstimateRequest {
    pub identity: String,
    pub chain_id: u64,
    pub to: String,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub data: String,
    #[serde(default)]
    pub gas: GasPolicy,
}

/// `POST /api/bundler/estimate-gas`
pub async fn estimate_gas(
    State(state): State<AppState>,
    Json(request): Json<EstimateRequest>,
) -> ApiResult<Json<GasEstimate>> {
    let intent = TransactionIntent::parse(&request.to, &request.value, &request.data)
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let estimate = state
        .pipeline
        .estimate(&request.identity, request.chain_id, &intent, &request.gas)
        .await?;
    Ok(Json(estimate))
}
