use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::account::Account;
use crate::http::ceremony::{decode_field, AssertionBody};
use crate::http::error::{ApiError, ApiResult};
use crate::http::server::AppState;
use crate::passkey::CredentialId;
use crate::pipeline::{MessageSignature, PasskeyCheck};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAccountRequest {
    pub identity: String,
    pub chain_id: u64,
    pub credential_id: CredentialId,
    /// CBOR attestation object, base64url.
    pub attestation_object: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddCredentialRequest {
    pub credential_id: CredentialId,
    pub attestation_object: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyPasskeyRequest {
    pub identity: String,
    /// The challenge the client asked the authenticator to sign, base64url.
    pub challenge: String,
    #[serde(flatten)]
    pub assertion: AssertionBody,
}

/// An assertion over `eip191_hash_message(message)`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignMessageRequest {
    pub identity: String,
    pub message: String,
    #[serde(flatten)]
    pub assertion: AssertionBody,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountResponse {
    #[serde(flatten)]
    pub account: Account,
    pub exists: bool,
}

fn validate_identity(identity: &str) -> ApiResult<&str> {
    let identity = identity.trim();
    if identity.is_empty() || identity.len() > 256 {
        return Err(ApiError::BadRequest(
            "identity must be between 1 and 256 characters".to_string(),
        ));
    }
    Ok(identity)
}

/// `POST /api/account/create`
pub async fn create_account(
    State(state): State<AppState>,
    Json(request): Json<CreateAccountRequest>,
) -> ApiResult<impl IntoResponse> {
    let identity = validate_identity(&request.identity)?;
    let attestation = decode_field("attestationObject", &request.attestation_object)?;

    let registration = state
        .pipeline
        .register(identity, request.chain_id, request.credential_id, &attestation)
        .await?;

    let status = if registration.exists {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((
        status,
        Json(AccountResponse {
            account: registration.account,
            exists: registration.exists,
        }),
    ))
}

/// `POST /api/account/{identity}/credentials`
pub async fn add_credential(
    State(state): State<AppState>,
    Path(identity): Path<String>,
    Json(request): Json<AddCredentialRequest>,
) -> ApiResult<Json<Account>> {
    let attestation = decode_field("attestationObject", &request.attestation_object)?;
    let account = state
        .pipeline
        .add_credential(&identity, request.credential_id, &attestation)
        .await?;
    Ok(Json(account))
}

/// `GET /api/account/{identity}`
pub async fn get_account(
    State(state): State<AppState>,
    Path(identity): Path<String>,
) -> ApiResult<Json<Account>> {
    Ok(Json(state.pipeline.account(&identity).await?))
}

/// `GET /api/account/list`
pub async fn list_accounts(State(state): State<AppState>) -> ApiResult<Json<Vec<Account>>> {
    Ok(Json(state.pipeline.accounts().await?))
}

/// `POST /api/account/verify-passkey`
pub async fn verify_passkey(
    State(state): State<AppState>,
    Json(request): Json<VerifyPasskeyRequest>,
) -> ApiResult<Json<PasskeyCheck>> {
    let identity = validate_identity(&request.identity)?;
    let challenge = decode_field("challenge", &request.challenge)?;
    let assertion = request.assertion.decode()?;
    let check = state
        .pipeline
        .verify_passkey(identity, &challenge, &assertion)
        .await?;
    Ok(Json(check))
}

/// `POST /api/account/sign-message`
pub async fn sign_message(
    State(state): State<AppState>,
    Json(request): Json<SignMessageRequest>,
) -> ApiResult<Json<MessageSignature>> {
    let identity = validate_identity(&request.identity)?;
    let assertion = request.assertion.decode()?;
    let signature = state
        .pipeline
        .message_signature(identity, request.message.as_bytes(), assertion)
        .await?;
    Ok(Json(signature))
}
