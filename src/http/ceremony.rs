//! Pending signing ceremonies.
//!
//! # Responsibilities
//! - Park prepared operations while the client runs `navigator.credentials.get`
//! - Hand a prepared operation to exactly one completion or cancellation
//! - Expire abandoned ceremonies so their account locks are released
//!
//! # Design Decisions
//! - Ceremony ids are random UUIDs; the challenge itself is the operation hash
//! - Expiry equals the configured ceremony timeout

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::{Path, State},
    Json,
};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use dashmap::DashMap;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::http::error::{ApiError, ApiResult};
use crate::http::server::AppState;
use crate::lifecycle::Shutdown;
use crate::observability::metrics;
use crate::passkey::{AssertionResult, CredentialId};
use crate::pipeline::{PipelineError, PreparedOperation};

struct PendingCeremony {
    prepared: PreparedOperation,
    expires_at: Instant,
}

#[derive(Debug)]
pub enum TakeError {
    NotFound,
    Expired(Duration),
}

/// Prepared operations awaiting an assertion, keyed by ceremony id.
#[derive(Default)]
pub struct CeremonyBroker {
    pending: DashMap<Uuid, PendingCeremony>,
}

impl CeremonyBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&self, prepared: PreparedOperation) -> Uuid {
        let id = Uuid::new_v4();
        let expires_at = Instant::now() + prepared.ceremony_timeout;
        self.pending.insert(id, PendingCeremony { prepared, expires_at });
        id
    }

    /// Remove and return the prepared operation for `id`.
    pub fn take(&self, id: &Uuid) -> Result<PreparedOperation, TakeError> {
        let (_, ceremony) = self.pending.remove(id).ok_or(TakeError::NotFound)?;
        if Instant::now() >= ceremony.expires_at {
            metrics::record_ceremony("timed_out");
            return Err(TakeError::Expired(ceremony.prepared.ceremony_timeout));
        }
        Ok(ceremony.prepared)
    }

    /// Drop the ceremony, releasing its account lock.
    pub fn cancel(&self, id: &Uuid) -> bool {
        let removed = self.pending.remove(id).is_some();
        if removed {
            metrics::record_ceremony("cancelled");
        }
        removed
    }

    /// Drop expired ceremonies. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let before = self.pending.len();
        self.pending.retain(|_, ceremony| ceremony.expires_at > now);
        let removed = before.saturating_sub(self.pending.len());
        for _ in 0..removed {
            metrics::record_ceremony("timed_out");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Sweep on `interval` until shutdown.
    pub async fn run_sweeper(self: Arc<Self>, interval: Duration, shutdown: Shutdown) {
        let mut ticker = tokio::time::interval(interval);
        let mut stop = shutdown.subscribe();
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let removed = self.sweep();
                    if removed > 0 {
                        tracing::info!(removed, "Expired signing ceremonies");
                    }
                }
                _ = stop.recv() => break,
            }
        }
    }
}

/// Assertion as posted by the browser. Binary fields are base64url.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssertionBody {
    pub credential_id: CredentialId,
    pub authenticator_data: String,
    #[serde(rename = "clientDataJSON")]
    pub client_data_json: String,
    pub signature: String,
}

impl AssertionBody {
    pub fn decode(self) -> ApiResult<AssertionResult> {
        Ok(AssertionResult {
            credential_id: self.credential_id,
            authenticator_data: decode_field("authenticatorData", &self.authenticator_data)?,
            client_data_json: decode_field("clientDataJSON", &self.client_data_json)?,
            signature: decode_field("signature", &self.signature)?,
        })
    }
}

pub(crate) fn decode_field(name: &str, value: &str) -> ApiResult<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(value.trim_end_matches('='))
        .map_err(|e| ApiError::BadRequest(format!("{} is not base64url: {}", name, e)))
}

fn take(state: &AppState, id: &Uuid) -> ApiResult<PreparedOperation> {
    state.ceremonies.take(id).map_err(|e| match e {
        TakeError::NotFound => ApiError::NotFound(format!("ceremony {} not found", id)),
        TakeError::Expired(limit) => PipelineError::CeremonyTimedOut(limit).into(),
    })
}

/// `POST /api/ceremonies/{id}/assertion`
pub async fn complete_ceremony(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<AssertionBody>,
) -> ApiResult<Json<Value>> {
    let assertion = body.decode()?;
    let prepared = take(&state, &id)?;
    metrics::record_ceremony("completed");

    let outcome = state.pipeline.complete(prepared, assertion).await?;
    tracing::info!(ceremony = %id, hash = %outcome.handle.hash, "Ceremony completed");
    Ok(Json(json!({
        "ceremonyId": id,
        "userOpHash": outcome.handle.hash,
        "chainId": outcome.handle.chain_id,
        "nonce": outcome.nonce,
        "sponsored": outcome.sponsored,
        "state": "submitted",
    })))
}

/// `DELETE /api/ceremonies/{id}`
pub async fn cancel_ceremony(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Value>> {
    if !state.ceremonies.cancel(&id) {
        return Err(ApiError::NotFound(format!("ceremony {} not found", id)));
    }
    tracing::info!(ceremony = %id, "Ceremony cancelled by client");
    Ok(Json(json!({
        "ceremonyId": id,
        "outcome": PipelineError::UserCancelled.code(),
    })))
}
