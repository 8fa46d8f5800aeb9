//! Platform authenticator seam.
//!
//! # Responsibilities
//! - Abstract the create/get passkey ceremonies behind a trait
//! - Bound every ceremony by a timeout and an explicit cancel signal
//! - Keep user cancellation distinct from transport failures

use std::fmt;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;
use tokio::sync::watch;

use crate::observability::metrics;
use crate::passkey::cose::CoseAlgorithm;
use crate::passkey::signature::AssertionFields;
use crate::resilience::timeouts::with_deadline;

/// Opaque, authenticator-chosen credential identifier. Serialized as base64url.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct CredentialId(Vec<u8>);

impl CredentialId {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn from_base64url(encoded: &str) -> Result<Self, base64::DecodeError> {
        URL_SAFE_NO_PAD
            .decode(encoded.trim_end_matches('='))
            .map(Self)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_base64url(&self) -> String {
        URL_SAFE_NO_PAD.encode(&self.0)
    }
}

impl fmt::Display for CredentialId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base64url())
    }
}

impl fmt::Debug for CredentialId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CredentialId({})", self.to_base64url())
    }
}

impl Serialize for CredentialId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_base64url())
    }
}

impl<'de> Deserialize<'de> for CredentialId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        Self::from_base64url(&encoded).map_err(serde::de::Error::custom)
    }
}

/// Output of a registration ceremony.
#[derive(Debug, Clone)]
pub struct AttestationResult {
    pub credential_id: CredentialId,
    /// CBOR attestation object.
    pub attestation_object: Vec<u8>,
    pub client_data_json: Vec<u8>,
}

/// Output of an authentication ceremony.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssertionResult {
    pub credential_id: CredentialId,
    pub authenticator_data: Vec<u8>,
    pub client_data_json: Vec<u8>,
    pub signature: Vec<u8>,
}

impl AssertionResult {
    pub fn into_fields(self) -> AssertionFields {
        AssertionFields {
            authenticator_data: self.authenticator_data,
            client_data_json: self.client_data_json,
            signature: self.signature,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthenticatorError {
    /// The user dismissed the prompt or the caller cancelled.
    #[error("ceremony cancelled by user")]
    UserCancelled,

    #[error("ceremony timed out after {0:?}")]
    TimedOut(Duration),

    /// The authenticator refused (no matching credential, policy).
    #[error("authenticator refused: {0}")]
    NotAllowed(String),

    #[error("authenticator unavailable: {0}")]
    Unavailable(String),
}

/// A platform authenticator able to run passkey ceremonies.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Register a new credential for `identity`.
    async fn create_credential(
        &self,
        identity: &str,
        challenge: &[u8],
        algorithms: &[CoseAlgorithm],
    ) -> Result<AttestationResult, AuthenticatorError>;

    /// Sign `challenge` with the credential `credential_id`.
    async fn get_assertion(
        &self,
        credential_id: &CredentialId,
        challenge: &[u8],
    ) -> Result<AssertionResult, AuthenticatorError>;
}

/// Sending half of a cancel signal.
#[derive(Debug)]
pub struct CancelHandle(watch::Sender<bool>);

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.0.send(true);
    }
}

/// Receiving half of a cancel signal.
#[derive(Debug, Clone)]
pub struct CancelSignal(watch::Receiver<bool>);

impl CancelSignal {
    pub fn new() -> (CancelHandle, CancelSignal) {
        let (tx, rx) = watch::channel(false);
        (CancelHandle(tx), CancelSignal(rx))
    }

    /// A signal that never fires.
    pub fn never() -> CancelSignal {
        let (_tx, rx) = watch::channel(false);
        CancelSignal(rx)
    }

    pub fn is_cancelled(&self) -> bool {
        *self.0.borrow()
    }

    /// Resolve once cancelled. Pends forever if the handle is dropped first.
    pub async fn cancelled(&self) {
        let mut rx = self.0.clone();
        let closed = rx.wait_for(|cancelled| *cancelled).await.is_err();
        if closed {
            std::future::pending::<()>().await;
        }
    }
}

/// Run a ceremony future under a timeout and a cancel signal.
pub async fn run_ceremony<T, F>(
    ceremony: F,
    limit: Duration,
    cancel: &CancelSignal,
) -> Result<T, AuthenticatorError>
where
    F: Future<Output = Result<T, AuthenticatorError>>,
{
    if cancel.is_cancelled() {
        metrics::record_ceremony("cancelled");
        return Err(AuthenticatorError::UserCancelled);
    }

    let result = tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(AuthenticatorError::UserCancelled),
        outcome = with_deadline(limit, ceremony) => match outcome {
            Ok(result) => result,
            Err(elapsed) => Err(AuthenticatorError::TimedOut(elapsed.0)),
        },
    };

    metrics::record_ceremony(match &result {
        Ok(_) => "completed",
        Err(AuthenticatorError::UserCancelled) => "cancelled",
        Err(AuthenticatorError::TimedOut(_)) => "timed_out",
        Err(_) => "failed",
    });
    result
}
