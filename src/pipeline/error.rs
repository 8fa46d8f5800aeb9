//! Pipeline error taxonomy.

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::account::{DeriveError, DirectoryError, RegistrationError};
use crate::chain::ChainError;
use crate::passkey::{AttestationError, AuthenticatorError, SignatureError};
use crate::relay::{PollError, SubmitError};
use crate::sponsor::SponsorshipDenied;
use crate::userop::{BuildError, IntentError};

/// Broad failure class. Callers decide recovery from this alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Rejected before any I/O; never retried.
    Input,
    /// Malformed attestation or assertion; fatal to the attempt.
    Encoding,
    /// Unavailable or slow collaborator.
    Upstream,
    /// The relay refused the operation; rebuild before retrying.
    Relay,
    /// The user cancelled or did not respond.
    Interactive,
}

impl ErrorClass {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorClass::Input => "input",
            ErrorClass::Encoding => "encoding",
            ErrorClass::Upstream => "upstream",
            ErrorClass::Relay => "relay",
            ErrorClass::Interactive => "interactive",
        }
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid input: {0}")]
    Input(String),

    #[error("account not found: {0}")]
    AccountNotFound(String),

    #[error("no chain configured with id {0}")]
    UnknownChain(u64),

    #[error("account is on chain {actual}, request targets chain {expected}")]
    ChainMismatch { expected: u64, actual: u64 },

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Derive(#[from] DeriveError),

    #[error(transparent)]
    Signature(#[from] SignatureError),

    #[error(transparent)]
    Attestation(#[from] AttestationError),

    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error(transparent)]
    Directory(#[from] DirectoryError),

    #[error(transparent)]
    Sponsorship(#[from] SponsorshipDenied),

    #[error(transparent)]
    Submit(#[from] SubmitError),

    #[error(transparent)]
    Poll(#[from] PollError),

    #[error("ceremony cancelled by user")]
    UserCancelled,

    #[error("ceremony timed out after {0:?}")]
    CeremonyTimedOut(Duration),

    #[error("authenticator failed: {0}")]
    Authenticator(String),
}

impl PipelineError {
    pub fn class(&self) -> ErrorClass {
        match self {
            PipelineError::Input(_)
            | PipelineError::AccountNotFound(_)
            | PipelineError::UnknownChain(_)
            | PipelineError::ChainMismatch { .. }
            | PipelineError::Build(_) => ErrorClass::Input,

            PipelineError::Derive(_)
            | PipelineError::Signature(_)
            | PipelineError::Attestation(_) => ErrorClass::Encoding,

            PipelineError::Chain(ChainError::ChainMismatch { .. }) => ErrorClass::Input,
            PipelineError::Chain(_)
            | PipelineError::Directory(_)
            | PipelineError::Sponsorship(_) => ErrorClass::Upstream,

            PipelineError::Submit(SubmitError::Rejected(_)) => ErrorClass::Relay,
            PipelineError::Submit(_) => ErrorClass::Upstream,

            PipelineError::Poll(PollError::UnknownChain(_)) => ErrorClass::Input,
            PipelineError::Poll(_) => ErrorClass::Upstream,

            PipelineError::UserCancelled
            | PipelineError::CeremonyTimedOut(_)
            | PipelineError::Authenticator(_) => ErrorClass::Interactive,
        }
    }

    /// Safe to retry with backoff, without rebuilding.
    pub fn is_retryable(&self) -> bool {
        match self {
            PipelineError::Sponsorship(denied) => denied.is_retryable(),
            PipelineError::Submit(SubmitError::Rejected(_)) => false,
            PipelineError::Chain(ChainError::Rpc(_) | ChainError::Timeout(_)) => true,
            PipelineError::Submit(_) | PipelineError::Poll(_) => self.class() == ErrorClass::Upstream,
            _ => false,
        }
    }

    /// The relay refused the operation; a fresh build (nonce, sponsorship,
    /// signature) is required before retrying.
    pub fn requires_rebuild(&self) -> bool {
        self.class() == ErrorClass::Relay
    }

    /// Stable machine-readable code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            PipelineError::Input(_) => "invalid_input",
            PipelineError::AccountNotFound(_) => "account_not_found",
            PipelineError::UnknownChain(_) => "unknown_chain",
            PipelineError::ChainMismatch { .. } => "chain_mismatch",
            PipelineError::Build(BuildError::AccountNotReady(_)) => "account_not_ready",
            PipelineError::Build(_) => "invalid_input",
            PipelineError::Derive(_) => "invalid_public_key",
            PipelineError::Signature(SignatureError::ChallengeMismatch) => "challenge_mismatch",
            PipelineError::Signature(_) => "malformed_signature",
            PipelineError::Attestation(_) => "malformed_attestation",
            PipelineError::Chain(_) => "chain_unavailable",
            PipelineError::Directory(_) => "directory_unavailable",
            PipelineError::Sponsorship(denied) => denied.as_str(),
            PipelineError::Submit(SubmitError::Rejected(rejection)) => rejection.kind.as_str(),
            PipelineError::Submit(SubmitError::TimedOut(_)) => "relay_timed_out",
            PipelineError::Submit(SubmitError::Unavailable(_)) => "relay_unavailable",
            PipelineError::Poll(PollError::UnknownChain(_)) => "unknown_chain",
            PipelineError::Poll(_) => "relay_unavailable",
            PipelineError::UserCancelled => "user_cancelled",
            PipelineError::CeremonyTimedOut(_) => "ceremony_timed_out",
            PipelineError::Authenticator(_) => "authenticator_failed",
        }
    }
}

impl From<AuthenticatorError> for PipelineError {
    fn from(error: AuthenticatorError) -> Self {
        match error {
            AuthenticatorError::UserCancelled => PipelineError::UserCancelled,
            AuthenticatorError::TimedOut(limit) => PipelineError::CeremonyTimedOut(limit),
            other => PipelineError::Authenticator(other.to_string()),
        }
    }
}

impl From<IntentError> for PipelineError {
    fn from(error: IntentError) -> Self {
        PipelineError::Input(error.to_string())
    }
}

impl From<RegistrationError> for PipelineError {
    fn from(error: RegistrationError) -> Self {
        match error {
            RegistrationError::Attestation(e) => PipelineError::Attestation(e),
            RegistrationError::Derive(e) => PipelineError::Derive(e),
            RegistrationError::Directory(e) => PipelineError::Directory(e),
            RegistrationError::Authenticator(e) => e.into(),
            RegistrationError::AccountNotFound(identity) => PipelineError::AccountNotFound(identity),
            other => PipelineError::Input(other.to_string()),
        }
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;
