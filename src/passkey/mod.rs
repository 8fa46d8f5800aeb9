//! Passkey subsystem.
//!
//! # Data Flow
//! ```text
//! Registration:
//!     Authenticator::create_credential → attestation object (CBOR)
//!     → cose.rs (authData → COSE_Key → PublicKey)
//!
//! Signing:
//!     operation hash as challenge → Authenticator::get_assertion (bounded, cancellable)
//!     → signature.rs (verify clientDataJSON, encode verifier blob)
//! ```
//!
//! # Design Decisions
//! - Only ES256 and RS256 credentials are accepted
//! - The blob layout is versioned; decoding is strict about length and trailing bytes
//! - Key material and assertions are never logged

pub mod authenticator;
pub mod cose;
pub mod signature;

pub use authenticator::{
    run_ceremony, AssertionResult, AttestationResult, Authenticator, AuthenticatorError,
    CancelHandle, CancelSignal, CredentialId,
};
pub use cose::{extract_public_key, parse_attestation, AttestationError, CoseAlgorithm, PublicKey};
pub use signature::{
    verify_authenticator_data, verify_client_data, AssertionFields, SignatureBlob, SignatureCodec,
    SignatureError,
};
