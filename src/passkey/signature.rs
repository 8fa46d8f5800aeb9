//! Signature blob encoding for the on-chain passkey verifier.
//!
//! Layout (version 1):
//!
//! ```text
//! len(authenticatorData) u32 BE | len(clientDataJSON) u32 BE | len(signature) u32 BE
//!   | authenticatorData | clientDataJSON | signature
//! ```
//!
//! `signature` is the raw authenticator output (DER for ES256, PKCS#1 v1.5
//! for RS256). The verifier re-derives the challenge from `clientDataJSON`.

use alloy::primitives::Bytes;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Largest blob the verifier accepts, header included.
pub const MAX_SIGNATURE_SIZE: usize = 16 * 1024;

const HEADER_LEN: usize = 12;
const CLIENT_DATA_TYPE_GET: &str = "webauthn.get";

/// rpIdHash (32) + flags (1) + signCount (4).
const AUTH_DATA_MIN_LEN: usize = 37;
const FLAG_USER_PRESENT: u8 = 0x01;

/// The three assertion components the verifier needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssertionFields {
    pub authenticator_data: Vec<u8>,
    pub client_data_json: Vec<u8>,
    pub signature: Vec<u8>,
}

/// An encoded signature, ready to be attached to an operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SignatureBlob(Bytes);

impl SignatureBlob {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_bytes(&self) -> Bytes {
        self.0.clone()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl AsRef<[u8]> for SignatureBlob {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("signature truncated: need {needed} bytes, have {available}")]
    TruncatedSignature { needed: usize, available: usize },

    #[error("signature length overflow: declared {declared} bytes, limit {limit}")]
    LengthOverflow { declared: u64, limit: usize },

    #[error("{0} trailing bytes after signature content")]
    TrailingBytes(usize),

    #[error("client data challenge does not match the expected challenge")]
    ChallengeMismatch,

    #[error("malformed client data: {0}")]
    MalformedClientData(String),

    #[error("malformed authenticator data: {0}")]
    MalformedAuthenticatorData(String),
}

/// Encoder and decoder for the versioned signature layout.
pub struct SignatureCodec;

impl SignatureCodec {
    /// Encode assertion components. Fails only if the result would exceed
    /// [`MAX_SIGNATURE_SIZE`].
    pub fn encode(fields: &AssertionFields) -> Result<SignatureBlob, SignatureError> {
        let lengths = [
            fields.authenticator_data.len(),
            fields.client_data_json.len(),
            fields.signature.len(),
        ];
        let declared = lengths.iter().map(|&l| l as u64).sum::<u64>() + HEADER_LEN as u64;
        if declared > MAX_SIGNATURE_SIZE as u64 {
            return Err(SignatureError::LengthOverflow {
                declared,
                limit: MAX_SIGNATURE_SIZE,
            });
        }

        Ok(write_blob(fields))
    }

    /// Decode a blob produced by [`encode`](Self::encode).
    pub fn decode(blob: &[u8]) -> Result<AssertionFields, SignatureError> {
        if blob.len() < HEADER_LEN {
            return Err(SignatureError::TruncatedSignature {
                needed: HEADER_LEN,
                available: blob.len(),
            });
        }

        let mut lengths = [0usize; 3];
        let mut declared: u64 = HEADER_LEN as u64;
        for (i, chunk) in blob[..HEADER_LEN].chunks_exact(4).enumerate() {
            let len = u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            lengths[i] = len as usize;
            declared = declared.checked_add(u64::from(len)).ok_or(SignatureError::LengthOverflow {
                declared: u64::MAX,
                limit: MAX_SIGNATURE_SIZE,
            })?;
        }

        if declared > MAX_SIGNATURE_SIZE as u64 {
            return Err(SignatureError::LengthOverflow {
                declared,
                limit: MAX_SIGNATURE_SIZE,
            });
        }
        let declared = declared as usize;
        if declared > blob.len() {
            return Err(SignatureError::TruncatedSignature {
                needed: declared,
                available: blob.len(),
            });
        }
        if declared < blob.len() {
            return Err(SignatureError::TrailingBytes(blob.len() - declared));
        }

        let mut offset = HEADER_LEN;
        let mut take = |len: usize| {
            let part = blob[offset..offset + len].to_vec();
            offset += len;
            part
        };
        Ok(AssertionFields {
            authenticator_data: take(lengths[0]),
            client_data_json: take(lengths[1]),
            signature: take(lengths[2]),
        })
    }

    /// A well-formed placeholder blob of realistic size, used where a
    /// signature must be present before the ceremony (sponsorship, gas
    /// estimation).
    pub fn dummy() -> SignatureBlob {
        let client_data = serde_json::json!({
            "type": CLIENT_DATA_TYPE_GET,
            "challenge": URL_SAFE_NO_PAD.encode([0u8; 32]),
            "origin": "https://localhost",
            "crossOrigin": false,
        });
        let mut authenticator_data = vec![0x49u8; 32];
        authenticator_data.extend_from_slice(&[0x05, 0, 0, 0, 1]);
        let fields = AssertionFields {
            authenticator_data,
            client_data_json: client_data.to_string().into_bytes(),
            signature: vec![0xFF; 72],
        };
        write_blob(&fields)
    }
}

// Callers guarantee every component fits in a u32.
fn write_blob(fields: &AssertionFields) -> SignatureBlob {
    let parts = [
        &fields.authenticator_data,
        &fields.client_data_json,
        &fields.signature,
    ];
    let mut out = Vec::with_capacity(HEADER_LEN + parts.iter().map(|p| p.len()).sum::<usize>());
    for part in parts {
        out.extend_from_slice(&(part.len() as u32).to_be_bytes());
    }
    for part in parts {
        out.extend_from_slice(part);
    }
    SignatureBlob(out.into())
}

#[derive(Deserialize)]
struct ClientData {
    #[serde(rename = "type")]
    kind: String,
    challenge: String,
}

/// Check that `clientDataJSON` is an assertion over `expected_challenge`.
pub fn verify_client_data(client_data_json: &[u8], expected_challenge: &[u8]) -> Result<(), SignatureError> {
    let client_data: ClientData = serde_json::from_slice(client_data_json)
        .map_err(|e| SignatureError::MalformedClientData(e.to_string()))?;

    if client_data.kind != CLIENT_DATA_TYPE_GET {
        return Err(SignatureError::MalformedClientData(format!(
            "unexpected type '{}'",
            client_data.kind
        )));
    }

    let challenge = URL_SAFE_NO_PAD
        .decode(client_data.challenge.trim_end_matches('='))
        .map_err(|e| SignatureError::MalformedClientData(format!("challenge: {}", e)))?;
    if challenge.as_slice() != expected_challenge {
        return Err(SignatureError::ChallengeMismatch);
    }
    Ok(())
}

/// Check that `authenticatorData` is long enough to carry its fixed header
/// and that the user was present for the assertion.
pub fn verify_authenticator_data(authenticator_data: &[u8]) -> Result<(), SignatureError> {
    if authenticator_data.len() < AUTH_DATA_MIN_LEN {
        return Err(SignatureError::MalformedAuthenticatorData(format!(
            "{} bytes, need at least {}",
            authenticator_data.len(),
            AUTH_DATA_MIN_LEN
        )));
    }
    if authenticator_data[32] & FLAG_USER_PRESENT == 0 {
        return Err(SignatureError::MalformedAuthenticatorData(
            "user presence flag not set".to_string(),
        ));
    }
    Ok(())
}
