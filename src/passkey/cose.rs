//! Credential public-key extraction from WebAuthn attestation objects.
//!
//! The attestation object is a CBOR map `{fmt, attStmt, authData}`. The
//! credential public key lives inside `authData`:
//!
//! ```text
//! rpIdHash (32) | flags (1) | signCount (4 BE)
//!   | aaguid (16) | credIdLen (2 BE) | credId (credIdLen) | COSE_Key (CBOR) | extensions
//! ```

use std::io::Cursor;

use alloy::primitives::{Bytes, B256};
use ciborium::Value;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// COSE algorithm identifier for ECDSA P-256 with SHA-256.
pub const COSE_ALG_ES256: i64 = -7;
/// COSE algorithm identifier for RSASSA-PKCS1-v1_5 with SHA-256.
pub const COSE_ALG_RS256: i64 = -257;

const COSE_KEY_KTY: i64 = 1;
const COSE_KEY_ALG: i64 = 3;
const COSE_KTY_EC2: i64 = 2;
const COSE_KTY_RSA: i64 = 3;
const COSE_EC2_CRV: i64 = -1;
const COSE_EC2_X: i64 = -2;
const COSE_EC2_Y: i64 = -3;
const COSE_CRV_P256: i64 = 1;
const COSE_RSA_N: i64 = -1;
const COSE_RSA_E: i64 = -2;

const FLAG_ATTESTED_CREDENTIAL_DATA: u8 = 0x40;
const AUTH_DATA_HEADER_LEN: usize = 37;
const AAGUID_LEN: usize = 16;

/// Signature algorithms a passkey may be registered with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoseAlgorithm {
    Es256,
    Rs256,
}

impl CoseAlgorithm {
    /// Preference order offered to authenticators at registration.
    pub const PREFERRED: [CoseAlgorithm; 2] = [CoseAlgorithm::Es256, CoseAlgorithm::Rs256];

    pub fn id(self) -> i64 {
        match self {
            CoseAlgorithm::Es256 => COSE_ALG_ES256,
            CoseAlgorithm::Rs256 => COSE_ALG_RS256,
        }
    }
}

/// A decoded, algorithm-tagged credential public key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "alg", rename_all = "UPPERCASE")]
pub enum PublicKey {
    /// Uncompressed P-256 point.
    Es256 { x: B256, y: B256 },
    /// RSA modulus and public exponent, big-endian, as encoded by the authenticator.
    Rs256 { n: Bytes, e: Bytes },
}

impl PublicKey {
    pub fn algorithm(&self) -> CoseAlgorithm {
        match self {
            PublicKey::Es256 { .. } => CoseAlgorithm::Es256,
            PublicKey::Rs256 { .. } => CoseAlgorithm::Rs256,
        }
    }
}

/// Credential data recovered from a registration ceremony.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttestedCredential {
    pub credential_id: Vec<u8>,
    pub public_key: PublicKey,
    pub sign_count: u32,
    pub aaguid: [u8; AAGUID_LEN],
    pub format: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AttestationError {
    #[error("malformed attestation: {0}")]
    MalformedAttestation(String),

    #[error("unsupported credential algorithm: {0}")]
    UnsupportedAlgorithm(String),
}

fn malformed(msg: impl Into<String>) -> AttestationError {
    AttestationError::MalformedAttestation(msg.into())
}

/// Extract the credential public key from a CBOR attestation object.
pub fn extract_public_key(attestation_object: &[u8]) -> Result<PublicKey, AttestationError> {
    parse_attestation(attestation_object).map(|c| c.public_key)
}

/// Parse a CBOR attestation object into its attested credential.
pub fn parse_attestation(attestation_object: &[u8]) -> Result<AttestedCredential, AttestationError> {
    let root: Value = ciborium::de::from_reader(attestation_object)
        .map_err(|e| malformed(format!("attestation object is not CBOR: {}", e)))?;
    let entries = root
        .as_map()
        .ok_or_else(|| malformed("attestation object is not a map"))?;

    let format = text_entry(entries, "fmt")
        .ok_or_else(|| malformed("missing fmt"))?
        .to_string();
    let auth_data = entries
        .iter()
        .find(|(k, _)| k.as_text() == Some("authData"))
        .and_then(|(_, v)| v.as_bytes())
        .ok_or_else(|| malformed("missing authData"))?;

    let mut credential = parse_authenticator_data(auth_data)?;
    credential.format = format;
    Ok(credential)
}

fn text_entry<'a>(entries: &'a [(Value, Value)], key: &str) -> Option<&'a str> {
    entries
        .iter()
        .find(|(k, _)| k.as_text() == Some(key))
        .and_then(|(_, v)| v.as_text())
}

fn parse_authenticator_data(auth_data: &[u8]) -> Result<AttestedCredential, AttestationError> {
    if auth_data.len() < AUTH_DATA_HEADER_LEN {
        return Err(malformed(format!(
            "authData is {} bytes, need at least {}",
            auth_data.len(),
            AUTH_DATA_HEADER_LEN
        )));
    }

    let flags = auth_data[32];
    if flags & FLAG_ATTESTED_CREDENTIAL_DATA == 0 {
        return Err(malformed("authData carries no attested credential data"));
    }
    let sign_count = u32::from_be_bytes([auth_data[33], auth_data[34], auth_data[35], auth_data[36]]);

    let rest = &auth_data[AUTH_DATA_HEADER_LEN..];
    if rest.len() < AAGUID_LEN + 2 {
        return Err(malformed("attested credential data truncated"));
    }
    let mut aaguid = [0u8; AAGUID_LEN];
    aaguid.copy_from_slice(&rest[..AAGUID_LEN]);

    let id_len = u16::from_be_bytes([rest[AAGUID_LEN], rest[AAGUID_LEN + 1]]) as usize;
    let id_start = AAGUID_LEN + 2;
    let key_start = id_start + id_len;
    if id_len == 0 || rest.len() <= key_start {
        return Err(malformed("credential id or public key truncated"));
    }
    let credential_id = rest[id_start..key_start].to_vec();

    // Extensions may follow the key; the reader stops after one CBOR item.
    let mut cursor = Cursor::new(&rest[key_start..]);
    let cose_key: Value = ciborium::de::from_reader(&mut cursor)
        .map_err(|e| malformed(format!("credential public key is not CBOR: {}", e)))?;

    Ok(AttestedCredential {
        credential_id,
        public_key: decode_cose_key(&cose_key)?,
        sign_count,
        aaguid,
        format: String::new(),
    })
}

fn int_entry(entries: &[(Value, Value)], key: i64) -> Option<&Value> {
    entries
        .iter()
        .find(|(k, _)| k.as_integer().map(i128::from) == Some(key as i128))
        .map(|(_, v)| v)
}

fn int_value(entries: &[(Value, Value)], key: i64, name: &str) -> Result<i64, AttestationError> {
    int_entry(entries, key)
        .and_then(Value::as_integer)
        .and_then(|i| i64::try_from(i128::from(i)).ok())
        .ok_or_else(|| malformed(format!("COSE key missing integer {}", name)))
}

fn bytes_value<'a>(
    entries: &'a [(Value, Value)],
    key: i64,
    name: &str,
) -> Result<&'a [u8], AttestationError> {
    int_entry(entries, key)
        .and_then(Value::as_bytes)
        .map(Vec::as_slice)
        .ok_or_else(|| malformed(format!("COSE key missing byte string {}", name)))
}

/// Decode a COSE_Key map into a [`PublicKey`].
pub fn decode_cose_key(key: &Value) -> Result<PublicKey, AttestationError> {
    let entries = key.as_map().ok_or_else(|| malformed("COSE key is not a map"))?;

    let kty = int_value(entries, COSE_KEY_KTY, "kty")?;
    let alg = int_value(entries, COSE_KEY_ALG, "alg")?;

    match (alg, kty) {
        (COSE_ALG_ES256, COSE_KTY_EC2) => {
            let crv = int_value(entries, COSE_EC2_CRV, "crv")?;
            if crv != COSE_CRV_P256 {
                return Err(AttestationError::UnsupportedAlgorithm(format!(
                    "ES256 on curve {}",
                    crv
                )));
            }
            let x = bytes_value(entries, COSE_EC2_X, "x")?;
            let y = bytes_value(entries, COSE_EC2_Y, "y")?;
            if x.len() != 32 || y.len() != 32 {
                return Err(malformed("P-256 coordinates must be 32 bytes"));
            }
            Ok(PublicKey::Es256 {
                x: B256::from_slice(x),
                y: B256::from_slice(y),
            })
        }
        (COSE_ALG_RS256, COSE_KTY_RSA) => {
            let n = bytes_value(entries, COSE_RSA_N, "n")?;
            let e = bytes_value(entries, COSE_RSA_E, "e")?;
            if n.is_empty() || e.is_empty() {
                return Err(malformed("RSA modulus and exponent must be non-empty"));
            }
            Ok(PublicKey::Rs256 {
                n: Bytes::copy_from_slice(n),
                e: Bytes::copy_from_slice(e),
            })
        }
        (COSE_ALG_ES256, _) | (COSE_ALG_RS256, _) => {
            Err(malformed(format!("algorithm {} paired with key type {}", alg, kty)))
        }
        _ => Err(AttestationError::UnsupportedAlgorithm(format!(
            "COSE algorithm {} (key type {})",
            alg, kty
        ))),
    }
}
