//! Account creation and credential binding.
//!
//! # Responsibilities
//! - Turn a registration ceremony into an Account with a derived address
//! - Return an existing account unchanged when the identity is already known
//! - Bind additional credentials without touching the address

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Mutex;

use crate::account::address::{AddressDeriver, DeriveError};
use crate::account::directory::{AccountDirectory, DirectoryError};
use crate::account::types::{unix_now, Account, Credential};
use crate::passkey::{
    parse_attestation, run_ceremony, AttestationError, Authenticator, AuthenticatorError,
    CancelSignal, CoseAlgorithm, CredentialId,
};

#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error(transparent)]
    Attestation(#[from] AttestationError),

    #[error(transparent)]
    Derive(#[from] DeriveError),

    #[error(transparent)]
    Directory(#[from] DirectoryError),

    #[error(transparent)]
    Authenticator(#[from] AuthenticatorError),

    #[error("account not found: {0}")]
    AccountNotFound(String),

    #[error("credential {0} is already bound to this account")]
    DuplicateCredential(CredentialId),

    #[error("credential id does not match the attested credential")]
    CredentialMismatch,
}

/// Result of a registration attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub account: Account,
    /// The identity was already registered; `account` is the stored one.
    pub exists: bool,
}

/// Creates accounts and binds credentials.
pub struct AccountRegistrar {
    directory: Arc<dyn AccountDirectory>,
    // Serializes read-check-write on the directory.
    write_lock: Mutex<()>,
}

impl AccountRegistrar {
    pub fn new(directory: Arc<dyn AccountDirectory>) -> Self {
        Self {
            directory,
            write_lock: Mutex::new(()),
        }
    }

    /// Register `identity` from a client-side attestation.
    pub async fn register(
        &self,
        identity: &str,
        chain_id: u64,
        deriver: &AddressDeriver,
        credential_id: CredentialId,
        attestation_object: &[u8],
    ) -> Result<Registration, RegistrationError> {
        let _guard = self.write_lock.lock().await;

        if let Some(account) = self.directory.get(identity).await? {
            tracing::debug!(identity, address = %account.address, "Account already registered");
            return Ok(Registration {
                account,
                exists: true,
            });
        }

        let credential = attested_credential(credential_id, attestation_object)?;
        let address = deriver.derive(&credential.public_key, chain_id)?;
        let account = Account::new(identity.to_string(), chain_id, address, credential);
        self.directory.put(account.clone()).await?;

        tracing::info!(identity, chain_id, %address, "Account registered");
        Ok(Registration {
            account,
            exists: false,
        })
    }

    /// Register `identity` by running a create ceremony on `authenticator`.
    pub async fn register_with_authenticator(
        &self,
        identity: &str,
        chain_id: u64,
        deriver: &AddressDeriver,
        authenticator: &dyn Authenticator,
        ceremony_timeout: Duration,
        cancel: &CancelSignal,
    ) -> Result<Registration, RegistrationError> {
        if let Some(account) = self.directory.get(identity).await? {
            return Ok(Registration {
                account,
                exists: true,
            });
        }

        let challenge: [u8; 32] = rand::random();
        let attestation = run_ceremony(
            authenticator.create_credential(identity, &challenge, &CoseAlgorithm::PREFERRED),
            ceremony_timeout,
            cancel,
        )
        .await?;

        self.register(
            identity,
            chain_id,
            deriver,
            attestation.credential_id,
            &attestation.attestation_object,
        )
        .await
    }

    /// Bind an additional credential to an existing account.
    pub async fn add_credential(
        &self,
        identity: &str,
        credential_id: CredentialId,
        attestation_object: &[u8],
    ) -> Result<Account, RegistrationError> {
        let _guard = self.write_lock.lock().await;

        let mut account = self
            .directory
            .get(identity)
            .await?
            .ok_or_else(|| RegistrationError::AccountNotFound(identity.to_string()))?;

        if account.has_credential(&credential_id) {
            return Err(RegistrationError::DuplicateCredential(credential_id));
        }

        let credential = attested_credential(credential_id, attestation_object)?;
        account.credentials.push(credential);
        self.directory.put(account.clone()).await?;

        tracing::info!(
            identity,
            credentials = account.credentials.len(),
            "Credential bound to account"
        );
        Ok(account)
    }
}

fn attested_credential(
    credential_id: CredentialId,
    attestation_object: &[u8],
) -> Result<Credential, RegistrationError> {
    let attested = parse_attestation(attestation_object)?;
    if attested.credential_id != credential_id.as_bytes() {
        return Err(RegistrationError::CredentialMismatch);
    }
    Ok(Credential {
        credential_id,
        public_key: attested.public_key,
        bound_at: unix_now(),
    })
}
