//! Transaction pipeline.
//!
//! # Responsibilities
//! - Drive intent → build → sponsor → sign → submit under the account lock
//! - Split at the ceremony so a remote client can sign between `prepare` and `complete`
//! - Rebuild after relay rejections that a fresh nonce or sponsorship can fix
//! - Sign EIP-191 messages and check assertions against an account's credentials
//!
//! # Design Decisions
//! - The account lock lives inside `PreparedOperation`; dropping it releases the account
//! - The assertion's client data is checked against the operation hash before submit
//! - Submit timeouts resend the same signed operation, which the submitter deduplicates
//! - An operation whose submit outcome is still unknown is never rebuilt: the
//!   relay may already hold it, and a rebuild would run the intent twice

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{eip191_hash_message, Address, Bytes, B256, U256};
use arc_swap::ArcSwap;
use serde::Serialize;

use crate::account::{Account, AccountDirectory, AccountRegistrar, Registration};
use crate::passkey::{
    run_ceremony, verify_authenticator_data, verify_client_data, AssertionResult, Authenticator,
    CancelSignal, CredentialId, SignatureCodec, SignatureError,
};
use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::locks::{AccountGuard, AccountLocks};
use crate::pipeline::registry::{ChainContext, ChainRegistry};
use crate::relay::{GasEstimate, OperationHandle, OperationReceipt, RejectionKind, SubmitError};
use crate::resilience::backoff::Backoff;
use crate::sponsor::{SponsorshipPolicy, StatsSnapshot};
use crate::userop::{GasPolicy, TransactionIntent, UnsignedOperation};

/// One intent to execute from an account.
#[derive(Debug, Clone)]
pub struct SendRequest {
    pub identity: String,
    pub chain_id: u64,
    pub intent: TransactionIntent,
    pub gas: GasPolicy,
    /// `None` uses the chain's default.
    pub sponsorship: Option<SponsorshipPolicy>,
    /// Credential to sign with; the owner credential when `None`.
    pub credential_id: Option<CredentialId>,
}

impl SendRequest {
    pub fn new(identity: impl Into<String>, chain_id: u64, intent: TransactionIntent) -> Self {
        Self {
            identity: identity.into(),
            chain_id,
            intent,
            gas: GasPolicy::default(),
            sponsorship: None,
            credential_id: None,
        }
    }
}

/// A built, sponsored operation waiting for its signature.
///
/// Holds the account lock until completed or dropped.
pub struct PreparedOperation {
    pub operation: UnsignedOperation,
    /// The WebAuthn challenge.
    pub hash: B256,
    pub chain_id: u64,
    pub identity: String,
    pub credential_id: CredentialId,
    pub ceremony_timeout: Duration,
    context: Arc<ChainContext>,
    retries: Backoff,
    max_attempts: u32,
    _guard: AccountGuard,
}

impl std::fmt::Debug for PreparedOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreparedOperation")
            .field("hash", &self.hash)
            .field("chain_id", &self.chain_id)
            .field("identity", &self.identity)
            .field("sender", &self.operation.sender)
            .field("nonce", &self.operation.nonce)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendOutcome {
    pub handle: OperationHandle,
    pub nonce: U256,
    pub sponsored: bool,
    /// Build attempts, including rebuilds after rejection.
    pub attempts: u32,
}

/// A passkey signature over an EIP-191 message, in the verifier's layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageSignature {
    pub address: Address,
    pub chain_id: u64,
    /// `eip191_hash_message(message)`; the WebAuthn challenge.
    pub hash: B256,
    pub credential_id: CredentialId,
    pub signature: Bytes,
}

/// Whether an assertion was produced by one of an account's credentials
/// over the expected challenge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PasskeyCheck {
    pub valid: bool,
    pub address: Address,
    pub credential_id: CredentialId,
    /// Error code when `valid` is false.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'static str>,
}

/// Sponsorship counters for one chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainSponsorshipStats {
    pub chain_id: u64,
    #[serde(flatten)]
    pub stats: StatsSnapshot,
}

/// Entry point for account registration and operation submission.
pub struct TransactionPipeline {
    directory: Arc<dyn AccountDirectory>,
    registrar: AccountRegistrar,
    registry: Arc<ArcSwap<ChainRegistry>>,
    locks: AccountLocks,
}

impl TransactionPipeline {
    pub fn new(directory: Arc<dyn AccountDirectory>, registry: Arc<ArcSwap<ChainRegistry>>) -> Self {
        Self {
            registrar: AccountRegistrar::new(directory.clone()),
            directory,
            registry,
            locks: AccountLocks::new(),
        }
    }

    pub fn registry(&self) -> Arc<ChainRegistry> {
        self.registry.load_full()
    }

    fn chain(&self, chain_id: u64) -> PipelineResult<Arc<ChainContext>> {
        self.registry
            .load()
            .chain(chain_id)
            .ok_or(PipelineError::UnknownChain(chain_id))
    }

    pub async fn account(&self, identity: &str) -> PipelineResult<Account> {
        self.directory
            .get(identity)
            .await?
            .ok_or_else(|| PipelineError::AccountNotFound(identity.to_string()))
    }

    pub async fn accounts(&self) -> PipelineResult<Vec<Account>> {
        Ok(self.directory.list().await?)
    }

    /// Register `identity` on `chain_id` from a client-side attestation.
    pub async fn register(
        &self,
        identity: &str,
        chain_id: u64,
        credential_id: CredentialId,
        attestation_object: &[u8],
    ) -> PipelineResult<Registration> {
        let context = self.chain(chain_id)?;
        Ok(self
            .registrar
            .register(identity, chain_id, &context.deriver, credential_id, attestation_object)
            .await?)
    }

    /// Register `identity` by running a create ceremony on `authenticator`.
    pub async fn register_with_authenticator(
        &self,
        identity: &str,
        chain_id: u64,
        authenticator: &dyn Authenticator,
        cancel: &CancelSignal,
    ) -> PipelineResult<Registration> {
        let context = self.chain(chain_id)?;
        let timeout = self.registry.load().ceremony_timeout();
        Ok(self
            .registrar
            .register_with_authenticator(identity, chain_id, &context.deriver, authenticator, timeout, cancel)
            .await?)
    }

    pub async fn add_credential(
        &self,
        identity: &str,
        credential_id: CredentialId,
        attestation_object: &[u8],
    ) -> PipelineResult<Account> {
        Ok(self
            .registrar
            .add_credential(identity, credential_id, attestation_object)
            .await?)
    }

    /// Build and sponsor an operation, taking the account lock.
    pub async fn prepare(&self, request: &SendRequest) -> PipelineResult<PreparedOperation> {
        let registry = self.registry.load_full();
        let context = registry
            .chain(request.chain_id)
            .ok_or(PipelineError::UnknownChain(request.chain_id))?;

        let account = self.account(&request.identity).await?;
        if account.chain_id != request.chain_id {
            return Err(PipelineError::ChainMismatch {
                expected: request.chain_id,
                actual: account.chain_id,
            });
        }
        let credential_id = signing_credential(&account, request.credential_id.as_ref())?;

        let guard = self.locks.acquire(account.address).await;

        let state = context.account_state(&account).await?;
        let mut operation = registry.builder().build(&state, &request.intent, &request.gas)?;

        if registry.builder().defaults().estimate {
            let estimate = context.submitter.estimate_gas(&operation).await?;
            operation = apply_estimate(operation, &estimate, &request.gas);
        }

        let policy = request
            .sponsorship
            .clone()
            .unwrap_or_else(|| context.default_sponsorship());
        let operation = context.sponsorship.sponsor(operation, &policy).await?;
        let hash = operation.hash(context.config.entry_point, context.chain_id());

        tracing::debug!(
            identity = %account.identity,
            chain_id = context.chain_id(),
            nonce = %operation.nonce,
            %hash,
            "Operation prepared"
        );

        Ok(PreparedOperation {
            operation,
            hash,
            chain_id: context.chain_id(),
            identity: account.identity,
            credential_id,
            ceremony_timeout: registry.ceremony_timeout(),
            context,
            retries: Backoff::from(registry.retries()),
            max_attempts: registry.retries().max_attempts.max(1),
            _guard: guard,
        })
    }

    /// Attach the assertion and submit. Consumes `prepared`, releasing the lock.
    pub async fn complete(
        &self,
        prepared: PreparedOperation,
        assertion: AssertionResult,
    ) -> PipelineResult<SendOutcome> {
        if assertion.credential_id != prepared.credential_id {
            return Err(PipelineError::Input(format!(
                "assertion is from credential {}, expected {}",
                assertion.credential_id, prepared.credential_id
            )));
        }
        verify_client_data(&assertion.client_data_json, prepared.hash.as_slice())?;
        verify_authenticator_data(&assertion.authenticator_data)?;
        let signature = SignatureCodec::encode(&assertion.into_fields())?;

        let sponsored = prepared.operation.sponsorship.is_some();
        let nonce = prepared.operation.nonce;
        let signed = prepared.operation.clone().sign(signature);
        let submitter = &prepared.context.submitter;

        let mut attempt = 1;
        let handle = loop {
            match submitter.submit(&signed).await {
                Ok(handle) => break handle,
                Err(e @ (SubmitError::TimedOut(_) | SubmitError::Unavailable(_)))
                    if attempt < prepared.max_attempts =>
                {
                    tracing::warn!(hash = %prepared.hash, attempt, error = %e, "Resubmitting signed operation");
                    tokio::time::sleep(prepared.retries.delay(attempt)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        };

        Ok(SendOutcome {
            handle,
            nonce,
            sponsored,
            attempts: 1,
        })
    }

    /// Prepare, run the signing ceremony, then complete.
    pub async fn send(
        &self,
        request: &SendRequest,
        authenticator: &dyn Authenticator,
        cancel: &CancelSignal,
    ) -> PipelineResult<SendOutcome> {
        let prepared = self.prepare(request).await?;
        let assertion = run_ceremony(
            authenticator.get_assertion(&prepared.credential_id, prepared.hash.as_slice()),
            prepared.ceremony_timeout,
            cancel,
        )
        .await?;
        self.complete(prepared, assertion).await
    }

    /// `send`, rebuilding after nonce conflicts, sponsorship shortfalls and
    /// transient failures before submit. A submit that ends without an answer
    /// is returned as is; poll the operation hash to learn its fate.
    pub async fn send_with_rebuild(
        &self,
        request: &SendRequest,
        authenticator: &dyn Authenticator,
        cancel: &CancelSignal,
    ) -> PipelineResult<SendOutcome> {
        let registry = self.registry.load_full();
        let backoff = Backoff::from(registry.retries());
        let max_attempts = registry.retries().max_attempts.max(1);

        let mut attempt = 1;
        loop {
            match self.send(request, authenticator, cancel).await {
                Ok(mut outcome) => {
                    outcome.attempts = attempt;
                    return Ok(outcome);
                }
                Err(e) if attempt < max_attempts && should_rebuild(&e) => {
                    tracing::info!(
                        identity = %request.identity,
                        attempt,
                        code = e.code(),
                        "Rebuilding operation"
                    );
                    tokio::time::sleep(backoff.delay(attempt)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Encode an assertion over the EIP-191 hash of `message`.
    pub async fn message_signature(
        &self,
        identity: &str,
        message: &[u8],
        assertion: AssertionResult,
    ) -> PipelineResult<MessageSignature> {
        let account = self.account(identity).await?;
        if !account.has_credential(&assertion.credential_id) {
            return Err(PipelineError::Input(format!(
                "credential {} is not bound to {}",
                assertion.credential_id, account.identity
            )));
        }
        let hash = eip191_hash_message(message);
        verify_client_data(&assertion.client_data_json, hash.as_slice())?;
        verify_authenticator_data(&assertion.authenticator_data)?;

        let credential_id = assertion.credential_id.clone();
        let signature = SignatureCodec::encode(&assertion.into_fields())?;
        tracing::info!(identity = %account.identity, %hash, "Message signed");
        Ok(MessageSignature {
            address: account.address,
            chain_id: account.chain_id,
            hash,
            credential_id,
            signature: signature.to_bytes(),
        })
    }

    /// Run a signing ceremony over `message` and encode the result.
    pub async fn sign_message(
        &self,
        identity: &str,
        message: &[u8],
        credential_id: Option<&CredentialId>,
        authenticator: &dyn Authenticator,
        cancel: &CancelSignal,
    ) -> PipelineResult<MessageSignature> {
        let account = self.account(identity).await?;
        let credential_id = signing_credential(&account, credential_id)?;
        let hash = eip191_hash_message(message);
        let timeout = self.registry.load().ceremony_timeout();

        let assertion = run_ceremony(
            authenticator.get_assertion(&credential_id, hash.as_slice()),
            timeout,
            cancel,
        )
        .await?;
        if assertion.credential_id != credential_id {
            return Err(PipelineError::Input(format!(
                "assertion is from credential {}, expected {}",
                assertion.credential_id, credential_id
            )));
        }
        self.message_signature(identity, message, assertion).await
    }

    /// Check that `assertion` comes from a credential bound to `identity`
    /// and answers `challenge`. The signature itself is checked on chain.
    pub async fn verify_passkey(
        &self,
        identity: &str,
        challenge: &[u8],
        assertion: &AssertionResult,
    ) -> PipelineResult<PasskeyCheck> {
        let account = self.account(identity).await?;
        let reason = if !account.has_credential(&assertion.credential_id) {
            Some("credential_not_bound")
        } else {
            check_assertion(assertion, challenge)
                .err()
                .map(|e| PipelineError::Signature(e).code())
        };

        tracing::info!(
            identity = %account.identity,
            valid = reason.is_none(),
            reason = reason.unwrap_or("none"),
            "Passkey verified"
        );
        Ok(PasskeyCheck {
            valid: reason.is_none(),
            address: account.address,
            credential_id: assertion.credential_id.clone(),
            reason,
        })
    }

    /// Sponsorship counters per configured chain, ordered by chain id.
    pub fn sponsorship_stats(&self) -> Vec<ChainSponsorshipStats> {
        self.registry
            .load()
            .chains()
            .iter()
            .map(|context| ChainSponsorshipStats {
                chain_id: context.chain_id(),
                stats: context.sponsorship.stats().snapshot(),
            })
            .collect()
    }

    pub async fn poll(&self, handle: &OperationHandle) -> PipelineResult<OperationReceipt> {
        let context = self.chain(handle.chain_id)?;
        Ok(context.submitter.poll(handle).await?)
    }

    /// Poll until terminal, using the configured backoff.
    pub async fn await_receipt(
        &self,
        handle: &OperationHandle,
        max_polls: u32,
    ) -> PipelineResult<OperationReceipt> {
        let context = self.chain(handle.chain_id)?;
        let backoff = Backoff::from(self.registry.load().retries());
        Ok(context.submitter.await_receipt(handle, backoff, max_polls).await?)
    }

    /// Relay gas estimate for an intent, without taking the account lock.
    pub async fn estimate(
        &self,
        identity: &str,
        chain_id: u64,
        intent: &TransactionIntent,
        gas: &GasPolicy,
    ) -> PipelineResult<GasEstimate> {
        let registry = self.registry.load_full();
        let context = registry
            .chain(chain_id)
            .ok_or(PipelineError::UnknownChain(chain_id))?;
        let account = self.account(identity).await?;
        let state = context.account_state(&account).await?;
        let operation = registry.builder().build(&state, intent, gas)?;
        Ok(context.submitter.estimate_gas(&operation).await?)
    }
}

/// The requested credential if bound to `account`, else the owner credential.
fn signing_credential(account: &Account, requested: Option<&CredentialId>) -> PipelineResult<CredentialId> {
    match requested {
        Some(id) if account.has_credential(id) => Ok(id.clone()),
        Some(id) => Err(PipelineError::Input(format!(
            "credential {} is not bound to {}",
            id, account.identity
        ))),
        None => account
            .owner()
            .map(|c| c.credential_id.clone())
            .ok_or_else(|| PipelineError::Input(format!("account {} has no credentials", account.identity))),
    }
}

fn check_assertion(assertion: &AssertionResult, challenge: &[u8]) -> Result<(), SignatureError> {
    verify_client_data(&assertion.client_data_json, challenge)?;
    verify_authenticator_data(&assertion.authenticator_data)?;
    if assertion.signature.is_empty() {
        return Err(SignatureError::TruncatedSignature {
            needed: 1,
            available: 0,
        });
    }
    Ok(())
}

fn should_rebuild(error: &PipelineError) -> bool {
    match error {
        PipelineError::Submit(SubmitError::Rejected(rejection)) => matches!(
            rejection.kind,
            RejectionKind::NonceConflict | RejectionKind::InsufficientSponsorship
        ),
        // Signed and sent, outcome unknown.
        PipelineError::Submit(_) => false,
        other => other.is_retryable(),
    }
}

/// Fill gas fields the policy left unset from a relay estimate.
fn apply_estimate(op: UnsignedOperation, estimate: &GasEstimate, policy: &GasPolicy) -> UnsignedOperation {
    let gas = |v: U256| v.saturating_to::<u128>();
    UnsignedOperation {
        call_gas_limit: policy
            .call_gas_limit
            .unwrap_or_else(|| gas(estimate.call_gas_limit)),
        verification_gas_limit: policy
            .verification_gas_limit
            .unwrap_or_else(|| gas(estimate.verification_gas_limit)),
        pre_verification_gas: policy
            .pre_verification_gas
            .unwrap_or_else(|| gas(estimate.pre_verification_gas)),
        paymaster_verification_gas_limit: policy.paymaster_verification_gas_limit.unwrap_or(
            estimate
                .paymaster_verification_gas_limit
                .map(gas)
                .unwrap_or(op.paymaster_verification_gas_limit),
        ),
        paymaster_post_op_gas_limit: policy.paymaster_post_op_gas_limit.unwrap_or(
            estimate
                .paymaster_post_op_gas_limit
                .map(gas)
                .unwrap_or(op.paymaster_post_op_gas_limit),
        ),
        ..op
    }
}
