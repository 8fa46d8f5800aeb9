//! End-to-end pipeline tests against in-process fakes.

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{eip191_hash_message, U256};

use passkey_wallet::account::AddressDeriver;
use passkey_wallet::passkey::{parse_attestation, CancelSignal, SignatureCodec, SignatureError};
use passkey_wallet::pipeline::{PipelineError, SendRequest};
use passkey_wallet::relay::{FailureReason, OperationState};
use passkey_wallet::sponsor::{SponsorshipDenied, SponsorshipPolicy};
use passkey_wallet::userop::TransactionIntent;

mod common;
use common::{AssertionMode, FakeAuthenticator, Harness, SponsorMode, CHAIN_ID, PAYMASTER};

fn transfer(identity: &str) -> SendRequest {
    let intent = TransactionIntent::parse("0x000000000000000000000000000000000000dEaD", "1000", "0x")
        .unwrap();
    SendRequest::new(identity, CHAIN_ID, intent)
}

#[tokio::test]
async fn test_registration_derives_counterfactual_address() {
    let harness = Harness::new();
    let alice = FakeAuthenticator::new(1);

    let address = harness.register("alice", &alice).await;

    let key = parse_attestation(&alice.attestation()).unwrap().public_key;
    let deriver = AddressDeriver::from_chain(&common::chain_config());
    assert_eq!(address, deriver.derive(&key, CHAIN_ID).unwrap());
    assert_ne!(address, deriver.derive(&key, 1).unwrap());

    // Registering again returns the stored account.
    let again = harness
        .pipeline
        .register("alice", CHAIN_ID, alice.credential_id.clone(), &alice.attestation())
        .await
        .unwrap();
    assert!(again.exists);
    assert_eq!(again.account.address, address);
}

#[tokio::test]
async fn test_register_with_authenticator() {
    let harness = Harness::new();
    let bob = FakeAuthenticator::new(2);

    let registration = harness
        .pipeline
        .register_with_authenticator("bob", CHAIN_ID, &bob, &CancelSignal::never())
        .await
        .unwrap();

    assert!(!registration.exists);
    assert_eq!(registration.account.credentials.len(), 1);
    assert_eq!(registration.account.credentials[0].credential_id, bob.credential_id);
}

#[tokio::test]
async fn test_undeployed_account_builds_init_code() {
    let harness = Harness::new();
    let alice = FakeAuthenticator::new(1);
    let address = harness.register("alice", &alice).await;

    let prepared = harness.pipeline.prepare(&transfer("alice")).await.unwrap();
    assert_eq!(prepared.operation.sender, address);
    assert_eq!(prepared.operation.nonce, U256::ZERO);
    assert_eq!(
        &prepared.operation.init_code[..20],
        common::chain_config().factory.as_slice()
    );
    assert!(prepared.operation.sponsorship.is_none());
}

#[tokio::test]
async fn test_send_until_included() {
    let harness = Harness::new();
    let alice = FakeAuthenticator::new(1);
    harness.register("alice", &alice).await;

    let outcome = harness
        .pipeline
        .send_with_rebuild(&transfer("alice"), &alice, &CancelSignal::never())
        .await
        .unwrap();
    assert_eq!(outcome.nonce, U256::ZERO);
    assert_eq!(outcome.attempts, 1);
    assert!(!outcome.sponsored);

    let receipt = harness.pipeline.await_receipt(&outcome.handle, 20).await.unwrap();
    assert_eq!(receipt.state, OperationState::Included);
    assert_eq!(receipt.block_number, Some(1));
    assert!(receipt.transaction_hash.is_some());

    // Once deployed, the next operation carries no init-code.
    let next = harness.pipeline.prepare(&transfer("alice")).await.unwrap();
    assert_eq!(next.operation.nonce, U256::from(1));
    assert!(next.operation.init_code.is_empty());
}

#[tokio::test]
async fn test_terminal_receipt_is_cached() {
    let harness = Harness::new();
    let alice = FakeAuthenticator::new(1);
    harness.register("alice", &alice).await;

    let outcome = harness
        .pipeline
        .send(&transfer("alice"), &alice, &CancelSignal::never())
        .await
        .unwrap();
    let first = harness.pipeline.await_receipt(&outcome.handle, 20).await.unwrap();
    assert!(first.is_terminal());

    let polls = harness.relay.receipt_poll_count();
    let second = harness.pipeline.poll(&outcome.handle).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(harness.relay.receipt_poll_count(), polls);
}

#[tokio::test]
async fn test_on_chain_revert_is_failed() {
    let harness = Harness::new();
    let alice = FakeAuthenticator::new(1);
    harness.register("alice", &alice).await;
    harness.relay.revert_on_chain();

    let outcome = harness
        .pipeline
        .send(&transfer("alice"), &alice, &CancelSignal::never())
        .await
        .unwrap();
    let receipt = harness.pipeline.await_receipt(&outcome.handle, 20).await.unwrap();

    assert_eq!(receipt.state, OperationState::Failed);
    assert_eq!(
        receipt.failure,
        Some(FailureReason::OnChainRevert {
            reason: Some("execution reverted".to_string())
        })
    );
}

#[tokio::test]
async fn test_sponsorship_limit_stops_before_signing() {
    let harness = Harness::sponsored(SponsorMode::LimitExceeded);
    let alice = FakeAuthenticator::new(1);
    harness.register("alice", &alice).await;

    let result = harness
        .pipeline
        .send_with_rebuild(&transfer("alice"), &alice, &CancelSignal::never())
        .await;

    assert!(matches!(
        result,
        Err(PipelineError::Sponsorship(SponsorshipDenied::LimitExceeded(_)))
    ));
    assert_eq!(harness.sponsor.as_ref().unwrap().call_count(), 1);
    assert_eq!(alice.assertion_count(), 0);
    assert_eq!(harness.relay.send_count(), 0);
    let stats = &harness.pipeline.sponsorship_stats()[0].stats;
    assert_eq!((stats.total_transactions, stats.denied), (0, 1));
}

#[tokio::test]
async fn test_sponsored_operation_names_paymaster() {
    let harness = Harness::sponsored(SponsorMode::Grant);
    let alice = FakeAuthenticator::new(1);
    harness.register("alice", &alice).await;

    let outcome = harness
        .pipeline
        .send(&transfer("alice"), &alice, &CancelSignal::never())
        .await
        .unwrap();
    assert!(outcome.sponsored);

    let accepted = harness.relay.accepted();
    assert_eq!(accepted.len(), 1);
    assert_eq!(accepted[0].paymaster, Some(PAYMASTER));
    // The relay hashed the sponsored fields; the handle matches what was signed.
    let hash = common::unsigned_from_rpc(&accepted[0])
        .hash(common::chain_config().entry_point, CHAIN_ID);
    assert_eq!(outcome.handle.hash, hash);
}

#[tokio::test]
async fn test_explicitly_unsponsored_skips_paymaster() {
    let harness = Harness::sponsored(SponsorMode::Grant);
    let alice = FakeAuthenticator::new(1);
    harness.register("alice", &alice).await;

    let mut request = transfer("alice");
    request.sponsorship = Some(SponsorshipPolicy::disabled());
    let outcome = harness
        .pipeline
        .send(&request, &alice, &CancelSignal::never())
        .await
        .unwrap();

    assert!(!outcome.sponsored);
    assert_eq!(harness.sponsor.as_ref().unwrap().call_count(), 0);
}

#[tokio::test]
async fn test_concurrent_sends_take_consecutive_nonces() {
    let harness = Harness::new();
    let alice = Arc::new(FakeAuthenticator::new(1));
    harness.register("alice", &alice).await;

    let spawn = |pipeline: Arc<passkey_wallet::TransactionPipeline>, alice: Arc<FakeAuthenticator>| {
        tokio::spawn(async move {
            pipeline
                .send_with_rebuild(&transfer("alice"), alice.as_ref(), &CancelSignal::never())
                .await
        })
    };
    let a = spawn(harness.pipeline.clone(), alice.clone());
    let b = spawn(harness.pipeline.clone(), alice.clone());

    let mut outcomes = vec![a.await.unwrap().unwrap(), b.await.unwrap().unwrap()];
    outcomes.sort_by_key(|o| o.nonce);

    assert_eq!(outcomes[0].nonce, U256::ZERO);
    assert_eq!(outcomes[0].attempts, 1);
    // The second build read the nonce before the first was mined and was
    // rebuilt after the relay's nonce rejection.
    assert_eq!(outcomes[1].nonce, U256::from(1));
    assert_eq!(outcomes[1].attempts, 2);
    assert_eq!(harness.relay.accepted().len(), 2);
}

#[tokio::test]
async fn test_submit_timeout_resubmits_same_operation() {
    let harness = Harness::new();
    let alice = FakeAuthenticator::new(1);
    harness.register("alice", &alice).await;
    harness.relay.stall_next(1);

    let outcome = harness
        .pipeline
        .send(&transfer("alice"), &alice, &CancelSignal::never())
        .await
        .unwrap();

    assert_eq!(harness.relay.send_count(), 2);
    assert_eq!(harness.relay.accepted().len(), 1);
    // One ceremony, one handle.
    assert_eq!(alice.assertion_count(), 1);
    let receipt = harness.pipeline.await_receipt(&outcome.handle, 20).await.unwrap();
    assert_eq!(receipt.state, OperationState::Included);
}

#[tokio::test]
async fn test_lost_submit_answer_is_not_sent_again() {
    let harness = Harness::new();
    let alice = FakeAuthenticator::new(1);
    harness.register("alice", &alice).await;
    harness.relay.lose_next_response(1);

    let outcome = harness
        .pipeline
        .send_with_rebuild(&transfer("alice"), &alice, &CancelSignal::never())
        .await
        .unwrap();

    // The relay already had it; the lookup found it and nothing was resent.
    assert_eq!(harness.relay.send_count(), 1);
    assert_eq!(harness.relay.accepted().len(), 1);
    assert_eq!(alice.assertion_count(), 1);
    assert_eq!(outcome.nonce, U256::ZERO);
    assert_eq!(outcome.attempts, 1);

    let receipt = harness.pipeline.await_receipt(&outcome.handle, 20).await.unwrap();
    assert_eq!(receipt.state, OperationState::Included);
    assert_eq!(harness.ledger.mined(), 1);
}

#[tokio::test]
async fn test_refused_resend_does_not_rebuild_accepted_operation() {
    let harness = Harness::new();
    let alice = FakeAuthenticator::new(1);
    harness.register("alice", &alice).await;
    harness.relay.lose_next_response(1);
    // The lookup before the resend misses, so the resend hits a used nonce.
    harness.relay.blind_lookups(2);

    let outcome = harness
        .pipeline
        .send_with_rebuild(&transfer("alice"), &alice, &CancelSignal::never())
        .await
        .unwrap();

    assert_eq!(harness.relay.send_count(), 2);
    assert_eq!(harness.relay.accepted().len(), 1);
    assert_eq!(alice.assertion_count(), 1);
    assert_eq!(outcome.nonce, U256::ZERO);
    assert_eq!(outcome.attempts, 1);

    let receipt = harness.pipeline.await_receipt(&outcome.handle, 20).await.unwrap();
    assert_eq!(receipt.state, OperationState::Included);
    assert_eq!(harness.ledger.mined(), 1);
}

#[tokio::test]
async fn test_dismissed_prompt_is_user_cancelled() {
    let harness = Harness::new();
    let alice = FakeAuthenticator::new(1);
    harness.register("alice", &alice).await;
    alice.set_mode(AssertionMode::Dismiss);

    let result = harness
        .pipeline
        .send_with_rebuild(&transfer("alice"), &alice, &CancelSignal::never())
        .await;
    assert!(matches!(result, Err(PipelineError::UserCancelled)));
    assert_eq!(alice.assertion_count(), 1);
    assert_eq!(harness.relay.send_count(), 0);

    // The account lock was released.
    alice.set_mode(AssertionMode::Sign);
    let outcome = harness
        .pipeline
        .send(&transfer("alice"), &alice, &CancelSignal::never())
        .await
        .unwrap();
    assert_eq!(outcome.nonce, U256::ZERO);
}

#[tokio::test]
async fn test_cancel_signal_aborts_ceremony() {
    let harness = Harness::new();
    let alice = FakeAuthenticator::new(1);
    harness.register("alice", &alice).await;
    alice.set_mode(AssertionMode::Hang);

    let (handle, signal) = CancelSignal::new();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.cancel();
    });

    let result = harness.pipeline.send(&transfer("alice"), &alice, &signal).await;
    assert!(matches!(result, Err(PipelineError::UserCancelled)));
    assert_eq!(harness.relay.send_count(), 0);
}

#[tokio::test]
async fn test_unanswered_ceremony_times_out() {
    let harness = Harness::new();
    let alice = FakeAuthenticator::new(1);
    harness.register("alice", &alice).await;
    alice.set_mode(AssertionMode::Hang);

    let result = harness
        .pipeline
        .send(&transfer("alice"), &alice, &CancelSignal::never())
        .await;

    let err = result.unwrap_err();
    assert!(matches!(err, PipelineError::CeremonyTimedOut(_)));
    assert!(!err.is_retryable());
    assert_eq!(harness.relay.send_count(), 0);
}

#[tokio::test]
async fn test_assertion_over_wrong_challenge_is_rejected() {
    let harness = Harness::new();
    let alice = FakeAuthenticator::new(1);
    harness.register("alice", &alice).await;
    alice.set_mode(AssertionMode::WrongChallenge);

    let result = harness
        .pipeline
        .send_with_rebuild(&transfer("alice"), &alice, &CancelSignal::never())
        .await;

    assert!(matches!(
        result,
        Err(PipelineError::Signature(SignatureError::ChallengeMismatch))
    ));
    assert_eq!(alice.assertion_count(), 1);
    assert_eq!(harness.relay.send_count(), 0);
}

#[tokio::test]
async fn test_second_credential_signs_for_same_account() {
    let harness = Harness::new();
    let alice = FakeAuthenticator::new(1);
    let laptop = FakeAuthenticator::new(5);
    let address = harness.register("alice", &alice).await;

    let account = harness
        .pipeline
        .add_credential("alice", laptop.credential_id.clone(), &laptop.attestation())
        .await
        .unwrap();
    assert_eq!(account.address, address);
    assert_eq!(account.credentials.len(), 2);

    let mut request = transfer("alice");
    request.credential_id = Some(laptop.credential_id.clone());
    let outcome = harness
        .pipeline
        .send(&request, &laptop, &CancelSignal::never())
        .await
        .unwrap();

    assert_eq!(laptop.assertion_count(), 1);
    assert_eq!(alice.assertion_count(), 0);
    assert_eq!(harness.relay.accepted()[0].sender, address);
    assert_eq!(outcome.nonce, U256::ZERO);
}

#[tokio::test]
async fn test_unknown_account_and_chain() {
    let harness = Harness::new();
    let alice = FakeAuthenticator::new(1);

    let result = harness
        .pipeline
        .send(&transfer("nobody"), &alice, &CancelSignal::never())
        .await;
    assert!(matches!(result, Err(PipelineError::AccountNotFound(_))));

    harness.register("alice", &alice).await;
    let mut request = transfer("alice");
    request.chain_id = 1;
    let result = harness.pipeline.send(&request, &alice, &CancelSignal::never()).await;
    assert!(matches!(result, Err(PipelineError::UnknownChain(1))));
    assert_eq!(alice.assertion_count(), 0);
}

#[tokio::test]
async fn test_estimate_does_not_submit() {
    let harness = Harness::new();
    let alice = FakeAuthenticator::new(1);
    harness.register("alice", &alice).await;

    let intent = transfer("alice").intent;
    let estimate = harness
        .pipeline
        .estimate("alice", CHAIN_ID, &intent, &Default::default())
        .await
        .unwrap();

    assert_eq!(estimate.call_gas_limit, U256::from(75_000u64));
    assert_eq!(harness.relay.send_count(), 0);
}

#[tokio::test]
async fn test_sign_message_encodes_assertion() {
    let harness = Harness::new();
    let alice = FakeAuthenticator::new(1);
    let address = harness.register("alice", &alice).await;

    let signed = harness
        .pipeline
        .sign_message("alice", b"hello wallet", None, &alice, &CancelSignal::never())
        .await
        .unwrap();

    assert_eq!(signed.address, address);
    assert_eq!(signed.hash, eip191_hash_message(b"hello wallet"));
    assert_eq!(signed.credential_id, alice.credential_id);
    let fields = SignatureCodec::decode(&signed.signature).unwrap();
    assert_eq!(fields.client_data_json, common::client_data(signed.hash.as_slice()));
    // No lock, no relay.
    assert_eq!(harness.relay.send_count(), 0);
}

#[tokio::test]
async fn test_sign_message_rejects_foreign_challenge() {
    let harness = Harness::new();
    let alice = FakeAuthenticator::new(1);
    harness.register("alice", &alice).await;
    alice.set_mode(AssertionMode::WrongChallenge);

    let result = harness
        .pipeline
        .sign_message("alice", b"hello wallet", None, &alice, &CancelSignal::never())
        .await;
    assert!(matches!(
        result,
        Err(PipelineError::Signature(SignatureError::ChallengeMismatch))
    ));

    let mallory = FakeAuthenticator::new(9);
    let assertion = mallory.assert(eip191_hash_message(b"hello wallet").as_slice());
    let result = harness
        .pipeline
        .message_signature("alice", b"hello wallet", assertion)
        .await;
    assert!(matches!(result, Err(PipelineError::Input(_))));
}

#[tokio::test]
async fn test_verify_passkey() {
    let harness = Harness::new();
    let alice = FakeAuthenticator::new(1);
    let address = harness.register("alice", &alice).await;
    let challenge = [0x5Au8; 32];

    let check = harness
        .pipeline
        .verify_passkey("alice", &challenge, &alice.assert(&challenge))
        .await
        .unwrap();
    assert!(check.valid);
    assert_eq!(check.address, address);
    assert_eq!(check.reason, None);

    let check = harness
        .pipeline
        .verify_passkey("alice", &[0x00; 32], &alice.assert(&challenge))
        .await
        .unwrap();
    assert!(!check.valid);
    assert_eq!(check.reason, Some("challenge_mismatch"));

    let mallory = FakeAuthenticator::new(9);
    let check = harness
        .pipeline
        .verify_passkey("alice", &challenge, &mallory.assert(&challenge))
        .await
        .unwrap();
    assert!(!check.valid);
    assert_eq!(check.reason, Some("credential_not_bound"));

    let mut absent = alice.assert(&challenge);
    absent.authenticator_data[32] = 0x04;
    let check = harness
        .pipeline
        .verify_passkey("alice", &challenge, &absent)
        .await
        .unwrap();
    assert_eq!(check.reason, Some("malformed_signature"));

    assert!(matches!(
        harness
            .pipeline
            .verify_passkey("bob", &challenge, &alice.assert(&challenge))
            .await,
        Err(PipelineError::AccountNotFound(_))
    ));
}

#[tokio::test]
async fn test_sponsorship_counters() {
    let harness = Harness::sponsored(SponsorMode::Grant);
    let alice = FakeAuthenticator::new(1);
    let bob = FakeAuthenticator::new(2);
    harness.register("alice", &alice).await;
    harness.register("bob", &bob).await;

    // The fake ledger keeps one nonce sequence; mine each before the next.
    for (identity, authenticator) in [("alice", &alice), ("alice", &alice), ("bob", &bob)] {
        let outcome = harness
            .pipeline
            .send(&transfer(identity), authenticator, &CancelSignal::never())
            .await
            .unwrap();
        harness.pipeline.await_receipt(&outcome.handle, 20).await.unwrap();
    }

    let stats = harness.pipeline.sponsorship_stats();
    assert_eq!(stats.len(), 1);
    assert_eq!(stats[0].chain_id, CHAIN_ID);
    assert_eq!(stats[0].stats.total_transactions, 3);
    assert_eq!(stats[0].stats.active_users, 2);
    assert_eq!(stats[0].stats.denied, 0);
    assert!(stats[0].stats.total_gas_sponsored > 0);
}
