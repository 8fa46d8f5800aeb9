//! Shared fakes for integration tests: a scriptable authenticator, a relay and
//! chain backed by one in-memory ledger, and a paymaster.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use alloy::primitives::{Address, Bytes, B256, U256, U64};
use arc_swap::ArcSwap;
use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use ciborium::Value;
use serde_json::{json, Value as Json};

use passkey_wallet::account::InMemoryDirectory;
use passkey_wallet::chain::{AccountStateSource, ChainResult, OnChainState};
use passkey_wallet::config::{ChainConfig, WalletConfig};
use passkey_wallet::passkey::{
    AssertionResult, AttestationResult, Authenticator, AuthenticatorError, CoseAlgorithm,
    CredentialId,
};
use passkey_wallet::pipeline::{ChainContext, ChainRegistry, TransactionPipeline};
use passkey_wallet::relay::{GasEstimate, RelayService, TransactionReceiptRpc, UserOperationReceiptRpc};
use passkey_wallet::rpc::RpcError;
use passkey_wallet::sponsor::{SponsorshipQuote, SponsorshipService};
use passkey_wallet::userop::{SponsorshipPayload, UnsignedOperation, UserOperationRpc};

pub const CHAIN_ID: u64 = 84532;
pub const PAYMASTER: Address = Address::repeat_byte(0x99);

pub fn chain_config() -> ChainConfig {
    ChainConfig {
        chain_id: CHAIN_ID,
        name: "base-sepolia".to_string(),
        rpc_url: "http://127.0.0.1:8545".to_string(),
        failover_urls: vec![],
        bundler_url: "http://127.0.0.1:4337".to_string(),
        paymaster_url: None,
        sponsorship_enabled: false,
        entry_point: passkey_wallet::config::schema::DEFAULT_ENTRY_POINT,
        factory: Address::repeat_byte(0x77),
        account_init_code_hash: B256::repeat_byte(0x11),
        rpc_timeout_secs: 5,
    }
}

/// Pipeline settings tuned for fast tests.
pub fn settings() -> WalletConfig {
    let mut config = WalletConfig {
        chains: vec![chain_config()],
        ..Default::default()
    };
    config.retries.max_attempts = 3;
    config.retries.base_delay_ms = 100;
    config.retries.max_delay_ms = 400;
    config.relay.timeout_secs = 1;
    config.relay.drop_after_misses = 3;
    config.authenticator.ceremony_timeout_secs = 1;
    config
}

// ---------------------------------------------------------------------------
// Attestation objects
// ---------------------------------------------------------------------------

fn cose_es256(x: [u8; 32], y: [u8; 32]) -> Value {
    Value::Map(vec![
        (Value::Integer(1.into()), Value::Integer(2.into())),
        (Value::Integer(3.into()), Value::Integer((-7).into())),
        (Value::Integer((-1).into()), Value::Integer(1.into())),
        (Value::Integer((-2).into()), Value::Bytes(x.to_vec())),
        (Value::Integer((-3).into()), Value::Bytes(y.to_vec())),
    ])
}

/// A `none`-format attestation object carrying an ES256 key.
pub fn es256_attestation(credential_id: &[u8], x: [u8; 32], y: [u8; 32]) -> Vec<u8> {
    let mut auth_data = vec![0xAB; 32];
    auth_data.push(0x45);
    auth_data.extend_from_slice(&1u32.to_be_bytes());
    auth_data.extend_from_slice(&[0x01; 16]);
    auth_data.extend_from_slice(&(credential_id.len() as u16).to_be_bytes());
    auth_data.extend_from_slice(credential_id);
    ciborium::ser::into_writer(&cose_es256(x, y), &mut auth_data).unwrap();

    let object = Value::Map(vec![
        (Value::Text("fmt".into()), Value::Text("none".into())),
        (Value::Text("attStmt".into()), Value::Map(vec![])),
        (Value::Text("authData".into()), Value::Bytes(auth_data)),
    ]);
    let mut out = Vec::new();
    ciborium::ser::into_writer(&object, &mut out).unwrap();
    out
}

pub fn client_data(challenge: &[u8]) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "type": "webauthn.get",
        "challenge": URL_SAFE_NO_PAD.encode(challenge),
        "origin": "https://wallet.test",
    }))
    .unwrap()
}

// ---------------------------------------------------------------------------
// Authenticator
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssertionMode {
    Sign,
    /// Signs a different challenge than the one requested.
    WrongChallenge,
    /// The user dismisses the prompt.
    Dismiss,
    /// Never answers.
    Hang,
}

/// A software passkey with a fixed key.
pub struct FakeAuthenticator {
    pub credential_id: CredentialId,
    x: [u8; 32],
    y: [u8; 32],
    mode: Mutex<AssertionMode>,
    pub assertions: AtomicU32,
}

impl FakeAuthenticator {
    pub fn new(seed: u8) -> Self {
        Self {
            credential_id: CredentialId::new(vec![seed; 16]),
            x: [seed; 32],
            y: [seed.wrapping_add(1); 32],
            mode: Mutex::new(AssertionMode::Sign),
            assertions: AtomicU32::new(0),
        }
    }

    pub fn set_mode(&self, mode: AssertionMode) {
        *self.mode.lock().unwrap() = mode;
    }

    pub fn attestation(&self) -> Vec<u8> {
        es256_attestation(self.credential_id.as_bytes(), self.x, self.y)
    }

    /// A well-formed assertion over `challenge`.
    pub fn assert(&self, challenge: &[u8]) -> AssertionResult {
        let mut authenticator_data = vec![0xAB; 32];
        authenticator_data.push(0x05);
        authenticator_data.extend_from_slice(&2u32.to_be_bytes());
        AssertionResult {
            credential_id: self.credential_id.clone(),
            authenticator_data,
            client_data_json: client_data(challenge),
            signature: vec![0x30; 70],
        }
    }

    pub fn assertion_count(&self) -> u32 {
        self.assertions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Authenticator for FakeAuthenticator {
    async fn create_credential(
        &self,
        _identity: &str,
        challenge: &[u8],
        algorithms: &[CoseAlgorithm],
    ) -> Result<AttestationResult, AuthenticatorError> {
        if !algorithms.contains(&CoseAlgorithm::Es256) {
            return Err(AuthenticatorError::NotAllowed("ES256 not offered".into()));
        }
        Ok(AttestationResult {
            credential_id: self.credential_id.clone(),
            attestation_object: self.attestation(),
            client_data_json: client_data(challenge),
        })
    }

    async fn get_assertion(
        &self,
        credential_id: &CredentialId,
        challenge: &[u8],
    ) -> Result<AssertionResult, AuthenticatorError> {
        self.assertions.fetch_add(1, Ordering::SeqCst);
        if credential_id != &self.credential_id {
            return Err(AuthenticatorError::NotAllowed("unknown credential".into()));
        }
        let mode = *self.mode.lock().unwrap();
        match mode {
            AssertionMode::Sign => Ok(self.assert(challenge)),
            AssertionMode::WrongChallenge => Ok(self.assert(&[0x42; 32])),
            AssertionMode::Dismiss => Err(AuthenticatorError::UserCancelled),
            AssertionMode::Hang => std::future::pending().await,
        }
    }
}

// ---------------------------------------------------------------------------
// Ledger, chain and relay
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct LedgerState {
    mined: u64,
    deployed: bool,
    pending: Vec<B256>,
    receipts: HashMap<B256, UserOperationReceiptRpc>,
}

/// One account's on-chain history, shared by the fake chain and relay.
#[derive(Debug, Default)]
pub struct Ledger {
    state: Mutex<LedgerState>,
}

impl Ledger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn mined(&self) -> u64 {
        self.state.lock().unwrap().mined
    }

    pub fn pending(&self) -> usize {
        self.state.lock().unwrap().pending.len()
    }

    fn expected_nonce(&self) -> u64 {
        let state = self.state.lock().unwrap();
        state.mined + state.pending.len() as u64
    }

    fn mine(&self, hash: B256, success: bool) {
        let mut state = self.state.lock().unwrap();
        state.pending.retain(|h| *h != hash);
        state.mined += 1;
        state.deployed = true;
        let block = state.mined;
        state.receipts.insert(
            hash,
            UserOperationReceiptRpc {
                user_op_hash: hash,
                success,
                reason: (!success).then(|| "execution reverted".to_string()),
                actual_gas_used: Some(U256::from(90_000u64)),
                receipt: TransactionReceiptRpc {
                    transaction_hash: B256::repeat_byte(block as u8),
                    block_number: Some(U64::from(block)),
                },
            },
        );
    }
}

/// Chain state view over a [`Ledger`].
pub struct FakeChain {
    ledger: Arc<Ledger>,
    pub reads: AtomicU32,
}

impl FakeChain {
    pub fn new(ledger: Arc<Ledger>) -> Self {
        Self {
            ledger,
            reads: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl AccountStateSource for FakeChain {
    async fn account_state(&self, _address: Address) -> ChainResult<OnChainState> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let state = self.ledger.state.lock().unwrap();
        Ok(OnChainState {
            nonce: U256::from(state.mined),
            deployed: state.deployed,
        })
    }
}

/// Rebuild the unsigned operation a bundler would hash.
pub fn unsigned_from_rpc(op: &UserOperationRpc) -> UnsignedOperation {
    let mut init_code = Vec::new();
    if let (Some(factory), Some(data)) = (op.factory, &op.factory_data) {
        init_code.extend_from_slice(factory.as_slice());
        init_code.extend_from_slice(data);
    }
    let gas = |v: U256| v.saturating_to::<u128>();
    UnsignedOperation {
        sender: op.sender,
        nonce: op.nonce,
        init_code: init_code.into(),
        call_data: op.call_data.clone(),
        call_gas_limit: gas(op.call_gas_limit),
        verification_gas_limit: gas(op.verification_gas_limit),
        paymaster_verification_gas_limit: op.paymaster_verification_gas_limit.map(gas).unwrap_or(0),
        paymaster_post_op_gas_limit: op.paymaster_post_op_gas_limit.map(gas).unwrap_or(0),
        pre_verification_gas: gas(op.pre_verification_gas),
        max_fee_per_gas: gas(op.max_fee_per_gas),
        max_priority_fee_per_gas: gas(op.max_priority_fee_per_gas),
        sponsorship: op.paymaster.map(|paymaster| SponsorshipPayload {
            paymaster,
            paymaster_data: op.paymaster_data.clone().unwrap_or_default(),
        }),
    }
}

/// An in-process bundler that enforces nonce order against a [`Ledger`]
/// and mines accepted operations after a short delay.
pub struct FakeRelay {
    ledger: Arc<Ledger>,
    mine_after: Duration,
    stall_next: AtomicU32,
    lose_next: AtomicU32,
    blind_next: AtomicU32,
    revert: AtomicBool,
    pub sends: AtomicU32,
    pub receipt_polls: AtomicU32,
    pub accepted: Mutex<Vec<UserOperationRpc>>,
}

impl FakeRelay {
    pub fn new(ledger: Arc<Ledger>) -> Self {
        Self {
            ledger,
            mine_after: Duration::from_millis(30),
            stall_next: AtomicU32::new(0),
            lose_next: AtomicU32::new(0),
            blind_next: AtomicU32::new(0),
            revert: AtomicBool::new(false),
            sends: AtomicU32::new(0),
            receipt_polls: AtomicU32::new(0),
            accepted: Mutex::new(Vec::new()),
        }
    }

    /// The next `n` sends never answer and are not accepted.
    pub fn stall_next(&self, n: u32) {
        self.stall_next.store(n, Ordering::SeqCst);
    }

    /// The next `n` sends are accepted, but their answers never arrive.
    pub fn lose_next_response(&self, n: u32) {
        self.lose_next.store(n, Ordering::SeqCst);
    }

    /// The next `n` receipt or by-hash lookups answer `null`, as a bundler
    /// that has not indexed an operation yet.
    pub fn blind_lookups(&self, n: u32) {
        self.blind_next.store(n, Ordering::SeqCst);
    }

    fn take(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    /// Accepted operations revert when mined.
    pub fn revert_on_chain(&self) {
        self.revert.store(true, Ordering::SeqCst);
    }

    pub fn send_count(&self) -> u32 {
        self.sends.load(Ordering::SeqCst)
    }

    pub fn receipt_poll_count(&self) -> u32 {
        self.receipt_polls.load(Ordering::SeqCst)
    }

    pub fn accepted(&self) -> Vec<UserOperationRpc> {
        self.accepted.lock().unwrap().clone()
    }
}

#[async_trait]
impl RelayService for FakeRelay {
    async fn send_user_operation(
        &self,
        op: &UserOperationRpc,
        entry_point: Address,
    ) -> Result<B256, RpcError> {
        self.sends.fetch_add(1, Ordering::SeqCst);
        if Self::take(&self.stall_next) {
            return std::future::pending().await;
        }

        let expected = self.ledger.expected_nonce();
        if op.nonce != U256::from(expected) {
            return Err(RpcError::remote(
                -32602,
                format!("AA25 invalid account nonce: expected {}", expected),
            ));
        }

        let hash = unsigned_from_rpc(op).hash(entry_point, CHAIN_ID);
        self.ledger.state.lock().unwrap().pending.push(hash);
        self.accepted.lock().unwrap().push(op.clone());

        let ledger = self.ledger.clone();
        let delay = self.mine_after;
        let success = !self.revert.load(Ordering::SeqCst);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            ledger.mine(hash, success);
        });
        if Self::take(&self.lose_next) {
            return std::future::pending().await;
        }
        Ok(hash)
    }

    async fn get_user_operation_receipt(
        &self,
        hash: B256,
    ) -> Result<Option<UserOperationReceiptRpc>, RpcError> {
        self.receipt_polls.fetch_add(1, Ordering::SeqCst);
        if Self::take(&self.blind_next) {
            return Ok(None);
        }
        Ok(self.ledger.state.lock().unwrap().receipts.get(&hash).cloned())
    }

    async fn get_user_operation_by_hash(&self, hash: B256) -> Result<Option<Json>, RpcError> {
        if Self::take(&self.blind_next) {
            return Ok(None);
        }
        let state = self.ledger.state.lock().unwrap();
        let known = state.pending.contains(&hash) || state.receipts.contains_key(&hash);
        Ok(known.then(|| json!({ "userOpHash": hash })))
    }

    async fn estimate_user_operation_gas(
        &self,
        _op: &UserOperationRpc,
        _entry_point: Address,
    ) -> Result<GasEstimate, RpcError> {
        Ok(GasEstimate {
            pre_verification_gas: U256::from(48_000u64),
            verification_gas_limit: U256::from(420_000u64),
            call_gas_limit: U256::from(75_000u64),
            paymaster_verification_gas_limit: None,
            paymaster_post_op_gas_limit: None,
        })
    }
}

// ---------------------------------------------------------------------------
// Paymaster
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SponsorMode {
    Grant,
    LimitExceeded,
}

pub struct FakeSponsor {
    mode: Mutex<SponsorMode>,
    pub calls: AtomicU32,
}

impl FakeSponsor {
    pub fn new(mode: SponsorMode) -> Self {
        Self {
            mode: Mutex::new(mode),
            calls: AtomicU32::new(0),
        }
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SponsorshipService for FakeSponsor {
    async fn sponsor_operation(
        &self,
        _op: &UserOperationRpc,
        _entry_point: Address,
        _context: Option<&Json>,
    ) -> Result<SponsorshipQuote, RpcError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match *self.mode.lock().unwrap() {
            SponsorMode::Grant => Ok(SponsorshipQuote {
                paymaster: Some(PAYMASTER),
                paymaster_data: Some(Bytes::from_static(&[0xCA, 0xFE])),
                paymaster_verification_gas_limit: Some(U256::from(60_000u64)),
                paymaster_post_op_gas_limit: Some(U256::from(10_000u64)),
                ..Default::default()
            }),
            SponsorMode::LimitExceeded => Err(RpcError::remote(-32000, "sponsorship limit reached for policy")),
        }
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

/// A pipeline over one fake chain.
pub struct Harness {
    pub pipeline: Arc<TransactionPipeline>,
    pub directory: Arc<InMemoryDirectory>,
    pub ledger: Arc<Ledger>,
    pub chain: Arc<FakeChain>,
    pub relay: Arc<FakeRelay>,
    pub sponsor: Option<Arc<FakeSponsor>>,
}

impl Harness {
    pub fn new() -> Self {
        Self::build(None)
    }

    pub fn sponsored(mode: SponsorMode) -> Self {
        Self::build(Some(Arc::new(FakeSponsor::new(mode))))
    }

    fn build(sponsor: Option<Arc<FakeSponsor>>) -> Self {
        let settings = settings();
        let ledger = Ledger::new();
        let chain = Arc::new(FakeChain::new(ledger.clone()));
        let relay = Arc::new(FakeRelay::new(ledger.clone()));

        let mut config = chain_config();
        config.sponsorship_enabled = sponsor.is_some();
        let context = ChainContext::assemble(
            config,
            &settings,
            chain.clone(),
            sponsor.clone().map(|s| s as Arc<dyn SponsorshipService>),
            relay.clone(),
        );
        let registry = Arc::new(ArcSwap::from_pointee(ChainRegistry::new(&settings).with_chain(context)));

        let directory = Arc::new(InMemoryDirectory::new(None));
        let pipeline = Arc::new(TransactionPipeline::new(directory.clone(), registry));

        Self {
            pipeline,
            directory,
            ledger,
            chain,
            relay,
            sponsor,
        }
    }

    /// Register `identity` with `authenticator`'s credential.
    pub async fn register(&self, identity: &str, authenticator: &FakeAuthenticator) -> Address {
        self.pipeline
            .register(
                identity,
                CHAIN_ID,
                authenticator.credential_id.clone(),
                &authenticator.attestation(),
            )
            .await
            .unwrap()
            .account
            .address
    }
}
