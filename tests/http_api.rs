//! HTTP API tests: a real listener, in-process chain fakes, reqwest as the client.

use std::net::SocketAddr;
use std::time::Duration;

use alloy::primitives::eip191_hash_message;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde_json::{json, Value};

use passkey_wallet::config::ServerConfig;
use passkey_wallet::http::{ApiServer, AppState, CeremonyBroker};
use passkey_wallet::Shutdown;

mod common;
use common::{FakeAuthenticator, Harness, SponsorMode, CHAIN_ID};

struct TestServer {
    base: String,
    client: reqwest::Client,
    shutdown: Shutdown,
}

impl TestServer {
    async fn start(harness: &Harness) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr: SocketAddr = listener.local_addr().unwrap();

        let shutdown = Shutdown::new();
        let server = ApiServer::new(AppState::new(harness.pipeline.clone()), ServerConfig::default());
        let stop = shutdown.clone();
        tokio::spawn(async move {
            let _ = server.run(listener, stop).await;
        });

        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(0)
            .no_proxy()
            .build()
            .unwrap();

        Self {
            base: format!("http://{}", addr),
            client,
            shutdown,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    async fn get(&self, path: &str) -> (u16, Value) {
        let res = self.client.get(self.url(path)).send().await.unwrap();
        let status = res.status().as_u16();
        (status, res.json().await.unwrap_or(Value::Null))
    }

    async fn post(&self, path: &str, body: Value) -> (u16, Value) {
        let res = self.client.post(self.url(path)).json(&body).send().await.unwrap();
        let status = res.status().as_u16();
        (status, res.json().await.unwrap_or(Value::Null))
    }

    async fn delete(&self, path: &str) -> (u16, Value) {
        let res = self.client.delete(self.url(path)).send().await.unwrap();
        let status = res.status().as_u16();
        (status, res.json().await.unwrap_or(Value::Null))
    }

    async fn create_account(&self, identity: &str, authenticator: &FakeAuthenticator) -> (u16, Value) {
        self.post(
            "/api/account/create",
            json!({
                "identity": identity,
                "chainId": CHAIN_ID,
                "credentialId": authenticator.credential_id.to_base64url(),
                "attestationObject": URL_SAFE_NO_PAD.encode(authenticator.attestation()),
            }),
        )
        .await
    }

    async fn start_operation(&self, identity: &str) -> (u16, Value) {
        self.post(
            "/api/operations",
            json!({
                "identity": identity,
                "chainId": CHAIN_ID,
                "to": "0x000000000000000000000000000000000000dEaD",
                "value": "1000",
            }),
        )
        .await
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

fn assertion_body(authenticator: &FakeAuthenticator, challenge: &str) -> Value {
    let challenge = URL_SAFE_NO_PAD.decode(challenge).unwrap();
    let assertion = authenticator.assert(&challenge);
    json!({
        "credentialId": assertion.credential_id.to_base64url(),
        "authenticatorData": URL_SAFE_NO_PAD.encode(&assertion.authenticator_data),
        "clientDataJSON": URL_SAFE_NO_PAD.encode(&assertion.client_data_json),
        "signature": URL_SAFE_NO_PAD.encode(&assertion.signature),
    })
}

#[tokio::test]
async fn test_account_lifecycle() {
    let harness = Harness::new();
    let server = TestServer::start(&harness).await;
    let alice = FakeAuthenticator::new(1);

    let (status, created) = server.create_account("alice", &alice).await;
    assert_eq!(status, 201);
    assert_eq!(created["exists"], false);
    let address = created["address"].as_str().unwrap().to_string();

    let (status, again) = server.create_account("alice", &alice).await;
    assert_eq!(status, 200);
    assert_eq!(again["exists"], true);
    assert_eq!(again["address"], address.as_str());

    let (status, fetched) = server.get("/api/account/alice").await;
    assert_eq!(status, 200);
    assert_eq!(fetched["address"], address.as_str());

    let (status, list) = server.get("/api/account/list").await;
    assert_eq!(status, 200);
    assert_eq!(list.as_array().unwrap().len(), 1);

    let (status, missing) = server.get("/api/account/bob").await;
    assert_eq!(status, 404);
    assert_eq!(missing["error"]["code"], "account_not_found");
}

#[tokio::test]
async fn test_rejects_malformed_attestation() {
    let harness = Harness::new();
    let server = TestServer::start(&harness).await;

    let (status, body) = server
        .post(
            "/api/account/create",
            json!({
                "identity": "mallory",
                "chainId": CHAIN_ID,
                "credentialId": "AAAA",
                "attestationObject": URL_SAFE_NO_PAD.encode(b"not cbor"),
            }),
        )
        .await;
    assert_eq!(status, 400);
    assert_eq!(body["error"]["code"], "malformed_attestation");
    assert_eq!(body["error"]["class"], "encoding");
}

#[tokio::test]
async fn test_operation_ceremony_round() {
    let harness = Harness::new();
    let server = TestServer::start(&harness).await;
    let alice = FakeAuthenticator::new(1);
    server.create_account("alice", &alice).await;

    let (status, started) = server.start_operation("alice").await;
    assert_eq!(status, 200);
    let ceremony = started["ceremonyId"].as_str().unwrap().to_string();
    let challenge = started["challenge"].as_str().unwrap().to_string();
    let hash = started["userOpHash"].as_str().unwrap().to_string();
    assert_eq!(started["userOperation"]["nonce"], "0x0");
    assert!(started["userOperation"]["factory"].is_string());

    let path = format!("/api/ceremonies/{}/assertion", ceremony);
    let (status, completed) = server.post(&path, assertion_body(&alice, &challenge)).await;
    assert_eq!(status, 200);
    assert_eq!(completed["userOpHash"], hash.as_str());
    assert_eq!(completed["state"], "submitted");

    // A ceremony completes at most once.
    let (status, _) = server.post(&path, assertion_body(&alice, &challenge)).await;
    assert_eq!(status, 404);

    let receipt_path = format!("/api/bundler/userop/{}?chainId={}", hash, CHAIN_ID);
    let mut state = Value::Null;
    for _ in 0..20 {
        let (status, receipt) = server.get(&receipt_path).await;
        assert_eq!(status, 200);
        state = receipt["state"].clone();
        if state == "included" {
            break;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    assert_eq!(state, "included");
    assert_eq!(harness.relay.accepted().len(), 1);
}

#[tokio::test]
async fn test_wrong_challenge_is_rejected() {
    let harness = Harness::new();
    let server = TestServer::start(&harness).await;
    let alice = FakeAuthenticator::new(1);
    server.create_account("alice", &alice).await;

    let (_, started) = server.start_operation("alice").await;
    let ceremony = started["ceremonyId"].as_str().unwrap();
    let forged = URL_SAFE_NO_PAD.encode([0x42u8; 32]);

    let (status, body) = server
        .post(
            &format!("/api/ceremonies/{}/assertion", ceremony),
            assertion_body(&alice, &forged),
        )
        .await;
    assert_eq!(status, 400);
    assert_eq!(body["error"]["code"], "challenge_mismatch");
    assert_eq!(harness.relay.send_count(), 0);
}

#[tokio::test]
async fn test_cancelled_ceremony_releases_account() {
    let harness = Harness::new();
    let server = TestServer::start(&harness).await;
    let alice = FakeAuthenticator::new(1);
    server.create_account("alice", &alice).await;

    let (_, started) = server.start_operation("alice").await;
    let ceremony = started["ceremonyId"].as_str().unwrap().to_string();

    let (status, body) = server.delete(&format!("/api/ceremonies/{}", ceremony)).await;
    assert_eq!(status, 200);
    assert_eq!(body["outcome"], "user_cancelled");

    let (status, _) = server.delete(&format!("/api/ceremonies/{}", ceremony)).await;
    assert_eq!(status, 404);

    // The account lock went with the ceremony; a new operation starts at once.
    let next = tokio::time::timeout(Duration::from_secs(2), server.start_operation("alice"))
        .await
        .unwrap();
    assert_eq!(next.0, 200);
    assert_eq!(next.1["userOperation"]["nonce"], "0x0");
    assert_eq!(harness.relay.send_count(), 0);
}

#[tokio::test]
async fn test_chain_listings() {
    let harness = Harness::new();
    let server = TestServer::start(&harness).await;

    let (status, chains) = server.get("/api/bundler/supported-chains").await;
    assert_eq!(status, 200);
    assert_eq!(chains[0]["chainId"], CHAIN_ID);
    assert_eq!(chains[0]["paymasterAvailable"], false);

    let (status, paymaster) = server.get("/api/paymaster/config").await;
    assert_eq!(status, 200);
    assert_eq!(paymaster["supported"], false);
    assert!(paymaster["networks"].as_array().unwrap().is_empty());

    let (status, body) = server.get("/api/bundler/userop/not-a-hash?chainId=84532").await;
    assert_eq!(status, 400);
    assert_eq!(body["error"]["code"], "invalid_input");
}

#[tokio::test]
async fn test_request_id_is_echoed() {
    let harness = Harness::new();
    let server = TestServer::start(&harness).await;

    let res = server
        .client
        .get(server.url("/api/account/list"))
        .send()
        .await
        .unwrap();
    assert!(res.headers().contains_key("x-request-id"));

    let res = server
        .client
        .get(server.url("/api/account/list"))
        .header("x-request-id", "trace-me")
        .send()
        .await
        .unwrap();
    assert_eq!(res.headers()["x-request-id"], "trace-me");
}

#[tokio::test]
async fn test_expired_ceremony_is_timed_out() {
    let harness = Harness::new();
    let server = TestServer::start(&harness).await;
    let alice = FakeAuthenticator::new(1);
    server.create_account("alice", &alice).await;

    let (_, started) = server.start_operation("alice").await;
    let ceremony = started["ceremonyId"].as_str().unwrap().to_string();
    let challenge = started["challenge"].as_str().unwrap().to_string();
    assert_eq!(started["expiresInSecs"], 1);

    tokio::time::sleep(Duration::from_millis(1100)).await;
    let (status, body) = server
        .post(
            &format!("/api/ceremonies/{}/assertion", ceremony),
            assertion_body(&alice, &challenge),
        )
        .await;
    assert_eq!(status, 408);
    assert_eq!(body["error"]["code"], "ceremony_timed_out");
    assert_eq!(harness.relay.send_count(), 0);
}

#[tokio::test]
async fn test_sweeper_releases_abandoned_ceremonies() {
    let harness = Harness::new();
    let alice = FakeAuthenticator::new(1);
    harness.register("alice", &alice).await;

    let broker = CeremonyBroker::new();
    let request = passkey_wallet::pipeline::SendRequest::new(
        "alice",
        CHAIN_ID,
        passkey_wallet::userop::TransactionIntent::parse(
            "0x000000000000000000000000000000000000dEaD",
            "0",
            "0x",
        )
        .unwrap(),
    );
    broker.open(harness.pipeline.prepare(&request).await.unwrap());
    assert_eq!(broker.len(), 1);
    assert_eq!(broker.sweep(), 0);

    tokio::time::sleep(Duration::from_millis(1100)).await;
    assert_eq!(broker.sweep(), 1);
    assert!(broker.is_empty());

    // The abandoned ceremony no longer holds the account.
    let next = tokio::time::timeout(Duration::from_secs(1), harness.pipeline.prepare(&request))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(next.operation.nonce, alloy::primitives::U256::ZERO);
}

#[tokio::test]
async fn test_verify_passkey_route() {
    let harness = Harness::new();
    let server = TestServer::start(&harness).await;
    let alice = FakeAuthenticator::new(1);
    let (_, created) = server.create_account("alice", &alice).await;
    let challenge = URL_SAFE_NO_PAD.encode([0x5Au8; 32]);

    let mut body = assertion_body(&alice, &challenge);
    body["identity"] = json!("alice");
    body["challenge"] = json!(challenge);
    let (status, check) = server.post("/api/account/verify-passkey", body.clone()).await;
    assert_eq!(status, 200);
    assert_eq!(check["valid"], true);
    assert_eq!(check["address"], created["address"]);
    assert!(check.get("reason").is_none());

    body["challenge"] = json!(URL_SAFE_NO_PAD.encode([0x00u8; 32]));
    let (status, check) = server.post("/api/account/verify-passkey", body.clone()).await;
    assert_eq!(status, 200);
    assert_eq!(check["valid"], false);
    assert_eq!(check["reason"], "challenge_mismatch");

    body["identity"] = json!("bob");
    let (status, missing) = server.post("/api/account/verify-passkey", body).await;
    assert_eq!(status, 404);
    assert_eq!(missing["error"]["code"], "account_not_found");
}

#[tokio::test]
async fn test_sign_message_route() {
    let harness = Harness::new();
    let server = TestServer::start(&harness).await;
    let alice = FakeAuthenticator::new(1);
    server.create_account("alice", &alice).await;

    let hash = eip191_hash_message(b"hello wallet");
    let mut body = assertion_body(&alice, &URL_SAFE_NO_PAD.encode(hash));
    body["identity"] = json!("alice");
    body["message"] = json!("hello wallet");
    let (status, signed) = server.post("/api/account/sign-message", body.clone()).await;
    assert_eq!(status, 200);
    assert_eq!(signed["hash"], hash.to_string());
    assert!(signed["signature"].as_str().unwrap().starts_with("0x"));

    body["message"] = json!("something else");
    let (status, rejected) = server.post("/api/account/sign-message", body).await;
    assert_eq!(status, 400);
    assert_eq!(rejected["error"]["code"], "challenge_mismatch");
}

#[tokio::test]
async fn test_paymaster_stats_route() {
    let harness = Harness::sponsored(SponsorMode::Grant);
    let server = TestServer::start(&harness).await;
    let alice = FakeAuthenticator::new(1);
    server.create_account("alice", &alice).await;

    let (status, stats) = server.get("/api/paymaster/stats").await;
    assert_eq!(status, 200);
    assert_eq!(stats["totalTransactions"], 0);
    assert_eq!(stats["lastUpdated"], Value::Null);

    let (_, started) = server.start_operation("alice").await;
    assert!(started["ceremonyId"].is_string());

    let (status, stats) = server.get("/api/paymaster/stats").await;
    assert_eq!(status, 200);
    assert_eq!(stats["totalTransactions"], 1);
    assert_eq!(stats["activeUsers"], 1);
    assert!(stats["totalGasSponsored"].as_u64().unwrap() > 0);
    assert!(stats["lastUpdated"].is_u64());
    assert_eq!(stats["networks"][0]["chainId"], CHAIN_ID);
    assert_eq!(stats["networks"][0]["totalTransactions"], 1);
}
