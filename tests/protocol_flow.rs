use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::Duration;
use k256::ecdsa::SigningKey;
use secrecy::SecretString;

use clawminer_coordinator::challenge::make_challenge;
use clawminer_coordinator::client::AgentKey;
use clawminer_coordinator::clock::FixedClock;
use clawminer_coordinator::config::Config;
use clawminer_coordinator::coordinator::Coordinator;
use clawminer_coordinator::error::CoordinatorError;
use clawminer_coordinator::eth::{self, Address};
use clawminer_coordinator::signing::{Eip712Domain, receipt_digest};
use clawminer_coordinator::store::{MemoryStore, StateStore};
use clawminer_coordinator::types::*;

// 2026-03-01T01:00:00Z, epoch 5.
const EPOCH_5: i64 = 1_771_891_200 + 5 * 86_400 + 3_600;
const SIGNER_KEY: &str = "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";
const CONTRACT: &str = "0x1111111111111111111111111111111111111111";

struct Harness {
    clock: Arc<FixedClock>,
    coordinator: Coordinator,
    wallet: SigningKey,
    miner: Address,
    agent: AgentKey,
}

fn harness(config: Config) -> Harness {
    let clock = Arc::new(FixedClock::from_unix(EPOCH_5));
    let coordinator = Coordinator::new(&config, clock.clone());
    let wallet = SigningKey::from_slice(&[7u8; 32]).unwrap();
    let miner = Address::from_verifying_key(wallet.verifying_key());
    Harness { clock, coordinator, wallet, miner, agent: AgentKey::from_seed([9u8; 32]) }
}

fn signing_config() -> Config {
    Config {
        signer_private_key: Some(SIGNER_KEY.to_string()),
        mining_contract: Some(CONTRACT.to_string()),
        ..Config::default()
    }
}

impl Harness {
    fn register(&self) -> RegisterResponse {
        self.coordinator
            .register(&RegisterRequest {
                miner_address: self.miner.to_string().to_uppercase().replacen("0X", "0x", 1),
                agent_public_key: self.agent.public_key_spki_base64().unwrap(),
            })
            .unwrap()
    }

    fn prove_request(&self, reg: &RegisterResponse) -> ProveRequest {
        ProveRequest {
            miner_address: self.miner.to_string(),
            wallet_sig: eth::sign_personal_message(&self.wallet, &reg.message_to_sign).unwrap(),
            agent_sig: self.agent.sign_nonce(&reg.server_nonce),
            registration_token: reg.registration_token.clone(),
        }
    }

    fn lease(&self) -> String {
        let reg = self.register();
        self.coordinator.prove(&self.prove_request(&reg)).unwrap().lease_token
    }

    fn bearer(token: &str) -> String {
        format!("Bearer {token}")
    }
}

#[test]
fn register_returns_message_bound_to_miner_and_nonce() {
    let h = harness(Config::default());
    let reg = h.register();

    assert_eq!(reg.miner_address, h.miner);
    assert_eq!(
        reg.message_to_sign,
        format!("ClawMiner Agent Lease Proof\n\nminer: {}\nchainId: 56\nnonce: {}", h.miner, reg.server_nonce)
    );
    assert_eq!(STANDARD.decode(&reg.message_to_sign_base64).unwrap(), reg.message_to_sign.as_bytes());
    assert_ne!(h.register().server_nonce, reg.server_nonce);
}

#[test]
fn register_rejects_bad_input() {
    let h = harness(Config::default());
    let err = h
        .coordinator
        .register(&RegisterRequest { miner_address: "0x1234".into(), agent_public_key: "AAAA".into() })
        .unwrap_err();
    assert_eq!(err.code(), "missing_or_invalid_fields");

    let err = h
        .coordinator
        .register(&RegisterRequest { miner_address: h.miner.to_string(), agent_public_key: "bm90LWEta2V5".into() })
        .unwrap_err();
    assert_eq!(err.code(), "invalid_agentPubKey");
    assert_eq!(err.status(), 400);
}

#[test]
fn full_flow_with_signed_receipt() {
    let h = harness(signing_config());
    let lease = h.lease();
    let miner = h.coordinator.authorize(Some(&Harness::bearer(&lease))).unwrap();
    assert_eq!(miner, h.miner);

    let ch = h.coordinator.challenge(&miner, Some("n1")).unwrap();
    assert_eq!(ch.epoch_id, 5);
    assert_eq!(ch.credits_per_solve, 1);
    let pack = make_challenge(5, &h.miner, "n1");
    assert_eq!(ch.challenge_id, pack.seed.to_string());

    let out = h
        .coordinator
        .submit(&miner, &SubmitRequest { nonce: "n1".into(), artifact: Some(pack.expected_artifact.clone().into()) })
        .unwrap();
    let SubmitResponse::Accepted(accepted) = out else {
        panic!("expected pass");
    };
    assert_eq!(accepted.credits, 1);
    assert_eq!(accepted.artifact, pack.expected_artifact);
    assert_eq!(accepted.warning, None);
    assert_eq!(accepted.receipt.epoch_id, 5);
    assert_eq!(accepted.receipt.miner_address, h.miner);
    assert_eq!(accepted.receipt.challenge_id, pack.seed);
    assert_eq!(accepted.receipt.issued_at, EPOCH_5 as u64);

    let domain = Eip712Domain { chain_id: 56, verifying_contract: Address::parse(CONTRACT).unwrap() };
    let digest = receipt_digest(&domain, &accepted.receipt);
    let sig = accepted.signature.unwrap();
    let recovered = eth::recover_prehash(&digest, &hex::decode(&sig[2..]).unwrap()).unwrap();
    assert_eq!(Some(recovered), accepted.signer);
    assert_eq!(accepted.signer, h.coordinator.config_view().coordinator_signer);

    let stats = h.coordinator.stats();
    assert_eq!(stats.epoch_id, 5);
    assert_eq!(stats.active_agents, 1);
    assert_eq!(stats.total_credits_epoch, 1);
    assert_eq!(stats.solves_total, 1);
}

#[test]
fn wrong_artifact_is_a_normal_rejection() {
    let h = harness(Config::default());
    let lease = h.lease();
    let miner = h.coordinator.authorize(Some(&Harness::bearer(&lease))).unwrap();
    let expected = make_challenge(5, &h.miner, "n1").expected_artifact;

    let out = h
        .coordinator
        .submit(&miner, &SubmitRequest { nonce: "n1".into(), artifact: Some("CLAW-5-0".into()) })
        .unwrap();
    let SubmitResponse::Rejected(rejected) = out else {
        panic!("expected rejection");
    };
    assert!(!rejected.pass);
    assert_eq!(rejected.reason, "artifact_mismatch");
    assert_eq!(rejected.expected_artifact, Some(expected.clone()));

    let out = h
        .coordinator
        .submit(&miner, &SubmitRequest { nonce: "n1".into(), artifact: Some(format!(" {expected}").into()) })
        .unwrap();
    let SubmitResponse::Rejected(rejected) = out else {
        panic!("expected rejection");
    };
    assert_eq!(rejected.reason, "artifact_whitespace");
    assert_eq!(rejected.expected_artifact, None);
    assert_eq!(h.coordinator.stats().solves_total, 0);
}

#[test]
fn unsigned_receipt_carries_warning() {
    let h = harness(Config::default());
    let lease = h.lease();
    let miner = h.coordinator.authorize(Some(&Harness::bearer(&lease))).unwrap();
    let artifact = make_challenge(5, &h.miner, "n2").expected_artifact;

    let out = h
        .coordinator
        .submit(&miner, &SubmitRequest { nonce: "n2".into(), artifact: Some(artifact.into()) })
        .unwrap();
    let SubmitResponse::Accepted(accepted) = out else {
        panic!("expected pass");
    };
    assert_eq!(accepted.signature, None);
    assert_eq!(accepted.signer, None);
    assert_eq!(accepted.warning.as_deref(), Some("missing_or_invalid_signer"));
}

#[test]
fn registration_token_can_be_replayed() {
    let h = harness(Config::default());
    let reg = h.register();
    let req = h.prove_request(&reg);

    let first = h.coordinator.prove(&req).unwrap();
    let second = h.coordinator.prove(&req).unwrap();
    assert_ne!(first.lease_token, second.lease_token);
    assert_eq!(first.expires_in_seconds, 86_400);
    for lease in [&first.lease_token, &second.lease_token] {
        assert_eq!(h.coordinator.authorize(Some(&Harness::bearer(lease))).unwrap(), h.miner);
    }
}

#[test]
fn prove_rejections() {
    let h = harness(Config::default());
    let reg = h.register();

    let mut req = h.prove_request(&reg);
    req.miner_address = Address([0xcd; 20]).to_string();
    let err = h.coordinator.prove(&req).unwrap_err();
    assert_eq!(err.code(), "register_token_miner_mismatch");
    assert_eq!(err.status(), 403);

    let mut req = h.prove_request(&reg);
    req.agent_sig = AgentKey::from_seed([1u8; 32]).sign_nonce(&reg.server_nonce);
    assert_eq!(h.coordinator.prove(&req).unwrap_err().code(), "agentSig_verify_failed");

    let mut req = h.prove_request(&reg);
    req.agent_sig = "***".into();
    assert_eq!(h.coordinator.prove(&req).unwrap_err().code(), "invalid_agentSig");

    let other = SigningKey::from_slice(&[8u8; 32]).unwrap();
    let mut req = h.prove_request(&reg);
    req.wallet_sig = eth::sign_personal_message(&other, &reg.message_to_sign).unwrap();
    assert_eq!(h.coordinator.prove(&req).unwrap_err().code(), "walletSig_not_miner");

    let mut req = h.prove_request(&reg);
    req.wallet_sig = "0xdeadbeef".into();
    assert_eq!(h.coordinator.prove(&req).unwrap_err().code(), "walletSig_recover_failed");

    let mut req = h.prove_request(&reg);
    req.registration_token = "garbage".into();
    let err = h.coordinator.prove(&req).unwrap_err();
    assert_eq!(err.code(), "invalid_register_token");
    assert_eq!(err.reason(), Some("invalid_format"));

    let mut req = h.prove_request(&reg);
    req.wallet_sig.clear();
    assert_eq!(h.coordinator.prove(&req).unwrap_err().code(), "missing_or_invalid_fields");
}

#[test]
fn lease_cannot_stand_in_for_registration() {
    let h = harness(Config::default());
    let reg = h.register();
    let lease = h.lease();
    let mut req = h.prove_request(&reg);
    req.registration_token = lease.clone();
    let err = h.coordinator.prove(&req).unwrap_err();
    assert_eq!(err.reason(), Some("wrong_kind"));

    let err = h.coordinator.authorize(Some(&Harness::bearer(&reg.registration_token))).unwrap_err();
    assert!(matches!(err, CoordinatorError::InvalidLease(_)));
    assert_eq!(err.reason(), Some("wrong_kind"));
}

#[test]
fn registration_expires() {
    let h = harness(Config::default());
    let reg = h.register();
    let req = h.prove_request(&reg);
    h.clock.advance(Duration::seconds(901));
    let err = h.coordinator.prove(&req).unwrap_err();
    assert_eq!(err.reason(), Some("expired"));
}

#[test]
fn renew_issues_fresh_lease_and_keeps_old_one() {
    let h = harness(Config::default());
    let old = h.lease();
    h.clock.advance(Duration::seconds(3_600));

    let renewed = h.coordinator.renew(&RenewRequest { lease_token: old.clone() }).unwrap();
    assert_ne!(renewed.lease_token, old);
    assert_eq!(renewed.expires_in_seconds, 86_400);
    assert!(h.coordinator.authorize(Some(&Harness::bearer(&old))).is_ok());

    // Old lease dies at its own expiry, the renewed one an hour later.
    h.clock.advance(Duration::seconds(86_400 - 3_600 + 1));
    let err = h.coordinator.authorize(Some(&Harness::bearer(&old))).unwrap_err();
    assert_eq!(err.reason(), Some("expired"));
    assert!(h.coordinator.authorize(Some(&Harness::bearer(&renewed.lease_token))).is_ok());

    let err = h.coordinator.renew(&RenewRequest { lease_token: old }).unwrap_err();
    assert_eq!(err.code(), "invalid_lease");
    let err = h.coordinator.renew(&RenewRequest { lease_token: String::new() }).unwrap_err();
    assert_eq!(err.code(), "missing_leaseToken");
}

#[test]
fn tokens_from_another_secret_are_rejected() {
    let h = harness(Config::default());
    let lease = h.lease();
    let other = harness(Config { hmac_secret: SecretString::from("another-secret".to_string()), ..Config::default() });
    let err = other.coordinator.authorize(Some(&Harness::bearer(&lease))).unwrap_err();
    assert_eq!(err.reason(), Some("invalid_signature"));
}

#[test]
fn challenge_requires_valid_nonce() {
    let h = harness(Config::default());
    let lease = h.lease();
    let miner = h.coordinator.authorize(Some(&Harness::bearer(&lease))).unwrap();
    for bad in [None, Some(""), Some("a|b"), Some(&"x".repeat(81)[..])] {
        assert_eq!(h.coordinator.challenge(&miner, bad).unwrap_err().code(), "missing_or_invalid_nonce");
    }
    assert!(h.coordinator.challenge(&miner, Some(&"x".repeat(80))).is_ok());
}

#[test]
fn submission_uses_epoch_at_submit_time() {
    let h = harness(Config::default());
    let lease = h.lease();
    let miner = h.coordinator.authorize(Some(&Harness::bearer(&lease))).unwrap();
    let epoch5 = make_challenge(5, &h.miner, "n1").expected_artifact;

    h.clock.advance(Duration::days(1));
    let out = h
        .coordinator
        .submit(&miner, &SubmitRequest { nonce: "n1".into(), artifact: Some(epoch5.into()) })
        .unwrap();
    assert!(!out.passed());
}

#[test]
fn store_records_registrations_and_leases() {
    let store = Arc::new(MemoryStore::new());
    let mut h = harness(Config::default());
    h.coordinator = Coordinator::new(&Config::default(), h.clock.clone()).with_store(store.clone());

    assert_eq!(h.coordinator.agent(&h.miner.to_string()).unwrap_err().status(), 404);
    let reg = h.register();
    let lease = h.coordinator.prove(&h.prove_request(&reg)).unwrap().lease_token;

    let record = h.coordinator.agent(&h.miner.to_string()).unwrap();
    assert_eq!(record.server_nonce, reg.server_nonce);
    assert_eq!(record.registered_at, EPOCH_5);

    let stored = clawminer_coordinator::store::find_lease(store.as_ref() as &dyn StateStore, &lease)
        .unwrap()
        .unwrap();
    assert_eq!(stored.miner_address, h.miner);
    assert_eq!(stored.expires_at, EPOCH_5 + 86_400);
}
