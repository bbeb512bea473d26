use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rand::RngCore;
use rand::rngs::OsRng;
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info, warn};

use crate::challenge::{self, make_challenge, verify_artifact};
use crate::clock::Clock;
use crate::config::Config;
use crate::epoch::{EpochClock, REWARD_TIERS};
use crate::error::CoordinatorError;
use crate::eth::Address;
use crate::metrics::{CoordinatorMetrics, ProofOutcome};
use crate::proof::{AgentPublicKey, Proof};
use crate::receipt::Receipt;
use crate::signing::ReceiptSigner;
use crate::store::{self, LeaseRecord, RegistrationRecord, StateStore};
use crate::token::{TokenCodec, TokenKind, Verified};
use crate::types::*;

pub const TOKEN_MODE: &str = "hmac-stateless";

/// The exact text the wallet must `personal_sign` to bind itself to one
/// registration.
pub fn prove_message(miner: &Address, chain_id: u64, server_nonce: &str) -> String {
    format!("ClawMiner Agent Lease Proof\n\nminer: {miner}\nchainId: {chain_id}\nnonce: {server_nonce}")
}

/// Lowercases, then requires `0x` + 40 hex digits.
pub fn normalize_miner(raw: &str) -> Result<Address, CoordinatorError> {
    Address::parse(&raw.to_ascii_lowercase()).map_err(|_| CoordinatorError::InvalidFields)
}

/// Extracts the token from `Authorization: Bearer <token>`.
pub fn bearer_token(header: Option<&str>) -> Option<&str> {
    let (scheme, token) = header?.trim().split_once(char::is_whitespace)?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

// Random UUIDv4-formatted string.
fn new_server_nonce() -> String {
    let mut b = [0u8; 16];
    OsRng.fill_bytes(&mut b);
    b[6] = (b[6] & 0x0f) | 0x40;
    b[8] = (b[8] & 0x3f) | 0x80;
    let h = hex::encode(b);
    format!("{}-{}-{}-{}-{}", &h[0..8], &h[8..12], &h[12..16], &h[16..20], &h[20..32])
}

fn new_lease_id() -> String {
    let mut b = [0u8; 16];
    OsRng.fill_bytes(&mut b);
    hex::encode(b)
}

pub struct Coordinator {
    chain_id: u64,
    register_ttl: u64,
    lease_ttl: u64,
    credits_per_solve: u64,
    mining_contract: Option<String>,

    tokens: TokenCodec,
    epochs: EpochClock,
    signer: ReceiptSigner,
    clock: Arc<dyn Clock>,
    store: Option<Arc<dyn StateStore>>,
    metrics: CoordinatorMetrics,
}

impl Coordinator {
    pub fn new(config: &Config, clock: Arc<dyn Clock>) -> Self {
        Self {
            chain_id: config.chain_id,
            register_ttl: config.register_ttl_seconds,
            lease_ttl: config.lease_ttl_seconds,
            credits_per_solve: config.credits_per_solve,
            mining_contract: config.mining_contract.clone(),
            tokens: TokenCodec::new(SecretString::from(config.hmac_secret.expose_secret().to_string())),
            epochs: EpochClock::new(config.genesis_utc, config.chain_id),
            signer: ReceiptSigner::from_config(
                config.signer_private_key.as_deref(),
                config.mining_contract.as_deref(),
                config.chain_id,
            ),
            clock,
            store: None,
            metrics: CoordinatorMetrics::new(),
        }
    }

    pub fn with_store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn metrics(&self) -> &CoordinatorMetrics {
        &self.metrics
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub fn register(&self, req: &RegisterRequest) -> Result<RegisterResponse, CoordinatorError> {
        let miner = normalize_miner(&req.miner_address)?;
        if req.agent_public_key.is_empty() {
            return Err(CoordinatorError::InvalidFields);
        }
        AgentPublicKey::from_spki_base64(&req.agent_public_key)
            .map_err(|_| CoordinatorError::InvalidAgentPublicKey)?;

        let now = self.clock.unix_seconds();
        let server_nonce = new_server_nonce();
        let claim = RegistrationClaim {
            miner_address: miner,
            agent_public_key: req.agent_public_key.clone(),
            server_nonce: server_nonce.clone(),
        };
        let registration_token = self
            .tokens
            .issue(TokenKind::Register, &claim, self.register_ttl, now)
            .map_err(CoordinatorError::Issue)?;
        let message_to_sign = prove_message(&miner, self.chain_id, &server_nonce);

        self.persist(|s| {
            store::record_registration(
                s,
                &RegistrationRecord {
                    miner_address: miner,
                    agent_public_key: claim.agent_public_key.clone(),
                    server_nonce: server_nonce.clone(),
                    registered_at: now,
                },
            )
        });
        self.metrics.record_registration();
        info!(miner = %miner, "registration issued");

        Ok(RegisterResponse {
            miner_address: miner,
            message_to_sign_base64: STANDARD.encode(message_to_sign.as_bytes()),
            message_to_sign,
            server_nonce,
            registration_token,
        })
    }

    /// Registration tokens are not single-use: replaying a still-valid
    /// token with the same signatures mints another independent lease.
    pub fn prove(&self, req: &ProveRequest) -> Result<ProveResponse, CoordinatorError> {
        let miner = normalize_miner(&req.miner_address)?;
        if req.wallet_sig.is_empty() || req.agent_sig.is_empty() || req.registration_token.is_empty() {
            return Err(CoordinatorError::InvalidFields);
        }

        let now = self.clock.unix_seconds();
        let registration: Verified<RegistrationClaim> = self
            .tokens
            .verify(&req.registration_token, TokenKind::Register, now)
            .map_err(CoordinatorError::InvalidRegistrationToken)?;
        let claim = registration.payload;
        if claim.miner_address != miner {
            return Err(CoordinatorError::RegistrationMinerMismatch);
        }

        let agent_key = AgentPublicKey::from_spki_base64(&claim.agent_public_key)
            .map_err(|_| CoordinatorError::InvalidRegisteredKey)?;
        let agent_sig = STANDARD
            .decode(req.agent_sig.trim())
            .map_err(|_| CoordinatorError::InvalidAgentSignature)?;
        // Rebuilt from the token, never from the request.
        let message = prove_message(&claim.miner_address, self.chain_id, &claim.server_nonce);

        let proofs = [
            Proof::AgentKey {
                public_key: &agent_key,
                message: claim.server_nonce.as_bytes(),
                signature: &agent_sig,
            },
            Proof::Wallet { expected: miner, message: &message, signature: req.wallet_sig.trim() },
        ];
        for proof in &proofs {
            if let Err(e) = proof.verify() {
                self.metrics.record_proof(ProofOutcome::Rejected);
                warn!(miner = %miner, reason = e.code(), "lease proof rejected");
                return Err(e.into());
            }
        }

        let lease_token = self.mint_lease(miner, now)?;
        self.metrics.record_proof(ProofOutcome::Accepted);
        info!(miner = %miner, "lease issued");

        Ok(ProveResponse { lease_token, expires_in_seconds: self.lease_ttl, miner_address: miner })
    }

    /// Issues a fresh lease; the presented one stays valid until its own expiry.
    pub fn renew(&self, req: &RenewRequest) -> Result<RenewResponse, CoordinatorError> {
        if req.lease_token.is_empty() {
            return Err(CoordinatorError::MissingLeaseToken);
        }
        let now = self.clock.unix_seconds();
        let lease: Verified<LeaseClaim> = self
            .tokens
            .verify(&req.lease_token, TokenKind::Lease, now)
            .map_err(CoordinatorError::InvalidLease)?;

        let lease_token = self.mint_lease(lease.payload.miner_address, now)?;
        self.metrics.record_renewal();
        debug!(miner = %lease.payload.miner_address, "lease renewed");

        Ok(RenewResponse { lease_token, expires_in_seconds: self.lease_ttl })
    }

    /// Resolves an `Authorization` header value to the leased miner.
    pub fn authorize(&self, authorization: Option<&str>) -> Result<Address, CoordinatorError> {
        let token = bearer_token(authorization).ok_or(CoordinatorError::MissingLease)?;
        let lease: Verified<LeaseClaim> = self
            .tokens
            .verify(token, TokenKind::Lease, self.clock.unix_seconds())
            .map_err(CoordinatorError::InvalidLease)?;
        Ok(lease.payload.miner_address)
    }

    pub fn challenge(&self, miner: &Address, nonce: Option<&str>) -> Result<ChallengeResponse, CoordinatorError> {
        let nonce = nonce
            .filter(|n| challenge::is_valid_nonce(n))
            .ok_or(CoordinatorError::InvalidNonce)?;
        let epoch_id = self.epochs.epoch_id_at(self.clock.now());
        let pack = make_challenge(epoch_id, miner, nonce);
        self.metrics.record_challenge();

        Ok(ChallengeResponse {
            epoch_id,
            miner_address: *miner,
            nonce: nonce.to_string(),
            challenge_id: pack.seed.to_string(),
            doc: pack.doc,
            questions: pack.questions,
            constraints: pack.constraints,
            credits_per_solve: self.credits_per_solve,
            difficulty: crate::epoch::DIFFICULTY,
        })
    }

    /// Re-derives the challenge for the current epoch and checks the
    /// artifact. A wrong answer is `Ok` with `pass: false`.
    pub fn submit(&self, miner: &Address, req: &SubmitRequest) -> Result<SubmitResponse, CoordinatorError> {
        if !challenge::is_valid_nonce(&req.nonce) {
            return Err(CoordinatorError::InvalidNonce);
        }
        let now = self.clock.now();
        let epoch_id = self.epochs.epoch_id_at(now);
        let pack = make_challenge(epoch_id, miner, &req.nonce);

        if let Err(rejection) = verify_artifact(&pack.expected_artifact, req.artifact.as_ref()) {
            self.metrics.record_failed_solve();
            debug!(miner = %miner, reason = rejection.reason(), "solve rejected");
            return Ok(SubmitResponse::Rejected(SolveRejected {
                pass: false,
                epoch_id,
                reason: rejection.reason().to_string(),
                expected_artifact: rejection.expected_artifact().map(str::to_string),
            }));
        }

        let credits = self.credits_per_solve;
        let receipt = Receipt::build(
            self.chain_id,
            epoch_id,
            *miner,
            &pack,
            &req.nonce,
            credits,
            now.timestamp().max(0) as u64,
        );
        let signed = self.signer.sign(&receipt);
        if let Some(w) = signed.warning {
            warn!(warning = w.code(), "receipt left unsigned");
        }
        self.metrics.record_solve(epoch_id, *miner, credits, signed.signature.is_some());
        info!(miner = %miner, epoch_id, credits, "solve accepted");

        Ok(SubmitResponse::Accepted(SolveAccepted {
            pass: true,
            epoch_id,
            credits,
            artifact: pack.expected_artifact,
            receipt,
            signature: signed.signature,
            signer: signed.signer,
            warning: signed.warning.map(|w| w.code().to_string()),
        }))
    }

    pub fn epoch(&self) -> EpochResponse {
        EpochResponse { info: self.epochs.info_at(self.clock.now()), tier: REWARD_TIERS }
    }

    pub fn stats(&self) -> StatsResponse {
        let info = self.epochs.info_at(self.clock.now());
        let snapshot = self.metrics.epoch_snapshot(info.epoch_id);
        StatsResponse {
            epoch_id: info.epoch_id,
            active_agents: snapshot.active_agents,
            total_credits_epoch: snapshot.credits,
            minted_total: info.minted_total,
            solves_total: self.metrics.solves_total(),
        }
    }

    pub fn config_view(&self) -> ConfigResponse {
        ConfigResponse {
            chain_id: self.chain_id,
            mining_contract: self.mining_contract.clone(),
            coordinator_signer: self.signer.signer_address(),
            token_mode: TOKEN_MODE.to_string(),
        }
    }

    /// Looks up a recorded registration; without a store every miner is unknown.
    pub fn agent(&self, miner: &str) -> Result<RegistrationRecord, CoordinatorError> {
        let miner = normalize_miner(miner)?;
        let Some(store) = &self.store else {
            return Err(CoordinatorError::UnknownMiner);
        };
        store::find_registration(store.as_ref(), &miner)?.ok_or(CoordinatorError::UnknownMiner)
    }

    fn mint_lease(&self, miner: Address, now: i64) -> Result<String, CoordinatorError> {
        let claim = LeaseClaim { miner_address: miner, lease_id: new_lease_id() };
        let token = self
            .tokens
            .issue(TokenKind::Lease, &claim, self.lease_ttl, now)
            .map_err(CoordinatorError::Issue)?;
        self.persist(|s| {
            store::record_lease(
                s,
                &token,
                &LeaseRecord {
                    miner_address: miner,
                    issued_at: now,
                    expires_at: now.saturating_add(self.lease_ttl as i64),
                },
            )
        });
        Ok(token)
    }

    // Bookkeeping only; a failed write never blocks the protocol.
    fn persist(&self, write: impl FnOnce(&dyn StateStore) -> Result<(), store::StoreError>) {
        if let Some(store) = &self.store {
            if let Err(e) = write(store.as_ref()) {
                warn!(error = %e, "state store write failed");
            }
        }
    }
}
