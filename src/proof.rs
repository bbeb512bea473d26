use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use ed25519_dalek::pkcs8::{DecodePublicKey, EncodePublicKey};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use thiserror::Error;

use crate::eth::{self, Address};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ProofError {
    #[error("agentSig_verify_failed")]
    AgentSigVerifyFailed,
    #[error("walletSig_recover_failed")]
    WalletSigRecoverFailed,
    #[error("walletSig_not_miner")]
    WalletSigNotMiner,
}

impl ProofError {
    pub fn code(&self) -> &'static str {
        match self {
            ProofError::AgentSigVerifyFailed => "agentSig_verify_failed",
            ProofError::WalletSigRecoverFailed => "walletSig_recover_failed",
            ProofError::WalletSigNotMiner => "walletSig_not_miner",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("not a base64 SPKI DER Ed25519 public key")]
pub struct AgentKeyError;

/// Ed25519 agent public key, exchanged as base64 SPKI DER.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgentPublicKey(VerifyingKey);

impl AgentPublicKey {
    pub fn from_spki_base64(b64: &str) -> Result<Self, AgentKeyError> {
        let der = STANDARD.decode(b64.trim()).map_err(|_| AgentKeyError)?;
        VerifyingKey::from_public_key_der(&der)
            .map(Self)
            .map_err(|_| AgentKeyError)
    }

    pub fn to_spki_base64(&self) -> Result<String, AgentKeyError> {
        let doc = self.0.to_public_key_der().map_err(|_| AgentKeyError)?;
        Ok(STANDARD.encode(doc.as_bytes()))
    }

    pub fn verifying_key(&self) -> &VerifyingKey {
        &self.0
    }
}

impl From<VerifyingKey> for AgentPublicKey {
    fn from(key: VerifyingKey) -> Self {
        Self(key)
    }
}

/// A possession proof and the materials needed to check it.
#[derive(Debug, Clone, Copy)]
pub enum Proof<'a> {
    /// Agent signed `message` (the server nonce) with its Ed25519 key.
    AgentKey {
        public_key: &'a AgentPublicKey,
        message: &'a [u8],
        signature: &'a [u8],
    },
    /// Wallet `personal_sign`ed `message`; the signer must be `expected`.
    Wallet {
        expected: Address,
        message: &'a str,
        signature: &'a str,
    },
}

impl Proof<'_> {
    pub fn verify(&self) -> Result<(), ProofError> {
        match *self {
            Proof::AgentKey { public_key, message, signature } => {
                let sig = Signature::from_slice(signature)
                    .map_err(|_| ProofError::AgentSigVerifyFailed)?;
                public_key
                    .verifying_key()
                    .verify(message, &sig)
                    .map_err(|_| ProofError::AgentSigVerifyFailed)
            }
            Proof::Wallet { expected, message, signature } => {
                let recovered = eth::recover_personal_signer(message, signature)
                    .map_err(|_| ProofError::WalletSigRecoverFailed)?;
                if recovered == expected {
                    Ok(())
                } else {
                    Err(ProofError::WalletSigNotMiner)
                }
            }
        }
    }

    pub fn is_valid(&self) -> bool {
        self.verify().is_ok()
    }
}
