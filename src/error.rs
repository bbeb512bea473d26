use serde_json::{Value, json};
use thiserror::Error;

use crate::proof::ProofError;
use crate::store::StoreError;
use crate::token::TokenError;

/// Protocol failure with a fixed HTTP status and wire code.
///
/// A wrong artifact is deliberately not represented here: it is a normal
/// `pass: false` outcome.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("invalid_json")]
    InvalidJson,
    #[error("missing_or_invalid_fields")]
    InvalidFields,
    #[error("invalid_agentPubKey")]
    InvalidAgentPublicKey,
    #[error("invalid_agentSig")]
    InvalidAgentSignature,
    #[error("missing_leaseToken")]
    MissingLeaseToken,
    #[error("missing_or_invalid_nonce")]
    InvalidNonce,

    #[error("missing_lease")]
    MissingLease,

    #[error("invalid_lease: {0}")]
    InvalidLease(TokenError),
    #[error("invalid_register_token: {0}")]
    InvalidRegistrationToken(TokenError),
    #[error("register_token_miner_mismatch")]
    RegistrationMinerMismatch,
    #[error("invalid_register_key")]
    InvalidRegisteredKey,
    #[error(transparent)]
    Proof(#[from] ProofError),

    #[error("unknown_miner")]
    UnknownMiner,
    #[error("not_found")]
    NotFound,

    #[error("token issuance failed: {0}")]
    Issue(TokenError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl CoordinatorError {
    pub fn status(&self) -> u16 {
        use CoordinatorError::*;
        match self {
            InvalidJson | InvalidFields | InvalidAgentPublicKey | InvalidAgentSignature
            | MissingLeaseToken | InvalidNonce => 400,
            MissingLease => 401,
            InvalidLease(_) | InvalidRegistrationToken(_) | RegistrationMinerMismatch
            | InvalidRegisteredKey | Proof(_) => 403,
            UnknownMiner | NotFound => 404,
            Issue(_) | Store(_) => 500,
        }
    }

    pub fn code(&self) -> &'static str {
        use CoordinatorError::*;
        match self {
            InvalidJson => "invalid_json",
            InvalidFields => "missing_or_invalid_fields",
            InvalidAgentPublicKey => "invalid_agentPubKey",
            InvalidAgentSignature => "invalid_agentSig",
            MissingLeaseToken => "missing_leaseToken",
            InvalidNonce => "missing_or_invalid_nonce",
            MissingLease => "missing_lease",
            InvalidLease(_) => "invalid_lease",
            InvalidRegistrationToken(_) => "invalid_register_token",
            RegistrationMinerMismatch => "register_token_miner_mismatch",
            InvalidRegisteredKey => "invalid_register_key",
            Proof(e) => e.code(),
            UnknownMiner => "unknown_miner",
            NotFound => "not_found",
            Issue(_) | Store(_) => "internal_error",
        }
    }

    /// The token check that failed, for token-carrying errors.
    pub fn reason(&self) -> Option<&'static str> {
        match self {
            CoordinatorError::InvalidLease(e) | CoordinatorError::InvalidRegistrationToken(e) => {
                Some(e.reason())
            }
            _ => None,
        }
    }

    pub fn to_body(&self) -> Value {
        match self.reason() {
            Some(reason) => json!({ "error": self.code(), "reason": reason }),
            None => json!({ "error": self.code() }),
        }
    }
}
