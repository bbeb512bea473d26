use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::epoch::{EpochInfo, RewardTiers};
use crate::error::CoordinatorError;
use crate::eth::Address;
use crate::receipt::Receipt;

// Token payloads. Validity windows live in the token envelope.

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationClaim {
    pub miner_address: Address,
    pub agent_public_key: String,
    pub server_nonce: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaseClaim {
    pub miner_address: Address,
    /// Random per issuance so that two leases minted in the same second
    /// are still distinct tokens.
    pub lease_id: String,
}

// Requests. Fields stay raw strings; format checks happen in the coordinator
// so each failure keeps its own error code.

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub miner_address: String,
    pub agent_public_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProveRequest {
    pub miner_address: String,
    pub wallet_sig: String,
    pub agent_sig: String,
    pub registration_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenewRequest {
    pub lease_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub nonce: String,
    #[serde(default)]
    pub artifact: Option<Value>,
}

/// Decodes a JSON body once: unparseable bytes are `invalid_json`, a
/// body of the wrong shape is `shape_error`.
pub fn decode_body<T: DeserializeOwned>(
    body: &[u8],
    shape_error: CoordinatorError,
) -> Result<T, CoordinatorError> {
    let value: Value = serde_json::from_slice(body).map_err(|_| CoordinatorError::InvalidJson)?;
    serde_json::from_value(value).map_err(|_| shape_error)
}

// Responses.

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterResponse {
    pub miner_address: Address,
    pub server_nonce: String,
    pub registration_token: String,
    pub message_to_sign: String,
    pub message_to_sign_base64: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProveResponse {
    pub lease_token: String,
    pub expires_in_seconds: u64,
    pub miner_address: Address,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenewResponse {
    pub lease_token: String,
    pub expires_in_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeResponse {
    pub epoch_id: u64,
    pub miner_address: Address,
    pub nonce: String,
    pub challenge_id: String,
    pub doc: String,
    pub questions: Vec<String>,
    pub constraints: Vec<String>,
    pub credits_per_solve: u64,
    pub difficulty: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SolveAccepted {
    pub pass: bool,
    pub epoch_id: u64,
    pub credits: u64,
    pub artifact: String,
    pub receipt: Receipt,
    /// `null` when settlement signing is not configured.
    pub signature: Option<String>,
    pub signer: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SolveRejected {
    pub pass: bool,
    pub epoch_id: u64,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_artifact: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SubmitResponse {
    Accepted(SolveAccepted),
    Rejected(SolveRejected),
}

impl SubmitResponse {
    pub fn passed(&self) -> bool {
        matches!(self, SubmitResponse::Accepted(_))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochResponse {
    #[serde(flatten)]
    pub info: EpochInfo,
    pub tier: RewardTiers,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsResponse {
    pub epoch_id: u64,
    pub active_agents: u64,
    pub total_credits_epoch: u64,
    pub minted_total: f64,
    pub solves_total: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigResponse {
    pub chain_id: u64,
    pub mining_contract: Option<String>,
    pub coordinator_signer: Option<Address>,
    pub token_mode: String,
}
