use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use ed25519_dalek::{Signer, SigningKey};
use rand::rngs::OsRng;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use thiserror::Error;

use crate::proof::{AgentKeyError, AgentPublicKey};
use crate::types::*;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("coordinator returned {status}: {body}")]
    Api { status: u16, body: Value },
}

impl ClientError {
    /// The coordinator's `error` code, when the failure came from it.
    pub fn code(&self) -> Option<&str> {
        match self {
            ClientError::Api { body, .. } => body.get("error").and_then(Value::as_str),
            ClientError::Http(_) => None,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Api { status, .. } => Some(*status),
            ClientError::Http(e) => e.status().map(|s| s.as_u16()),
        }
    }
}

/// Ephemeral agent signing key.
pub struct AgentKey {
    key: SigningKey,
}

impl AgentKey {
    pub fn generate() -> Self {
        Self { key: SigningKey::generate(&mut OsRng) }
    }

    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self { key: SigningKey::from_bytes(&seed) }
    }

    pub fn public_key(&self) -> AgentPublicKey {
        AgentPublicKey::from(self.key.verifying_key())
    }

    /// Base64 SPKI DER, as `register` expects it.
    pub fn public_key_spki_base64(&self) -> Result<String, AgentKeyError> {
        self.public_key().to_spki_base64()
    }

    /// Base64 signature over the UTF-8 bytes of the server nonce.
    pub fn sign_nonce(&self, server_nonce: &str) -> String {
        STANDARD.encode(self.key.sign(server_nonce.as_bytes()).to_bytes())
    }
}

pub struct CoordinatorClient {
    base_url: String,
    http: reqwest::Client,
}

impl CoordinatorClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    pub async fn register(&self, miner: &str, agent_public_key: &str) -> Result<RegisterResponse, ClientError> {
        self.post(
            "/v1/agent/register",
            None,
            &json!({ "minerAddress": miner, "agentPublicKey": agent_public_key }),
        )
        .await
    }

    pub async fn prove(&self, req: &ProveRequest) -> Result<ProveResponse, ClientError> {
        self.post("/v1/agent/prove", None, req).await
    }

    pub async fn renew(&self, lease_token: &str) -> Result<RenewResponse, ClientError> {
        self.post("/v1/agent/renew", None, &json!({ "leaseToken": lease_token })).await
    }

    pub async fn challenge(&self, lease_token: &str, nonce: &str) -> Result<ChallengeResponse, ClientError> {
        let resp = self
            .http
            .get(format!("{}/v1/challenge", self.base_url))
            .query(&[("nonce", nonce)])
            .bearer_auth(lease_token)
            .send()
            .await?;
        Self::decode(resp).await
    }

    pub async fn submit(&self, lease_token: &str, nonce: &str, artifact: &str) -> Result<SubmitResponse, ClientError> {
        self.post("/v1/submit", Some(lease_token), &json!({ "nonce": nonce, "artifact": artifact }))
            .await
    }

    pub async fn epoch(&self) -> Result<EpochResponse, ClientError> {
        self.get("/v1/epoch").await
    }

    pub async fn stats(&self) -> Result<StatsResponse, ClientError> {
        self.get("/v1/stats").await
    }

    pub async fn config(&self) -> Result<ConfigResponse, ClientError> {
        self.get("/v1/config").await
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        let resp = self.http.get(format!("{}{path}", self.base_url)).send().await?;
        Self::decode(resp).await
    }

    async fn post<B, T>(&self, path: &str, bearer: Option<&str>, body: &B) -> Result<T, ClientError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let mut req = self.http.post(format!("{}{path}", self.base_url)).json(body);
        if let Some(token) = bearer {
            req = req.bearer_auth(token);
        }
        Self::decode(req.send().await?).await
    }

    async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, ClientError> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.json::<Value>().await.unwrap_or(Value::Null);
            return Err(ClientError::Api { status: status.as_u16(), body });
        }
        Ok(resp.json::<T>().await?)
    }
}
