//! Tokens are `base64url(envelope) "." base64url(hmac_sha256(body))`; the MAC covers the encoded body as sent.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

pub const TOKEN_VERSION: u64 = 1;
const MIN_TOKEN_LEN: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Register,
    Lease,
}

impl TokenKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenKind::Register => "register",
            TokenKind::Lease => "lease",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TokenError {
    #[error("invalid_format")]
    InvalidFormat,
    #[error("invalid_signature")]
    InvalidSignature,
    #[error("invalid_payload")]
    InvalidPayload,
    #[error("wrong_kind")]
    WrongKind,
    #[error("expired")]
    Expired,
    #[error("invalid_secret")]
    InvalidSecret,
}

impl TokenError {
    /// Wire reason code.
    pub fn reason(&self) -> &'static str {
        match self {
            TokenError::InvalidFormat => "invalid_format",
            TokenError::InvalidSignature => "invalid_signature",
            TokenError::InvalidPayload => "invalid_payload",
            TokenError::WrongKind => "wrong_kind",
            TokenError::Expired => "expired",
            TokenError::InvalidSecret => "invalid_secret",
        }
    }
}

#[derive(Serialize)]
struct EnvelopeOut<'a, T> {
    v: u64,
    kind: TokenKind,
    iat: i64,
    exp: i64,
    payload: &'a T,
}

// Kind and version are read loosely so that an unknown kind reports
// `wrong_kind` rather than `invalid_payload`.
#[derive(Deserialize)]
struct EnvelopeIn {
    v: serde_json::Value,
    kind: serde_json::Value,
    iat: i64,
    exp: i64,
    payload: serde_json::Value,
}

/// A successfully verified token.
#[derive(Debug, Clone, PartialEq)]
pub struct Verified<T> {
    pub payload: T,
    pub issued_at: i64,
    pub expires_at: i64,
}

pub struct TokenCodec {
    secret: SecretString,
}

impl std::fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCodec").finish_non_exhaustive()
    }
}

impl TokenCodec {
    pub fn new(secret: SecretString) -> Self {
        Self { secret }
    }

    pub fn issue<T: Serialize>(
        &self,
        kind: TokenKind,
        payload: &T,
        ttl_seconds: u64,
        now: i64,
    ) -> Result<String, TokenError> {
        let envelope = EnvelopeOut {
            v: TOKEN_VERSION,
            kind,
            iat: now,
            exp: now.saturating_add(ttl_seconds.min(i64::MAX as u64) as i64),
            payload,
        };
        let json = serde_json::to_vec(&envelope).map_err(|_| TokenError::InvalidPayload)?;
        let body = URL_SAFE_NO_PAD.encode(json);
        let sig = self.sign_body(&body)?;
        Ok(format!("{body}.{sig}"))
    }

    pub fn verify<T: DeserializeOwned>(
        &self,
        token: &str,
        expected: TokenKind,
        now: i64,
    ) -> Result<Verified<T>, TokenError> {
        if token.len() < MIN_TOKEN_LEN {
            return Err(TokenError::InvalidFormat);
        }
        let (body, sig) = token.split_once('.').ok_or(TokenError::InvalidFormat)?;
        if body.is_empty() || sig.is_empty() || sig.contains('.') {
            return Err(TokenError::InvalidFormat);
        }

        let expected_sig = self.sign_body(body)?;
        if !bool::from(expected_sig.as_bytes().ct_eq(sig.as_bytes())) {
            return Err(TokenError::InvalidSignature);
        }

        let raw = URL_SAFE_NO_PAD
            .decode(body)
            .map_err(|_| TokenError::InvalidPayload)?;
        let envelope: EnvelopeIn =
            serde_json::from_slice(&raw).map_err(|_| TokenError::InvalidPayload)?;

        if envelope.v.as_u64() != Some(TOKEN_VERSION)
            || envelope.kind.as_str() != Some(expected.as_str())
        {
            return Err(TokenError::WrongKind);
        }
        if envelope.exp < now {
            return Err(TokenError::Expired);
        }

        let payload =
            serde_json::from_value(envelope.payload).map_err(|_| TokenError::InvalidPayload)?;
        Ok(Verified { payload, issued_at: envelope.iat, expires_at: envelope.exp })
    }

    fn sign_body(&self, body: &str) -> Result<String, TokenError> {
        let mut mac = HmacSha256::new_from_slice(self.secret.expose_secret().as_bytes())
            .map_err(|_| TokenError::InvalidSecret)?;
        mac.update(body.as_bytes());
        Ok(URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes()))
    }
}
