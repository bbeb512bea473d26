//! Addresses, Keccak-256 and recoverable secp256k1 signatures.

use std::fmt;
use std::str::FromStr;

use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha3::{Digest, Keccak256};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("address must be 0x followed by 40 hex digits")]
    Format,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RecoverError {
    #[error("signature is not 0x-prefixed 65-byte hex")]
    Malformed,
    #[error("invalid recovery id")]
    RecoveryId,
    #[error("public key recovery failed")]
    Unrecoverable,
}

/// 20-byte account address; always rendered as lowercase `0x` hex.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address(pub [u8; 20]);

impl Address {
    /// Accepts `0x` + 40 hex digits in any case.
    pub fn parse(s: &str) -> Result<Self, AddressError> {
        let digits = s.strip_prefix("0x").ok_or(AddressError::Format)?;
        if digits.len() != 40 {
            return Err(AddressError::Format);
        }
        let mut out = [0u8; 20];
        hex::decode_to_slice(digits, &mut out).map_err(|_| AddressError::Format)?;
        Ok(Self(out))
    }

    pub fn from_verifying_key(key: &VerifyingKey) -> Self {
        let point = key.to_encoded_point(false);
        let hash = keccak256(&point.as_bytes()[1..]);
        let mut out = [0u8; 20];
        out.copy_from_slice(&hash[12..]);
        Self(out)
    }

    pub const fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// ABI encoding: left-padded to a 32-byte word.
    pub fn to_word(&self) -> [u8; 32] {
        let mut word = [0u8; 32];
        word[12..].copy_from_slice(&self.0);
        word
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({self})")
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// 32-byte value rendered as `0x` hex (`bytes32`).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct H256(pub [u8; 32]);

impl H256 {
    pub fn from_hex(s: &str) -> Option<Self> {
        let mut out = [0u8; 32];
        hex::decode_to_slice(s.strip_prefix("0x").unwrap_or(s), &mut out).ok()?;
        Some(Self(out))
    }
}

impl fmt::Display for H256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for H256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "H256({self})")
    }
}

impl Serialize for H256 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for H256 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).ok_or_else(|| serde::de::Error::custom("expected 0x + 64 hex digits"))
    }
}

pub fn keccak256(data: &[u8]) -> [u8; 32] {
    Keccak256::digest(data).into()
}

/// EIP-191 version 0x45 digest of a UTF-8 message.
pub fn personal_message_hash(message: &str) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(format!("\x19Ethereum Signed Message:\n{}", message.len()).as_bytes());
    hasher.update(message.as_bytes());
    hasher.finalize().into()
}

/// Recovers the address that produced `signature_hex` over `message`.
pub fn recover_personal_signer(message: &str, signature_hex: &str) -> Result<Address, RecoverError> {
    let raw = signature_hex.strip_prefix("0x").ok_or(RecoverError::Malformed)?;
    let bytes = hex::decode(raw).map_err(|_| RecoverError::Malformed)?;
    recover_prehash(&personal_message_hash(message), &bytes)
}

/// `signature` is `r || s || v` with `v` in {0, 1, 27, 28}.
pub fn recover_prehash(digest: &[u8; 32], signature: &[u8]) -> Result<Address, RecoverError> {
    if signature.len() != 65 {
        return Err(RecoverError::Malformed);
    }
    let v = match signature[64] {
        v @ (0 | 1) => v,
        v @ (27 | 28) => v - 27,
        _ => return Err(RecoverError::RecoveryId),
    };
    let mut sig = Signature::from_slice(&signature[..64]).map_err(|_| RecoverError::Malformed)?;
    let mut recid = RecoveryId::from_byte(v).ok_or(RecoverError::RecoveryId)?;
    if let Some(low) = sig.normalize_s() {
        sig = low;
        recid = RecoveryId::new(!recid.is_y_odd(), recid.is_x_reduced());
    }
    let key = VerifyingKey::recover_from_prehash(digest, &sig, recid)
        .map_err(|_| RecoverError::Unrecoverable)?;
    Ok(Address::from_verifying_key(&key))
}

/// Signs a 32-byte digest, returning `0x` + `r || s || v` with `v` in {27, 28}.
pub fn sign_prehash(key: &SigningKey, digest: &[u8; 32]) -> Result<String, k256::ecdsa::Error> {
    let (sig, recid) = key.sign_prehash_recoverable(digest)?;
    let mut out = Vec::with_capacity(65);
    out.extend_from_slice(&sig.to_bytes());
    out.push(27 + recid.to_byte());
    Ok(format!("0x{}", hex::encode(out)))
}

/// Wallet-side `personal_sign`.
pub fn sign_personal_message(key: &SigningKey, message: &str) -> Result<String, k256::ecdsa::Error> {
    sign_prehash(key, &personal_message_hash(message))
}

/// Parses `0x` + 64 hex digits into a secp256k1 key.
pub fn signing_key_from_hex(s: &str) -> Option<SigningKey> {
    let digits = s.strip_prefix("0x")?;
    if digits.len() != 64 {
        return None;
    }
    let bytes = hex::decode(digits).ok()?;
    SigningKey::from_slice(&bytes).ok()
}
