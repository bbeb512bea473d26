use k256::ecdsa::SigningKey;
use serde::{Deserialize, Serialize};

use crate::eth::{self, Address};
use crate::receipt::Receipt;

pub const DOMAIN_NAME: &str = "ClawMiner";
pub const DOMAIN_VERSION: &str = "1";
const DOMAIN_TYPE: &str =
    "EIP712Domain(string name,string version,uint256 chainId,address verifyingContract)";
const RECEIPT_TYPE: &str = "Receipt(uint256 chainId,uint256 epochId,address miner,bytes32 challengeId,bytes32 nonceHash,uint256 creditsAmount,bytes32 artifactHash,uint256 issuedAt)";

fn uint_word(v: u64) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[24..].copy_from_slice(&v.to_be_bytes());
    word
}

fn hash_words(words: &[[u8; 32]]) -> [u8; 32] {
    eth::keccak256(&words.concat())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Eip712Domain {
    pub chain_id: u64,
    pub verifying_contract: Address,
}

impl Eip712Domain {
    pub fn separator(&self) -> [u8; 32] {
        hash_words(&[
            eth::keccak256(DOMAIN_TYPE.as_bytes()),
            eth::keccak256(DOMAIN_NAME.as_bytes()),
            eth::keccak256(DOMAIN_VERSION.as_bytes()),
            uint_word(self.chain_id),
            self.verifying_contract.to_word(),
        ])
    }
}

pub fn receipt_struct_hash(r: &Receipt) -> [u8; 32] {
    hash_words(&[
        eth::keccak256(RECEIPT_TYPE.as_bytes()),
        uint_word(r.chain_id),
        uint_word(r.epoch_id),
        r.miner_address.to_word(),
        r.challenge_id.0,
        r.nonce_hash.0,
        uint_word(r.credits_amount),
        r.artifact_hash.0,
        uint_word(r.issued_at),
    ])
}

/// `keccak256(0x19 0x01 || domainSeparator || structHash)`
pub fn receipt_digest(domain: &Eip712Domain, r: &Receipt) -> [u8; 32] {
    let mut buf = Vec::with_capacity(66);
    buf.extend_from_slice(&[0x19, 0x01]);
    buf.extend_from_slice(&domain.separator());
    buf.extend_from_slice(&receipt_struct_hash(r));
    eth::keccak256(&buf)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SigningWarning {
    MissingOrInvalidSigner,
    MissingOrInvalidMiningContract,
    ReceiptSigningFailed,
}

impl SigningWarning {
    pub fn code(&self) -> &'static str {
        match self {
            SigningWarning::MissingOrInvalidSigner => "missing_or_invalid_signer",
            SigningWarning::MissingOrInvalidMiningContract => "missing_or_invalid_mining_contract",
            SigningWarning::ReceiptSigningFailed => "receipt_signing_failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiptSignature {
    pub signature: Option<String>,
    pub signer: Option<Address>,
    pub warning: Option<SigningWarning>,
}

impl ReceiptSignature {
    fn unsigned(warning: SigningWarning) -> Self {
        Self { signature: None, signer: None, warning: Some(warning) }
    }
}

pub struct ReceiptSigner {
    key: Option<SigningKey>,
    verifying_contract: Option<Address>,
    chain_id: u64,
}

impl ReceiptSigner {
    /// Malformed values are treated the same as absent ones.
    pub fn from_config(private_key: Option<&str>, mining_contract: Option<&str>, chain_id: u64) -> Self {
        Self {
            key: private_key.and_then(eth::signing_key_from_hex),
            verifying_contract: mining_contract.and_then(|c| Address::parse(c).ok()),
            chain_id,
        }
    }

    pub fn signer_address(&self) -> Option<Address> {
        self.key.as_ref().map(|k| Address::from_verifying_key(k.verifying_key()))
    }

    pub fn domain(&self) -> Option<Eip712Domain> {
        self.verifying_contract
            .map(|verifying_contract| Eip712Domain { chain_id: self.chain_id, verifying_contract })
    }

    pub fn sign(&self, receipt: &Receipt) -> ReceiptSignature {
        let Some(key) = &self.key else {
            return ReceiptSignature::unsigned(SigningWarning::MissingOrInvalidSigner);
        };
        let Some(domain) = self.domain() else {
            return ReceiptSignature::unsigned(SigningWarning::MissingOrInvalidMiningContract);
        };
        match eth::sign_prehash(key, &receipt_digest(&domain, receipt)) {
            Ok(signature) => ReceiptSignature {
                signature: Some(signature),
                signer: self.signer_address(),
                warning: None,
            },
            Err(e) => {
                tracing::warn!(error = %e, "receipt signing failed");
                ReceiptSignature::unsigned(SigningWarning::ReceiptSigningFailed)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eth::H256;

    const KEY: &str = "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";
    const CONTRACT: &str = "0x1111111111111111111111111111111111111111";

    fn receipt() -> Receipt {
        Receipt {
            chain_id: 56,
            epoch_id: 3,
            miner_address: Address([0xab; 20]),
            challenge_id: H256([1; 32]),
            nonce_hash: H256([2; 32]),
            credits_amount: 1,
            artifact_hash: H256([3; 32]),
            issued_at: 1_772_000_000,
        }
    }

    #[test]
    fn signature_recovers_to_signer() {
        let signer = ReceiptSigner::from_config(Some(KEY), Some(CONTRACT), 56);
        let r = receipt();
        let signed = signer.sign(&r);
        assert_eq!(signed.warning, None);
        let sig = signed.signature.unwrap();
        assert_eq!(sig.len(), 2 + 130);

        let digest = receipt_digest(&signer.domain().unwrap(), &r);
        let recovered = eth::recover_prehash(&digest, &hex::decode(&sig[2..]).unwrap()).unwrap();
        assert_eq!(Some(recovered), signed.signer);
        assert_eq!(signed.signer, signer.signer_address());
    }

    #[test]
    fn missing_key_is_soft_failure() {
        let signed = ReceiptSigner::from_config(None, Some(CONTRACT), 56).sign(&receipt());
        assert_eq!(signed.signature, None);
        assert_eq!(signed.warning, Some(SigningWarning::MissingOrInvalidSigner));

        let malformed = ReceiptSigner::from_config(Some("0x1234"), Some(CONTRACT), 56);
        assert_eq!(malformed.sign(&receipt()).warning, Some(SigningWarning::MissingOrInvalidSigner));
    }

    #[test]
    fn missing_contract_is_soft_failure() {
        let signer = ReceiptSigner::from_config(Some(KEY), Some("not-an-address"), 56);
        let signed = signer.sign(&receipt());
        assert_eq!(signed.signature, None);
        assert_eq!(signed.signer, None);
        assert_eq!(signed.warning.map(|w| w.code()), Some("missing_or_invalid_mining_contract"));
    }

    #[test]
    fn digest_binds_domain_and_every_field() {
        let domain = Eip712Domain { chain_id: 56, verifying_contract: Address([0x11; 20]) };
        let base = receipt_digest(&domain, &receipt());

        let other_chain = Eip712Domain { chain_id: 97, ..domain };
        assert_ne!(receipt_digest(&other_chain, &receipt()), base);

        let mut bumped = receipt();
        bumped.credits_amount = 2;
        assert_ne!(receipt_digest(&domain, &bumped), base);

        let mut later = receipt();
        later.issued_at += 1;
        assert_ne!(receipt_digest(&domain, &later), base);
    }
}
