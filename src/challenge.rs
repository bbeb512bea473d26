//! Challenges derived from `(epoch_id, miner, nonce)` and artifact checking.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::eth::{Address, H256};

pub const SEED_DOMAIN: &str = "clawminer";
pub const SEED_SEPARATOR: char = '|';
pub const MAX_NONCE_CHARS: usize = 80;
pub const MODULUS: u64 = 97;
const OPERAND_SPAN: u32 = 9_000;
const OPERAND_BASE: u32 = 1_000;

pub fn sha256(text: &str) -> H256 {
    H256(Sha256::digest(text.as_bytes()).into())
}

/// Non-empty, at most 80 characters, and free of the seed separator.
pub fn is_valid_nonce(nonce: &str) -> bool {
    !nonce.is_empty()
        && nonce.chars().count() <= MAX_NONCE_CHARS
        && !nonce.contains(SEED_SEPARATOR)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengePack {
    /// SHA-256 of the seed preimage; doubles as the challenge id.
    pub seed: H256,
    pub a: u32,
    pub b: u32,
    pub c: u32,
    pub modulus: u64,
    pub answer: u64,
    pub expected_artifact: String,
    pub doc: String,
    pub questions: Vec<String>,
    pub constraints: Vec<String>,
}

pub fn expected_artifact(epoch_id: u64, answer: u64) -> String {
    format!("CLAW-{epoch_id}-{answer}")
}

pub fn make_challenge(epoch_id: u64, miner: &Address, nonce: &str) -> ChallengePack {
    let s = SEED_SEPARATOR;
    let digest = sha256(&format!("{SEED_DOMAIN}{s}{epoch_id}{s}{miner}{s}{nonce}")).0;

    let a = operand(&digest, 0);
    let b = operand(&digest, 1);
    let c = operand(&digest, 2);
    let answer = (u64::from(a) * u64::from(b) + u64::from(c)) % MODULUS;
    let artifact = expected_artifact(epoch_id, answer);

    let doc = [
        "CLAWMINER work package (agent-only)".to_string(),
        format!("epoch={epoch_id}"),
        format!("miner={miner}"),
        format!("nonce={nonce}"),
        String::new(),
        format!("Compute: (a*b + c) mod {MODULUS}"),
        format!("a={a}"),
        format!("b={b}"),
        format!("c={c}"),
        String::new(),
        "Output EXACTLY one line:".to_string(),
        artifact.clone(),
        "No extra characters, no spaces, no punctuation.".to_string(),
    ]
    .join("\n");

    ChallengePack {
        seed: H256(digest),
        a,
        b,
        c,
        modulus: MODULUS,
        answer,
        questions: vec![
            format!("Q1: What is (a*b + c) mod {MODULUS}?"),
            format!("Q2: Return exactly: {artifact}"),
        ],
        constraints: vec![
            "Artifact must be exactly one line".to_string(),
            format!("Artifact must equal: {artifact}"),
        ],
        expected_artifact: artifact,
        doc,
    }
}

// Window `i` is bytes [4i, 4i+4) of the digest, read big-endian.
fn operand(digest: &[u8; 32], i: usize) -> u32 {
    let mut window = [0u8; 4];
    window.copy_from_slice(&digest[i * 4..i * 4 + 4]);
    u32::from_be_bytes(window) % OPERAND_SPAN + OPERAND_BASE
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArtifactRejection {
    #[error("artifact_missing")]
    Missing,
    #[error("artifact_multiline")]
    Multiline,
    #[error("artifact_whitespace")]
    Whitespace,
    #[error("artifact_mismatch")]
    Mismatch { expected_artifact: String },
}

impl ArtifactRejection {
    pub fn reason(&self) -> &'static str {
        match self {
            ArtifactRejection::Missing => "artifact_missing",
            ArtifactRejection::Multiline => "artifact_multiline",
            ArtifactRejection::Whitespace => "artifact_whitespace",
            ArtifactRejection::Mismatch { .. } => "artifact_mismatch",
        }
    }

    pub fn expected_artifact(&self) -> Option<&str> {
        match self {
            ArtifactRejection::Mismatch { expected_artifact } => Some(expected_artifact),
            _ => None,
        }
    }
}

// Unicode whitespace plus the byte-order mark, which `char::is_whitespace` excludes.
fn is_trimmable(c: char) -> bool {
    c.is_whitespace() || c == '\u{FEFF}'
}

/// Exact byte comparison; no trimming or case folding is applied.
pub fn verify_artifact(expected: &str, artifact: Option<&Value>) -> Result<(), ArtifactRejection> {
    let Some(Value::String(artifact)) = artifact else {
        return Err(ArtifactRejection::Missing);
    };
    let artifact = artifact.as_str();
    if artifact.contains(['\n', '\r']) {
        return Err(ArtifactRejection::Multiline);
    }
    if artifact.trim_matches(is_trimmable) != artifact {
        return Err(ArtifactRejection::Whitespace);
    }
    if artifact != expected {
        return Err(ArtifactRejection::Mismatch { expected_artifact: expected.to_string() });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn miner() -> Address {
        Address([0xab; 20])
    }

    #[test]
    fn known_seed_vector() {
        let pack = make_challenge(5, &miner(), "n1");
        assert_eq!(
            pack.seed.to_string(),
            "0x5124c0ee7a6deb23f827b9ad54db4f03488f21a09ffa52aace1dffb0b6213f04"
        );
        assert_eq!((pack.a, pack.b, pack.c), (6182, 8971, 8005));
        assert_eq!(pack.answer, 90);
        assert_eq!(pack.expected_artifact, "CLAW-5-90");
        assert!(pack.doc.lines().any(|l| l == "CLAW-5-90"));
    }

    #[test]
    fn nonce_rules() {
        assert!(is_valid_nonce("n1"));
        assert!(is_valid_nonce(&"x".repeat(80)));
        assert!(!is_valid_nonce(&"x".repeat(81)));
        assert!(!is_valid_nonce(""));
        assert!(!is_valid_nonce("a|b"));
    }

    #[test]
    fn verifier_reasons_in_order() {
        let expected = "CLAW-5-12";
        let reason = |v: Option<&Value>| verify_artifact(expected, v).unwrap_err().reason();

        assert_eq!(reason(None), "artifact_missing");
        assert_eq!(reason(Some(&json!(12))), "artifact_missing");
        assert_eq!(reason(Some(&Value::Null)), "artifact_missing");
        assert_eq!(reason(Some(&json!("CLAW-5-12\n"))), "artifact_multiline");
        assert_eq!(reason(Some(&json!("CLAW-5\r-12"))), "artifact_multiline");
        assert_eq!(reason(Some(&json!(" CLAW-5-12"))), "artifact_whitespace");
        assert_eq!(reason(Some(&json!("claw-5-12"))), "artifact_mismatch");

        let mismatch = verify_artifact(expected, Some(&json!("CLAW-5-13"))).unwrap_err();
        assert_eq!(mismatch.expected_artifact(), Some("CLAW-5-12"));
        assert!(verify_artifact(expected, Some(&json!("CLAW-5-12"))).is_ok());
    }

    #[test]
    fn byte_order_mark_counts_as_padding() {
        let reason = |s: &str| verify_artifact("CLAW-5-12", Some(&json!(s))).unwrap_err().reason();
        assert_eq!(reason("\u{FEFF}CLAW-5-12"), "artifact_whitespace");
        assert_eq!(reason("CLAW-5-12\u{FEFF}"), "artifact_whitespace");
        assert_eq!(reason("CLAW-5-12\u{00A0}"), "artifact_whitespace");
        assert_eq!(reason("CLAW-5-12\t"), "artifact_whitespace");
        // Interior BOM is not padding.
        assert_eq!(reason("CLAW-5\u{FEFF}-12"), "artifact_mismatch");
    }

    proptest! {
        #[test]
        fn challenge_is_deterministic(epoch in 0u64..100_000, bytes in any::<[u8; 20]>(), nonce in "[a-zA-Z0-9_-]{1,80}") {
            let m = Address(bytes);
            let first = make_challenge(epoch, &m, &nonce);
            let second = make_challenge(epoch, &m, &nonce);
            prop_assert_eq!(&first, &second);
            prop_assert!((1000..=9999).contains(&first.a));
            prop_assert!((1000..=9999).contains(&first.b));
            prop_assert!((1000..=9999).contains(&first.c));
            prop_assert_eq!(first.expected_artifact, expected_artifact(epoch, first.answer));
        }

        #[test]
        fn answer_stays_below_modulus(a in 1000u64..=9999, b in 1000u64..=9999, c in 1000u64..=9999) {
            let answer = (a * b + c) % MODULUS;
            prop_assert!(answer <= 96);
        }
    }
}
