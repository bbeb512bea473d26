use serde::{Deserialize, Serialize};

use crate::challenge::{self, ChallengePack};
use crate::eth::{Address, H256};

/// Settlement record for one passing solve. Field order here is the
/// order of the signed EIP-712 struct.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    pub chain_id: u64,
    pub epoch_id: u64,
    pub miner_address: Address,
    pub challenge_id: H256,
    pub nonce_hash: H256,
    pub credits_amount: u64,
    pub artifact_hash: H256,
    pub issued_at: u64,
}

impl Receipt {
    pub fn build(
        chain_id: u64,
        epoch_id: u64,
        miner: Address,
        pack: &ChallengePack,
        nonce: &str,
        credits_amount: u64,
        issued_at: u64,
    ) -> Self {
        Self {
            chain_id,
            epoch_id,
            miner_address: miner,
            challenge_id: pack.seed,
            nonce_hash: challenge::sha256(nonce),
            credits_amount,
            artifact_hash: challenge::sha256(&pack.expected_artifact),
            issued_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::challenge::make_challenge;

    #[test]
    fn receipt_hashes_nonce_and_artifact() {
        let miner = Address([0xab; 20]);
        let pack = make_challenge(5, &miner, "n1");
        let receipt = Receipt::build(56, 5, miner, &pack, "n1", 1, 1_700_000_000);

        assert_eq!(receipt.challenge_id, pack.seed);
        assert_eq!(receipt.nonce_hash, challenge::sha256("n1"));
        assert_eq!(receipt.artifact_hash, challenge::sha256("CLAW-5-90"));

        let json = serde_json::to_value(&receipt).unwrap();
        assert_eq!(json["minerAddress"], "0xabababababababababababababababababababab");
        assert_eq!(json["challengeId"], pack.seed.to_string());
        assert_eq!(json["issuedAt"], 1_700_000_000u64);
    }
}
