use std::collections::HashSet;
use std::sync::Mutex;

use prometheus_client::{encoding::text::encode, metrics::counter::Counter, registry::Registry};

use crate::eth::Address;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProofOutcome {
    Accepted,
    Rejected,
}

// Reset whenever a solve lands in a newer epoch.
#[derive(Debug, Default)]
struct EpochTally {
    epoch_id: u64,
    miners: HashSet<Address>,
    credits: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EpochSnapshot {
    pub active_agents: u64,
    pub credits: u64,
}

pub struct CoordinatorMetrics {
    registry: Registry,

    registrations: Counter,
    proofs_accepted: Counter,
    proofs_rejected: Counter,
    renewals: Counter,
    challenges: Counter,
    solves_passed: Counter,
    solves_failed: Counter,
    credits_issued: Counter,
    unsigned_receipts: Counter,

    tally: Mutex<EpochTally>,
}

impl Default for CoordinatorMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl CoordinatorMetrics {
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let registrations = Counter::default();
        let proofs_accepted = Counter::default();
        let proofs_rejected = Counter::default();
        let renewals = Counter::default();
        let challenges = Counter::default();
        let solves_passed = Counter::default();
        let solves_failed = Counter::default();
        let credits_issued = Counter::default();
        let unsigned_receipts = Counter::default();

        registry.register(
            "clawminer_registrations",
            "Registration tokens issued",
            registrations.clone(),
        );
        registry.register(
            "clawminer_proofs_accepted",
            "Dual-signature proofs that minted a lease",
            proofs_accepted.clone(),
        );
        registry.register(
            "clawminer_proofs_rejected",
            "Dual-signature proofs that failed a check",
            proofs_rejected.clone(),
        );
        registry.register("clawminer_renewals", "Lease tokens renewed", renewals.clone());
        registry.register("clawminer_challenges", "Challenges served", challenges.clone());
        registry.register("clawminer_solves_passed", "Submissions that passed", solves_passed.clone());
        registry.register("clawminer_solves_failed", "Submissions that failed", solves_failed.clone());
        registry.register("clawminer_credits_issued", "Credits granted", credits_issued.clone());
        registry.register(
            "clawminer_unsigned_receipts",
            "Passing solves whose receipt could not be signed",
            unsigned_receipts.clone(),
        );

        Self {
            registry,
            registrations,
            proofs_accepted,
            proofs_rejected,
            renewals,
            challenges,
            solves_passed,
            solves_failed,
            credits_issued,
            unsigned_receipts,
            tally: Mutex::new(EpochTally::default()),
        }
    }

    pub fn record_registration(&self) {
        self.registrations.inc();
    }

    pub fn record_proof(&self, outcome: ProofOutcome) {
        match outcome {
            ProofOutcome::Accepted => self.proofs_accepted.inc(),
            ProofOutcome::Rejected => self.proofs_rejected.inc(),
        };
    }

    pub fn record_renewal(&self) {
        self.renewals.inc();
    }

    pub fn record_challenge(&self) {
        self.challenges.inc();
    }

    pub fn record_failed_solve(&self) {
        self.solves_failed.inc();
    }

    pub fn record_solve(&self, epoch_id: u64, miner: Address, credits: u64, signed: bool) {
        self.solves_passed.inc();
        self.credits_issued.inc_by(credits);
        if !signed {
            self.unsigned_receipts.inc();
        }
        if let Ok(mut tally) = self.tally.lock() {
            if epoch_id > tally.epoch_id {
                *tally = EpochTally { epoch_id, ..EpochTally::default() };
            }
            if epoch_id == tally.epoch_id {
                tally.miners.insert(miner);
                tally.credits += credits;
            }
        }
    }

    pub fn epoch_snapshot(&self, epoch_id: u64) -> EpochSnapshot {
        match self.tally.lock() {
            Ok(tally) if tally.epoch_id == epoch_id => EpochSnapshot {
                active_agents: tally.miners.len() as u64,
                credits: tally.credits,
            },
            _ => EpochSnapshot::default(),
        }
    }

    pub fn solves_total(&self) -> u64 {
        self.solves_passed.get()
    }

    pub fn export(&self) -> Result<String, std::fmt::Error> {
        let mut buffer = String::new();
        encode(&mut buffer, &self.registry)?;
        Ok(buffer)
    }
}
