use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

pub const EPOCH_SECONDS: i64 = 86_400;
pub const HALVING_EPOCHS: u64 = 180;
pub const SUPPLY_CAP: f64 = 21_000_000.0;
/// Per-epoch emission during era 0.
pub const BASE_RATE: f64 = SUPPLY_CAP / (2.0 * HALVING_EPOCHS as f64);
pub const DIFFICULTY: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EpochInfo {
    pub chain_id: u64,
    pub genesis_utc: String,
    pub epoch_seconds: i64,
    pub halving_epochs: u64,
    pub cap: f64,
    pub epoch_id: u64,
    pub era: u64,
    /// Unix milliseconds.
    pub epoch_start_ts: i64,
    pub next_epoch_start_ts: i64,
    pub next_epoch_in_seconds: i64,
    pub difficulty: u32,
    pub epoch_mint: f64,
    pub minted_total: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardTiers {
    pub t1: u64,
    pub t2: u64,
    pub t3: u64,
}

pub const REWARD_TIERS: RewardTiers = RewardTiers { t1: 21_000, t2: 52_500, t3: 105_000 };

#[derive(Debug, Clone)]
pub struct EpochClock {
    genesis: NaiveDate,
    chain_id: u64,
}

impl EpochClock {
    pub fn new(genesis: NaiveDate, chain_id: u64) -> Self {
        Self { genesis, chain_id }
    }

    pub fn genesis(&self) -> NaiveDate {
        self.genesis
    }

    pub fn epoch_id_at(&self, now: DateTime<Utc>) -> u64 {
        let genesis_ms = midnight_ms(self.genesis);
        let day0_ms = midnight_ms(now.date_naive());
        let elapsed = (day0_ms - genesis_ms).div_euclid(EPOCH_SECONDS * 1000);
        elapsed.max(0) as u64
    }

    pub fn info_at(&self, now: DateTime<Utc>) -> EpochInfo {
        let epoch_id = self.epoch_id_at(now);
        let epoch_ms = EPOCH_SECONDS * 1000;
        let epoch_start_ts = midnight_ms(self.genesis) + epoch_id as i64 * epoch_ms;
        let next_epoch_start_ts = epoch_start_ts + epoch_ms;
        let next_epoch_in_seconds =
            ((next_epoch_start_ts - now.timestamp_millis()).div_euclid(1000)).max(0);

        let era = epoch_id / HALVING_EPOCHS;
        let epochs_into_era = epoch_id - era * HALVING_EPOCHS;
        let epoch_mint = era_rate(era);
        let minted_full = SUPPLY_CAP * (1.0 - 0.5f64.powi(clamp_exp(era)));
        let minted_partial = epochs_into_era as f64 * epoch_mint;

        EpochInfo {
            chain_id: self.chain_id,
            genesis_utc: self.genesis.format("%Y-%m-%d").to_string(),
            epoch_seconds: EPOCH_SECONDS,
            halving_epochs: HALVING_EPOCHS,
            cap: SUPPLY_CAP,
            epoch_id,
            era,
            epoch_start_ts,
            next_epoch_start_ts,
            next_epoch_in_seconds,
            difficulty: DIFFICULTY,
            epoch_mint,
            minted_total: (minted_full + minted_partial).min(SUPPLY_CAP),
        }
    }
}

fn midnight_ms(date: NaiveDate) -> i64 {
    date.and_time(NaiveTime::MIN).and_utc().timestamp_millis()
}

fn clamp_exp(era: u64) -> i32 {
    era.min(i32::MAX as u64) as i32
}

fn era_rate(era: u64) -> f64 {
    BASE_RATE / 2f64.powi(clamp_exp(era))
}
