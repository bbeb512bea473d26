use std::env;
use std::fmt;
use std::path::PathBuf;

use chrono::NaiveDate;
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;

pub const DEV_HMAC_SECRET: &str = "clawminer-dev-secret";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

pub struct Config {
    // Transport
    pub bind_addr: String,

    // Protocol
    pub chain_id: u64,
    pub genesis_utc: NaiveDate,
    pub lease_ttl_seconds: u64,
    pub register_ttl_seconds: u64,
    pub credits_per_solve: u64,

    // Secrets and settlement
    pub hmac_secret: SecretString,
    pub signer_private_key: Option<String>,
    pub mining_contract: Option<String>,

    // Legacy persisted state
    pub state_path: Option<PathBuf>,

    // Monitoring and logging
    pub log_level: String,
    pub metrics_enabled: bool,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("bind_addr", &self.bind_addr)
            .field("chain_id", &self.chain_id)
            .field("genesis_utc", &self.genesis_utc)
            .field("lease_ttl_seconds", &self.lease_ttl_seconds)
            .field("register_ttl_seconds", &self.register_ttl_seconds)
            .field("credits_per_solve", &self.credits_per_solve)
            .field("signer_configured", &self.signer_private_key.is_some())
            .field("mining_contract", &self.mining_contract)
            .field("state_path", &self.state_path)
            .field("log_level", &self.log_level)
            .field("metrics_enabled", &self.metrics_enabled)
            .finish_non_exhaustive()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8787".to_string(),

            chain_id: 56,
            genesis_utc: NaiveDate::from_ymd_opt(2026, 2, 24).unwrap_or_default(),
            lease_ttl_seconds: 86_400,
            register_ttl_seconds: 900,
            credits_per_solve: 1,

            hmac_secret: SecretString::from(DEV_HMAC_SECRET.to_string()),
            signer_private_key: None,
            mining_contract: None,

            state_path: None,

            log_level: "info".to_string(),
            metrics_enabled: true,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as `from_env`, reading variables through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Config::default();

        if let Some(val) = var("BIND_ADDR") {
            config.bind_addr = val;
        }

        if let Some(val) = var("CHAIN_ID") {
            config.chain_id = parse_var("CHAIN_ID", &val)?;
        }

        if let Some(val) = var("GENESIS_UTC") {
            config.genesis_utc = NaiveDate::parse_from_str(&val, "%Y-%m-%d")
                .map_err(|_| ConfigError::InvalidEnvVar("GENESIS_UTC".to_string(), val))?;
        }

        if let Some(val) = var("LEASE_TTL_SECONDS") {
            config.lease_ttl_seconds = parse_var("LEASE_TTL_SECONDS", &val)?;
        }

        if let Some(val) = var("REGISTER_TTL_SECONDS") {
            config.register_ttl_seconds = parse_var("REGISTER_TTL_SECONDS", &val)?;
        }

        if let Some(val) = var("CREDITS_PER_SOLVE") {
            config.credits_per_solve = parse_var("CREDITS_PER_SOLVE", &val)?;
        }

        // Malformed signer/contract values are kept: they surface as soft
        // warnings on submit rather than blocking startup.
        config.signer_private_key = var("COORDINATOR_SIGNER_PRIVATE_KEY");
        config.mining_contract = var("MINING_CONTRACT_ADDRESS");

        config.hmac_secret = SecretString::from(
            var("COORDINATOR_HMAC_SECRET")
                .or_else(|| config.signer_private_key.clone())
                .unwrap_or_else(|| DEV_HMAC_SECRET.to_string()),
        );

        config.state_path = var("STATE_PATH").map(PathBuf::from);

        if let Some(val) = var("LOG_LEVEL") {
            config.log_level = val;
        }

        if let Some(val) = var("METRICS_ENABLED") {
            config.metrics_enabled = parse_flag("METRICS_ENABLED", &val)?;
        }

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bind_addr.is_empty() {
            return Err(ConfigError::ValidationError("BIND_ADDR must not be empty".to_string()));
        }

        if self.lease_ttl_seconds == 0 {
            return Err(ConfigError::ValidationError("LEASE_TTL_SECONDS must be greater than 0".to_string()));
        }

        if self.register_ttl_seconds == 0 {
            return Err(ConfigError::ValidationError("REGISTER_TTL_SECONDS must be greater than 0".to_string()));
        }

        if self.hmac_secret.expose_secret().is_empty() {
            return Err(ConfigError::MissingEnvVar("COORDINATOR_HMAC_SECRET".to_string()));
        }

        Ok(())
    }

    pub fn uses_dev_secret(&self) -> bool {
        self.hmac_secret.expose_secret() == DEV_HMAC_SECRET
    }
}

// `1`/`true`/`yes`/`on` and `0`/`false`/`no`/`off`, any case.
fn parse_flag(key: &str, val: &str) -> Result<bool, ConfigError> {
    match val.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidEnvVar(key.to_string(), val.to_string())),
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, val: &str) -> Result<T, ConfigError> {
    val.trim()
        .parse()
        .map_err(|_| ConfigError::InvalidEnvVar(key.to_string(), val.to_string()))
}
