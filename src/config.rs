use std::env::var;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::keygen::KeySize;
use crate::token::ELECTION_ID;

const ENV_PREFIX: &str = "BLIND_BALLOT_";

/// Smallest RSA modulus that still encodes every 256-bit token injectively.
pub(crate) const MIN_RSA_BITS: u64 = 257;
const MIN_PAILLIER_BITS: usize = 64;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {name}: {value:?}")]
    InvalidValue { name: String, value: String },
    #[error("election id must not be empty")]
    EmptyElectionId,
    #[error("RSA modulus of {0} bits cannot encode a 256-bit token")]
    RsaTooSmall(usize),
    #[error("paillier modulus of {0} bits is below the 64-bit minimum")]
    PaillierTooSmall(usize),
    #[error("{0} window must be longer than zero")]
    ZeroWindow(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElectionConfig {
    pub election_id: String,
    pub rsa_bits: usize,
    pub paillier_key_size: KeySize,
    pub registration_window: Duration,
    pub voting_window: Duration,
    pub issuance_quota: Option<u64>,
    pub ledger_path: PathBuf,
}

impl Default for ElectionConfig {
    fn default() -> Self {
        ElectionConfig {
            election_id: ELECTION_ID.to_string(),
            rsa_bits: 2048,
            paillier_key_size: KeySize::default(),
            registration_window: Duration::from_secs(15 * 60),
            voting_window: Duration::from_secs(10 * 60),
            issuance_quota: None,
            ledger_path: PathBuf::from("./tokens.ledger"),
        }
    }
}

impl ElectionConfig {
    /// Reads `BLIND_BALLOT_*` environment variables; unset ones keep their
    /// defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| {
            let name = format!("{}{}", ENV_PREFIX, key);
            lookup(&name).map(|value| (name, value))
        };
        let mut config = ElectionConfig::default();

        if let Some((_, value)) = get("ELECTION_ID") {
            config.election_id = value;
        }
        if let Some((name, value)) = get("RSA_BITS") {
            config.rsa_bits = parse_value(&name, &value)?;
        }
        if let Some((name, value)) = get("PAILLIER_BITS") {
            config.paillier_key_size = if value.eq_ignore_ascii_case("demo") {
                KeySize::Demo
            } else {
                KeySize::Bits(parse_value(&name, &value)?)
            };
        }
        if let Some((name, value)) = get("REGISTRATION_SECS") {
            config.registration_window = Duration::from_secs(parse_value(&name, &value)?);
        }
        if let Some((name, value)) = get("VOTING_SECS") {
            config.voting_window = Duration::from_secs(parse_value(&name, &value)?);
        }
        if let Some((name, value)) = get("ISSUANCE_QUOTA") {
            config.issuance_quota = Some(parse_value(&name, &value)?);
        }
        if let Some((_, value)) = get("LEDGER_PATH") {
            config.ledger_path = PathBuf::from(value);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.election_id.is_empty() {
            return Err(ConfigError::EmptyElectionId);
        }
        if (self.rsa_bits as u64) < MIN_RSA_BITS {
            return Err(ConfigError::RsaTooSmall(self.rsa_bits));
        }
        if self.registration_window.is_zero() {
            return Err(ConfigError::ZeroWindow("registration"));
        }
        if self.voting_window.is_zero() {
            return Err(ConfigError::ZeroWindow("voting"));
        }
        if let KeySize::Bits(bits) = self.paillier_key_size {
            if bits < MIN_PAILLIER_BITS {
                return Err(ConfigError::PaillierTooSmall(bits));
            }
        }
        Ok(())
    }
}

fn parse_value<T: FromStr>(name: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        name: name.to_string(),
        value: value.to_string(),
    })
}
