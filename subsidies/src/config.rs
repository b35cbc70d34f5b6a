// Copyright (c) 2024 Botho Foundation

//! TOML description of a pool deployment.
//!
//! ```toml
//! [pool]
//! buyer_subsidy_rate = 500
//! system_subsidy_rate = 300
//! initial_funds = 1000000
//!
//! [storage]
//! storage_price_per_unit_size = 100
//! write_price_per_unit_size = 20
//! max_epochs_ahead = 53
//!
//! [[buyers]]
//! name = "alice"
//! funds = 50000
//! ```

use std::{fs, path::Path};

use displaydoc::Display;
use rand_core::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    allocate::SubsidyRateBps,
    balance::Balance,
    capability::AdminCap,
    error::SubsidyResult,
    ids::{ObjectId, PackageRecord},
    ledger::SubsidyLedger,
    pool::{Subsidies, MAX_SUBSIDY_RATE},
    storage::{InMemoryStorage, StoragePricing},
};

/// Errors loading or validating a [`SubsidyConfig`].
#[derive(Debug, Display, Error)]
pub enum ConfigError {
    /// Failed to read {path}: {source}
    Io {
        path: String,
        source: std::io::Error,
    },

    /// Failed to parse config: {0}
    Parse(#[from] toml::de::Error),

    /// {field} of {rate} exceeds the maximum of 10000 basis points
    InvalidRate {
        field: &'static str,
        rate: SubsidyRateBps,
    },

    /// max_epochs_ahead must be non-zero
    InvalidEpochs,

    /// Buyer {0} is listed more than once
    DuplicateBuyer(String),
}

/// Deployment description.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubsidyConfig {
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    /// Buyer accounts opened at deployment.
    #[serde(default)]
    pub buyers: Vec<BuyerConfig>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Buyer subsidy rate in basis points
    #[serde(default)]
    pub buyer_subsidy_rate: SubsidyRateBps,

    /// System subsidy rate in basis points
    #[serde(default)]
    pub system_subsidy_rate: SubsidyRateBps,

    /// Value the pool starts with
    #[serde(default)]
    pub initial_funds: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Price per MiB per epoch
    #[serde(default = "default_storage_price")]
    pub storage_price_per_unit_size: u64,

    /// Price per MiB to register a blob
    #[serde(default = "default_write_price")]
    pub write_price_per_unit_size: u64,

    #[serde(default = "default_max_epochs_ahead")]
    pub max_epochs_ahead: u32,
}

fn default_storage_price() -> u64 {
    100
}

fn default_write_price() -> u64 {
    20
}

fn default_max_epochs_ahead() -> u32 {
    53
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            storage_price_per_unit_size: default_storage_price(),
            write_price_per_unit_size: default_write_price(),
            max_epochs_ahead: default_max_epochs_ahead(),
        }
    }
}

impl From<&StorageConfig> for StoragePricing {
    fn from(config: &StorageConfig) -> Self {
        Self {
            storage_price_per_unit_size: config.storage_price_per_unit_size,
            write_price_per_unit_size: config.write_price_per_unit_size,
            max_epochs_ahead: config.max_epochs_ahead,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuyerConfig {
    pub name: String,
    #[serde(default)]
    pub funds: u64,
}

impl SubsidyConfig {
    /// Load and validate a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    /// Parse and validate a config from TOML text.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Check rates and epoch bounds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, rate) in [
            ("buyer_subsidy_rate", self.pool.buyer_subsidy_rate),
            ("system_subsidy_rate", self.pool.system_subsidy_rate),
        ] {
            if rate > MAX_SUBSIDY_RATE {
                return Err(ConfigError::InvalidRate { field, rate });
            }
        }
        if self.storage.max_epochs_ahead == 0 {
            return Err(ConfigError::InvalidEpochs);
        }
        for (i, buyer) in self.buyers.iter().enumerate() {
            if self.buyers[..i].iter().any(|other| other.name == buyer.name) {
                return Err(ConfigError::DuplicateBuyer(buyer.name.clone()));
            }
        }
        Ok(())
    }

    /// Deploy the described pool over an in-memory storage system.
    pub fn build_ledger<R: RngCore + CryptoRng>(
        &self,
        rng: &mut R,
    ) -> SubsidyResult<(SubsidyLedger<InMemoryStorage>, AdminCap)> {
        let package = PackageRecord::current(ObjectId::random(rng));
        let (subsidies, cap) = Subsidies::with_initial_rates_and_funds(
            &package,
            self.pool.buyer_subsidy_rate,
            self.pool.system_subsidy_rate,
            Balance::issue(self.pool.initial_funds),
            rng,
        )?;
        let system = InMemoryStorage::new((&self.storage).into());
        let mut ledger = SubsidyLedger::new(subsidies, system);
        for buyer in &self.buyers {
            ledger.deposit(&buyer.name, Balance::issue(buyer.funds))?;
        }
        Ok((ledger, cap))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};
    use std::io::Write;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = SubsidyConfig::from_toml_str("").unwrap();
        assert_eq!(config.pool, PoolConfig::default());
        assert_eq!(config.storage.storage_price_per_unit_size, 100);
        assert_eq!(config.storage.write_price_per_unit_size, 20);
        assert_eq!(config.storage.max_epochs_ahead, 53);
        assert!(config.buyers.is_empty());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[pool]
buyer_subsidy_rate = 500
system_subsidy_rate = 300
initial_funds = 10000

[storage]
max_epochs_ahead = 10

[[buyers]]
name = "alice"
funds = 2000

[[buyers]]
name = "bob"
"#
        )
        .unwrap();

        let config = SubsidyConfig::load(file.path()).unwrap();
        assert_eq!(config.pool.buyer_subsidy_rate, 500);
        assert_eq!(config.storage.max_epochs_ahead, 10);
        assert_eq!(config.storage.storage_price_per_unit_size, 100);
        assert_eq!(config.buyers.len(), 2);
        assert_eq!(config.buyers[1].funds, 0);

        let mut rng = StdRng::seed_from_u64(1);
        let (ledger, cap) = config.build_ledger(&mut rng).unwrap();
        assert_eq!(ledger.subsidies().subsidy_pool_value(), 10_000);
        assert_eq!(ledger.subsidies().system_subsidy_rate(), 300);
        assert_eq!(ledger.balance_of("alice"), 2_000);
        assert_eq!(ledger.balance_of("bob"), 0);
        assert_eq!(ledger.system().pricing().max_epochs_ahead, 10);
        assert_eq!(cap.subsidies_id(), ledger.subsidies().id());
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = SubsidyConfig::load(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_rejects_invalid_values() {
        let err = SubsidyConfig::from_toml_str("[pool]\nbuyer_subsidy_rate = 10001\n").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidRate {
                field: "buyer_subsidy_rate",
                rate: 10_001
            }
        ));

        let err = SubsidyConfig::from_toml_str("[storage]\nmax_epochs_ahead = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEpochs));

        let err = SubsidyConfig::from_toml_str(
            "[[buyers]]\nname = \"a\"\n[[buyers]]\nname = \"a\"\n",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateBuyer(name) if name == "a"));

        assert!(matches!(
            SubsidyConfig::from_toml_str("[pool]\nbuyer_subsidy_rate = \"high\"\n"),
            Err(ConfigError::Parse(_))
        ));
    }
}
