use std::{fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::{
    address::Address,
    amount::{dec, Amount, DEFAULT_MIN_AMOUNT_WEI, TOKEN_SCALE},
    sale::BonusRule,
};

pub const DEFAULT_PRICE: Amount = 10_000;
pub const DEFAULT_TOKEN_CAP: Amount = 950_000_000 * TOKEN_SCALE;
/// 950M split as 570M public : 380M development.
pub const DEFAULT_PUBLIC_SHARE: u64 = 570;
pub const DEFAULT_DEV_SHARE: u64 = 380;
pub const DEFAULT_BONUS_BPS: u32 = 1_000;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot parse config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(&'static str),
}

/// Deployment parameters of a sale. Everything but the fund wallet has a
/// default.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SaleConfig {
    pub fund_wallet: Address,
    #[serde(default)]
    pub control_wallet: Option<Address>,
    #[serde(default = "default_price", with = "dec")]
    pub initial_price: Amount,
    #[serde(default = "default_min_amount", with = "dec")]
    pub min_amount: Amount,
    #[serde(default = "default_token_cap", with = "dec")]
    pub token_cap: Amount,
    #[serde(default = "default_public_share")]
    pub public_share: u64,
    #[serde(default = "default_dev_share")]
    pub dev_share: u64,
    #[serde(default = "default_bonus_bps")]
    pub bonus_bps: u32,
    #[serde(default)]
    pub bonus_rule: BonusRule,
    /// Limits price and minimum-amount updates to the managing wallets.
    #[serde(default = "default_restrict_admin")]
    pub restrict_admin: bool,
}

fn default_price() -> Amount {
    DEFAULT_PRICE
}

fn default_min_amount() -> Amount {
    DEFAULT_MIN_AMOUNT_WEI
}

fn default_token_cap() -> Amount {
    DEFAULT_TOKEN_CAP
}

fn default_public_share() -> u64 {
    DEFAULT_PUBLIC_SHARE
}

fn default_dev_share() -> u64 {
    DEFAULT_DEV_SHARE
}

fn default_bonus_bps() -> u32 {
    DEFAULT_BONUS_BPS
}

fn default_restrict_admin() -> bool {
    true
}

impl SaleConfig {
    pub fn new(fund_wallet: Address) -> Self {
        Self {
            fund_wallet,
            control_wallet: None,
            initial_price: DEFAULT_PRICE,
            min_amount: DEFAULT_MIN_AMOUNT_WEI,
            token_cap: DEFAULT_TOKEN_CAP,
            public_share: DEFAULT_PUBLIC_SHARE,
            dev_share: DEFAULT_DEV_SHARE,
            bonus_bps: DEFAULT_BONUS_BPS,
            bonus_rule: BonusRule::default(),
            restrict_admin: true,
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.initial_price == 0 {
            return Err(ConfigError::Invalid("initial_price must be positive"));
        }
        if self.token_cap == 0 {
            return Err(ConfigError::Invalid("token_cap must be positive"));
        }
        if self.public_share == 0 {
            return Err(ConfigError::Invalid("public_share must be positive"));
        }
        if self.control_wallet == Some(self.fund_wallet) {
            return Err(ConfigError::Invalid(
                "control_wallet must differ from fund_wallet",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_fields() {
        let config: SaleConfig =
            serde_json::from_str(r#"{"fund_wallet":"0x1111111111111111111111111111111111111111"}"#)
                .unwrap();
        assert_eq!(config, SaleConfig::new(Address::new([0x11; 20])));
        assert_eq!(config.token_cap, 950_000_000 * TOKEN_SCALE);
        assert_eq!(config.min_amount, 50_000_000_000_000_000);
        assert!(config.restrict_admin);
    }

    #[test]
    fn reads_and_validates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sale.json");
        fs::write(
            &path,
            r#"{
                "fund_wallet": "0x1111111111111111111111111111111111111111",
                "initial_price": "3",
                "bonus_rule": {"kind": "eligible_digits", "digits": "4"}
            }"#,
        )
        .unwrap();
        let config = SaleConfig::from_file(&path).unwrap();
        assert_eq!(config.initial_price, 3);
        assert_eq!(
            config.bonus_rule,
            BonusRule::EligibleDigits { digits: "4".into() }
        );

        fs::write(
            &path,
            r#"{"fund_wallet": "0x1111111111111111111111111111111111111111", "initial_price": 0}"#,
        )
        .unwrap();
        assert!(matches!(
            SaleConfig::from_file(&path),
            Err(ConfigError::Invalid(_))
        ));
    }
}
