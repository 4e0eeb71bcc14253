//! Service configuration.
//!
//! Loads [`PinClaimConfig`] from a TOML file with `$VAR` / `${VAR}`
//! references expanded from the process environment. Every field has a
//! default; with payments enabled only the operator address must be set.
//!
//! # Example Configuration
//!
//! ```toml
//! enable_payments = true
//! operator_address = "$OPERATOR_ADDRESS"
//! markup = "0.1"
//! network_fee = "0.00001"
//! minimum_billable_mb = "1"
//! max_upload_bytes = 100000000
//! staging_ttl_secs = 86400
//! eviction_interval_secs = 86400
//! collaborator_timeout_secs = 30
//! ```
//!
//! # Environment Variables
//!
//! - `PINCLAIM_CONFIG`: Path to the configuration file (default: `pinclaim.toml`)
//! - `PINCLAIM_OPERATOR_ADDRESS`: Overrides `operator_address`

use std::path::Path;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::cost::CostPolicy;

/// Environment variable naming the configuration file.
pub const CONFIG_PATH_ENV: &str = "PINCLAIM_CONFIG";
/// Configuration file used when [`CONFIG_PATH_ENV`] is unset.
pub const DEFAULT_CONFIG_PATH: &str = "pinclaim.toml";
/// Environment variable overriding [`PinClaimConfig::operator_address`].
pub const OPERATOR_ADDRESS_ENV: &str = "PINCLAIM_OPERATOR_ADDRESS";

/// Errors raised while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file exists but could not be read.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// File path.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The file is not valid TOML for [`PinClaimConfig`].
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    /// Values parsed but are inconsistent.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Runtime settings for [`PinClaimService`](crate::service::PinClaimService).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PinClaimConfig {
    /// Accept payments. When off, quotes and claims fail with
    /// [`PaymentsDisabled`](crate::error::PinClaimError::PaymentsDisabled).
    pub enable_payments: bool,
    /// Wallet address receiving swept payments.
    pub operator_address: String,
    /// Fractional markup applied to the coin cost.
    pub markup: Decimal,
    /// Coins added to each quote for transaction fees.
    pub network_fee: Decimal,
    /// Smaller sizes are billed as this many megabytes.
    pub minimum_billable_mb: Decimal,
    /// Largest accepted upload in bytes.
    pub max_upload_bytes: u64,
    /// How long an unclaimed upload is kept.
    pub staging_ttl_secs: u64,
    /// Time between eviction sweeps.
    pub eviction_interval_secs: u64,
    /// Upper bound on every collaborator call.
    pub collaborator_timeout_secs: u64,
}

impl Default for PinClaimConfig {
    fn default() -> Self {
        Self {
            enable_payments: true,
            operator_address: String::new(),
            markup: Decimal::ZERO,
            network_fee: Decimal::new(1_000, 8),
            minimum_billable_mb: Decimal::ONE,
            max_upload_bytes: 100_000_000,
            staging_ttl_secs: 86_400,
            eviction_interval_secs: 86_400,
            collaborator_timeout_secs: 30,
        }
    }
}

impl PinClaimConfig {
    /// Loads configuration from the path in `PINCLAIM_CONFIG`, falling back
    /// to `pinclaim.toml` in the current directory.
    ///
    /// # Errors
    ///
    /// See [`load_from`](Self::load_from).
    pub fn load() -> Result<Self, ConfigError> {
        let path =
            std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_owned());
        Self::load_from(&path)
    }

    /// Loads configuration from `path`. A missing file yields the defaults.
    ///
    /// `PINCLAIM_OPERATOR_ADDRESS` overrides the file's operator address.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read,
    /// [`ConfigError::Parse`] if it is malformed, and
    /// [`ConfigError::Invalid`] if [`validate`](Self::validate) fails.
    pub fn load_from(path: &str) -> Result<Self, ConfigError> {
        let content = if Path::new(path).exists() {
            std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                path: path.to_owned(),
                source,
            })?
        } else {
            tracing::debug!(path, "config file not found; using defaults");
            String::new()
        };

        let mut config = Self::from_toml_str(&content, |name| std::env::var(name).ok())?;
        if let Ok(address) = std::env::var(OPERATOR_ADDRESS_ENV) {
            config.operator_address = address;
        }
        config.validate()?;
        Ok(config)
    }

    /// Parses `content` after expanding variables through `lookup`.
    ///
    /// Does not validate.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] if the expanded text is malformed.
    pub fn from_toml_str(
        content: &str,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        Ok(toml::from_str(&expand_vars(content, lookup))?)
    }

    /// Checks cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when payments are enabled without an
    /// operator address, or when a numeric setting is out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.enable_payments && self.operator_address.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "operator_address is required when enable_payments is true".to_owned(),
            ));
        }
        if self.markup < Decimal::ZERO {
            return Err(ConfigError::Invalid("markup must not be negative".to_owned()));
        }
        if self.network_fee < Decimal::ZERO {
            return Err(ConfigError::Invalid("network_fee must not be negative".to_owned()));
        }
        if self.minimum_billable_mb < Decimal::ZERO {
            return Err(ConfigError::Invalid(
                "minimum_billable_mb must not be negative".to_owned(),
            ));
        }
        if self.eviction_interval_secs == 0 || self.collaborator_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "eviction_interval_secs and collaborator_timeout_secs must be positive".to_owned(),
            ));
        }
        Ok(())
    }

    /// Pricing parameters for [`CostCalculator`](crate::cost::CostCalculator).
    #[must_use]
    pub const fn cost_policy(&self) -> CostPolicy {
        CostPolicy {
            markup: self.markup,
            network_fee: self.network_fee,
            minimum_billable_mb: self.minimum_billable_mb,
        }
    }

    /// Staging TTL.
    #[must_use]
    pub const fn staging_ttl(&self) -> Duration {
        Duration::from_secs(self.staging_ttl_secs)
    }

    /// Eviction period.
    #[must_use]
    pub const fn eviction_interval(&self) -> Duration {
        Duration::from_secs(self.eviction_interval_secs)
    }

    /// Collaborator call bound.
    #[must_use]
    pub const fn collaborator_timeout(&self) -> Duration {
        Duration::from_secs(self.collaborator_timeout_secs)
    }
}

/// Replaces `$VAR` and `${VAR}` with values from `lookup`.
///
/// Unknown variables and a lone `$` are kept verbatim.
fn expand_vars(input: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];

        let (name, consumed) = if let Some(inner) = after.strip_prefix('{') {
            match inner.find('}') {
                Some(end) => (&inner[..end], end + 2),
                None => ("", 0),
            }
        } else {
            let end = after
                .find(|c: char| !c.is_ascii_alphanumeric() && c != '_')
                .unwrap_or(after.len());
            (&after[..end], end)
        };

        match (name.is_empty(), lookup(name)) {
            (false, Some(value)) => out.push_str(&value),
            _ => out.push_str(&rest[pos..=pos + consumed]),
        }
        rest = &after[consumed..];
    }
    out.push_str(rest);
    out
}
