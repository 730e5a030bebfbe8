//! Polling intervals, default budgets and expected versions, parsed from
//! a `postcheck.toml` file.
//!
//! Every field has a default, so an empty file (or no file at all) yields a
//! usable configuration.
//!
//! ```
//! use postcheck::CheckConfig;
//!
//! let config = CheckConfig::from_toml_str(r#"
//! [versions]
//! cluster = "4.2.1.0"
//!
//! [inspection]
//! interval_secs = 2
//! "#).unwrap();
//!
//! assert_eq!(config.inspection.interval_secs, 2);
//! assert_eq!(config.inspection.default_timeout_secs, 180);
//! assert_eq!(config.sync.interval_secs, 5);
//! ```

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// Error loading a configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("cannot read config: {0}")]
    Io(#[from] std::io::Error),
    /// The file is not valid TOML or has the wrong shape.
    #[error("cannot parse config: {0}")]
    Parse(#[from] toml::de::Error),
    /// A value is out of range.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CheckConfig {
    /// Expected versions; command-line flags take precedence.
    pub versions: VersionsConfig,
    /// Parameter synchronization polling.
    pub sync: SyncPolicy,
    /// Upgrade inspection polling.
    pub inspection: InspectionPolicy,
}

/// Versions the cluster should converge on.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VersionsConfig {
    /// Installed software version, e.g. `"4.2.1.0"`.
    pub cluster: Option<String>,
    /// Installed data version. Defaults to the cluster version.
    pub data: Option<String>,
}

/// Backoff and budgets for [`ParameterSyncWaiter`](crate::ParameterSyncWaiter).
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncPolicy {
    /// Sleep between polls.
    pub interval_secs: u64,
    /// Budget used when the caller passes a non-positive timeout.
    pub default_timeout_secs: u64,
    /// Fixed budget for the `compatible` parameter, independent of the
    /// caller's timeout.
    pub compatible_timeout_secs: u64,
}

impl Default for SyncPolicy {
    fn default() -> Self {
        Self {
            interval_secs: 5,
            default_timeout_secs: 60,
            compatible_timeout_secs: 10,
        }
    }
}

/// Backoff and budget for [`RootInspectionCheck`](crate::RootInspectionCheck).
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InspectionPolicy {
    /// Sleep between polls.
    pub interval_secs: u64,
    /// Wall-clock budget used when the caller passes a non-positive timeout.
    pub default_timeout_secs: u64,
}

impl Default for InspectionPolicy {
    fn default() -> Self {
        Self {
            interval_secs: 10,
            default_timeout_secs: 180,
        }
    }
}

impl SyncPolicy {
    pub(crate) fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub(crate) fn resolve_timeout(&self, timeout_secs: i64) -> Duration {
        resolve(timeout_secs, self.default_timeout_secs)
    }
}

impl InspectionPolicy {
    pub(crate) fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub(crate) fn resolve_timeout(&self, timeout_secs: i64) -> Duration {
        resolve(timeout_secs, self.default_timeout_secs)
    }
}

/// Non-positive means "use the default", never "don't wait".
fn resolve(timeout_secs: i64, default_secs: u64) -> Duration {
    match u64::try_from(timeout_secs) {
        Ok(secs) if secs > 0 => Duration::from_secs(secs),
        _ => Duration::from_secs(default_secs),
    }
}

impl CheckConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let input = std::fs::read_to_string(path)?;
        Self::from_toml_str(&input)
    }

    /// Reject zero intervals and budgets.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fields = [
            ("sync.interval_secs", self.sync.interval_secs),
            ("sync.default_timeout_secs", self.sync.default_timeout_secs),
            ("sync.compatible_timeout_secs", self.sync.compatible_timeout_secs),
            ("inspection.interval_secs", self.inspection.interval_secs),
            ("inspection.default_timeout_secs", self.inspection.default_timeout_secs),
        ];
        for (name, value) in fields {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{name} must be greater than 0")));
            }
        }
        Ok(())
    }
}
