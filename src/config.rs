//! Engine settings shared by every evaluation.

use std::env;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {var}")]
    Invalid { var: String, value: String },
}

/// Tunables for query retries, fan-out width and join strictness.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Extra attempts for a failed `q()` query
    pub retries: usize,
    /// Maximum concurrent backend queries in `fq()`
    pub concurrency: usize,
    /// Drop unmatched groups in operators instead of filling them with NaN
    pub unjoined_ok: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            retries: 3,
            concurrency: 4,
            unjoined_ok: false,
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by `TSEXPR_RETRIES`, `TSEXPR_CONCURRENCY` and
    /// `TSEXPR_UNJOINED_OK`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| env::var(var).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = EngineConfig::default();
        if let Some(v) = lookup("TSEXPR_RETRIES") {
            config.retries = parse_number("TSEXPR_RETRIES", &v)?;
        }
        if let Some(v) = lookup("TSEXPR_CONCURRENCY") {
            config.concurrency = parse_number("TSEXPR_CONCURRENCY", &v)?.max(1);
        }
        if let Some(v) = lookup("TSEXPR_UNJOINED_OK") {
            config.unjoined_ok = match v.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => true,
                "0" | "false" | "no" | "" => false,
                _ => return Err(invalid("TSEXPR_UNJOINED_OK", &v)),
            };
        }
        Ok(config)
    }
}

fn invalid(var: &str, value: &str) -> ConfigError {
    ConfigError::Invalid {
        var: var.to_string(),
        value: value.to_string(),
    }
}

fn parse_number(var: &str, value: &str) -> Result<usize, ConfigError> {
    value.trim().parse().map_err(|_| invalid(var, value))
}
