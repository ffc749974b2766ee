//! Oracle configuration.
//!
//! Every value has a default and can be overridden through an `ORACLE_*`
//! environment variable. A variable that is set but does not parse is an
//! error rather than a silent fallback.

use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;

use thiserror::Error;

use crate::session::SessionConfig;

/// Default policy threshold injected into the witness.
pub const DEFAULT_THRESHOLD: u64 = 40;

/// Default circuit identifier used in artifact file names.
pub const DEFAULT_CIRCUIT_ID: &str = "oracle";

/// Configuration errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Variable set to a value that does not parse.
    #[error("invalid value for {var}: {value:?} ({reason})")]
    Invalid {
        /// Environment variable name.
        var: &'static str,
        /// Offending value.
        value: String,
        /// Parser message.
        reason: String,
    },
}

/// Read an optional, non-empty environment variable.
pub(crate) fn env_var(var: &'static str) -> Option<String> {
    std::env::var(var).ok().filter(|v| !v.is_empty())
}

/// Parse an environment variable, falling back to `default` only when unset.
pub(crate) fn env_parse<T>(var: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    match env_var(var) {
        Some(value) => value.parse().map_err(|e: T::Err| ConfigError::Invalid {
            var,
            reason: e.to_string(),
            value,
        }),
        None => Ok(default),
    }
}

/// Top-level configuration.
#[derive(Debug, Clone)]
pub struct OracleConfig {
    /// Directory holding the session document and parameter documents.
    pub storage_dir: PathBuf,
    /// Directory holding backend artifacts and proof outputs.
    pub circuits_dir: PathBuf,
    /// Circuit identifier (artifact file stem).
    pub circuit_id: String,
    /// Policy threshold the disclosed value must exceed.
    pub threshold: u64,
    /// Session driver settings.
    pub session: SessionConfig,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            storage_dir: PathBuf::from("local_storage"),
            circuits_dir: PathBuf::from("circuits"),
            circuit_id: DEFAULT_CIRCUIT_ID.to_string(),
            threshold: DEFAULT_THRESHOLD,
            session: SessionConfig::default(),
        }
    }
}

impl OracleConfig {
    /// Load from environment variables.
    ///
    /// - `ORACLE_STORAGE_DIR`, `ORACLE_CIRCUITS_DIR`, `ORACLE_CIRCUIT_ID`
    /// - `ORACLE_THRESHOLD`
    /// - session variables, see [`SessionConfig::from_env`]
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            storage_dir: env_parse("ORACLE_STORAGE_DIR", defaults.storage_dir)?,
            circuits_dir: env_parse("ORACLE_CIRCUITS_DIR", defaults.circuits_dir)?,
            circuit_id: env_var("ORACLE_CIRCUIT_ID").unwrap_or(defaults.circuit_id),
            threshold: env_parse("ORACLE_THRESHOLD", defaults.threshold)?,
            session: SessionConfig::from_env()?,
        })
    }
}
