//! Key selection strategies.
//!
//! # Responsibilities
//! - Derive the partition key of an outgoing call
//! - Provide the canonical presets (operation, target, target + operation)
//! - Accept any closure as a custom strategy
//!
//! # Design Decisions
//! - Selectors are pure; they never see registry state
//! - Malformed input is an error, never a fallback key
//! - Composite keys are joined with `#`, which cannot appear in a host or port

use std::fmt;
use std::str::FromStr;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::resilience::types::{CallParams, KeyDerivationError};

/// Separator between the target and operation parts of a composite key.
pub const KEY_DELIMITER: char = '#';

/// Derives a registry key from the parameters of one call.
pub trait KeySelector<K>: Send + Sync {
    /// Compute the key for `call`.
    fn select(&self, call: &CallParams<'_>) -> Result<K, KeyDerivationError>;
}

impl<K, F> KeySelector<K> for F
where
    F: Fn(&CallParams<'_>) -> Result<K, KeyDerivationError> + Send + Sync,
{
    fn select(&self, call: &CallParams<'_>) -> Result<K, KeyDerivationError> {
        self(call)
    }
}

/// One breaker per operation, shared across all targets.
#[derive(Debug, Clone, Copy, Default)]
pub struct ByOperation;

impl KeySelector<String> for ByOperation {
    fn select(&self, call: &CallParams<'_>) -> Result<String, KeyDerivationError> {
        if call.operation.is_empty() {
            return Err(KeyDerivationError::MissingOperation);
        }
        Ok(call.operation.to_string())
    }
}

/// One breaker per destination: `host`, or `host:port` when a port is given.
#[derive(Debug, Clone, Copy, Default)]
pub struct ByTarget;

impl KeySelector<String> for ByTarget {
    fn select(&self, call: &CallParams<'_>) -> Result<String, KeyDerivationError> {
        let host = call.target.host().ok_or_else(|| KeyDerivationError::MissingHost {
            target: call.target.to_string(),
        })?;

        Ok(match call.target.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        })
    }
}

/// One breaker per destination and operation: `<target>#<operation>`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ByTargetAndOperation;

impl KeySelector<String> for ByTargetAndOperation {
    fn select(&self, call: &CallParams<'_>) -> Result<String, KeyDerivationError> {
        let target = ByTarget.select(call)?;
        let operation = ByOperation.select(call)?;
        Ok(format!("{}{}{}", target, KEY_DELIMITER, operation))
    }
}

/// Named preset strategies, selectable from configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyStrategy {
    /// See [`ByOperation`].
    Operation,
    /// See [`ByTarget`].
    #[default]
    Target,
    /// See [`ByTargetAndOperation`].
    TargetAndOperation,
}

impl KeyStrategy {
    /// Config/CLI spelling of this strategy.
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyStrategy::Operation => "operation",
            KeyStrategy::Target => "target",
            KeyStrategy::TargetAndOperation => "target_and_operation",
        }
    }
}

impl KeySelector<String> for KeyStrategy {
    fn select(&self, call: &CallParams<'_>) -> Result<String, KeyDerivationError> {
        match self {
            KeyStrategy::Operation => ByOperation.select(call),
            KeyStrategy::Target => ByTarget.select(call),
            KeyStrategy::TargetAndOperation => ByTargetAndOperation.select(call),
        }
    }
}

impl fmt::Display for KeyStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An unrecognized strategy name.
#[derive(Debug, Error)]
#[error("unknown key strategy '{0}' (expected operation, target or target_and_operation)")]
pub struct UnknownStrategy(pub String);

impl FromStr for KeyStrategy {
    type Err = UnknownStrategy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "operation" | "method" => Ok(KeyStrategy::Operation),
            "target" | "host" => Ok(KeyStrategy::Target),
            "target_and_operation" | "host_and_method" => Ok(KeyStrategy::TargetAndOperation),
            _ => Err(UnknownStrategy(s.to_string())),
        }
    }
}
