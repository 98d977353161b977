//! Error types
//!
//! Only configuration problems are reported as errors. Broken invariants
//! (overlapping allocations, bad matrix shapes, table indices out of range)
//! panic at the point of detection.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name} = {value} is outside {range}")]
    OutOfRange {
        name: &'static str,
        value: String,
        range: &'static str,
    },

    #[error("invalid {name}: {reason}")]
    Invalid { name: &'static str, reason: String },

    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_yaml::Error),
}

impl ConfigError {
    pub fn out_of_range(name: &'static str, value: impl ToString, range: &'static str) -> Self {
        ConfigError::OutOfRange {
            name,
            value: value.to_string(),
            range,
        }
    }
}

pub type Result<T> = std::result::Result<T, ConfigError>;
