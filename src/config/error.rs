//! Configuration error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to determine home directory")]
    NoHomeDir,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("Unknown section: {0}")]
    UnknownSection(String),

    #[error("Section [{section}] is missing required field '{field}'")]
    MissingField { section: String, field: String },

    #[error("Section [{section}] has invalid value for '{field}': {value}")]
    InvalidValue {
        section: String,
        field: String,
        value: String,
    },

    #[error("No default target: [DEFAULT] has no 'target' key")]
    MissingDefaultTarget,

    #[error("Gateway cycle detected: {0}")]
    GatewayCycle(String),
}
