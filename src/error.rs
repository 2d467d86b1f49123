use thiserror::Error;

use crate::invoke::InvokeError;
use crate::verify::Violation;

/// Result type for contract-verifier operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the contract verifier
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Rejected: {0}")]
    Violation(#[from] Violation),

    #[error("Invocation error: {0}")]
    Invoke(#[from] InvokeError),

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Policy file error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config { message: message.into() }
    }

    /// The violation behind this error, if the module was rejected
    pub fn violation(&self) -> Option<&Violation> {
        match self {
            Error::Violation(violation) => Some(violation),
            _ => None,
        }
    }
}
