//! Error types for ovpnd
//!
//! Provides a unified error type that covers all failure modes across
//! the PKI store, the Easy-RSA gateway, the client lifecycle manager,
//! and profile assembly.

use thiserror::Error;

/// Result type alias using OvpnError
pub type Result<T> = std::result::Result<T, OvpnError>;

/// Comprehensive error type for all ovpnd operations
#[derive(Error, Debug)]
pub enum OvpnError {
    /// IO errors (artifact reads, profile material)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors (missing directories, bad env values)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input (client names, request parameters)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Requested identity or artifact does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// On-disk artifacts are in a partial state that blocks the operation
    #[error("Inconsistent state: {0}")]
    Inconsistent(String),

    /// An Easy-RSA invocation failed; carries the tool's combined output
    #[error("easyrsa {context} failed: {output}")]
    Ca { context: String, output: String },
}

impl OvpnError {
    /// Create a configuration error with context
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a validation error with context
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a not found error with context
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create an inconsistent state error with context
    pub fn inconsistent(msg: impl Into<String>) -> Self {
        Self::Inconsistent(msg.into())
    }

    /// Create a CA operation error carrying the tool invocation and its output
    pub fn ca(context: impl Into<String>, output: impl Into<String>) -> Self {
        Self::Ca {
            context: context.into(),
            output: output.into(),
        }
    }
}
