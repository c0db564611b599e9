//! Error types for Alertgate

use thiserror::Error;

/// Result type alias using Alertgate's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for Alertgate operations
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error (missing or invalid setting)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Notification transport failed to deliver
    #[error("Transport error: {0}")]
    Transport(String),

    /// Remote call to a monitored subject failed
    #[error("Remote call to subject {subject} failed: {reason}")]
    RemoteCall { subject: String, reason: String },

    /// An operation did not finish in time
    #[error("Timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Ignore pattern could not be compiled
    #[error("Invalid pattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a transport error
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Create a remote call error
    pub fn remote_call(subject: impl ToString, reason: impl Into<String>) -> Self {
        Self::RemoteCall {
            subject: subject.to_string(),
            reason: reason.into(),
        }
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}
