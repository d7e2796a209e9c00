//! Error types for kubepulse.

use thiserror::Error;

/// Main error type for kubepulse operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// A collection required to render the active view could not be listed
    #[error("failed to list {kind}: {message}")]
    Fetch { kind: &'static str, message: String },

    /// A watcher or worker task failed to synchronize
    #[error("sync error: {0}")]
    Sync(String),

    /// Cloud metadata provider lookup failed
    #[error("provider {provider} lookup failed: {message}")]
    Provider { provider: String, message: String },

    /// Configuration file could not be parsed
    #[error("config error: {0}")]
    Config(String),

    /// Filesystem error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Terminal setup or drawing error
    #[error("terminal error: {0}")]
    Terminal(String),
}

impl Error {
    /// Create a fetch error for the given object kind
    pub fn fetch(kind: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Fetch {
            kind,
            message: err.to_string(),
        }
    }

    /// Create a provider error with the given message
    pub fn provider(provider: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: msg.into(),
        }
    }

    /// Create a sync error with the given message
    pub fn sync(msg: impl Into<String>) -> Self {
        Self::Sync(msg.into())
    }

    /// Create a config error with the given message
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Create a terminal error with the given message
    pub fn terminal(msg: impl Into<String>) -> Self {
        Self::Terminal(msg.into())
    }
}

/// Result type alias using the kubepulse error type.
pub type Result<T> = std::result::Result<T, Error>;
