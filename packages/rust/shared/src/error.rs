//! Error types for AIBridge.
//!
//! Library crates use [`AiBridgeError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all AIBridge operations.
#[derive(Debug, thiserror::Error)]
pub enum AiBridgeError {
    /// Source rows are unreadable or lack the required columns.
    #[error("input error: {message}")]
    Input { message: String },

    /// Invalid settings (batch size, empty credential pool, unknown provider).
    #[error("config error: {message}")]
    Config { message: String },

    /// A provider call failed for a reason unrelated to the credential
    /// (timeout, network, unexpected envelope). The batch is lost, the run goes on.
    #[error("provider error ({provider}): {message}")]
    Provider { provider: String, message: String },

    /// The backend rejected the credential (HTTP 401/403/429).
    #[error("credential rejected by {provider}: {message}")]
    Credential { provider: String, message: String },

    /// Every credential of the active provider has been retired this run.
    #[error("no usable credentials left for {provider}")]
    NoCredentials { provider: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The checkpoint artifact could not be serialized or written.
    #[error("checkpoint error at {path:?}: {message}")]
    Checkpoint { path: PathBuf, message: String },

    /// A manual relay is already waiting for a response.
    #[error("relay is already awaiting a response; retrieve or cancel first")]
    RelayBusy,

    /// The operator cancelled the manual relay exchange.
    #[error("relay exchange cancelled")]
    RelayCancelled,
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, AiBridgeError>;

impl AiBridgeError {
    /// Create an input error from any displayable message.
    pub fn input(msg: impl Into<String>) -> Self {
        Self::Input {
            message: msg.into(),
        }
    }

    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a recoverable provider error.
    pub fn provider(provider: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: msg.into(),
        }
    }

    /// Create a credential rejection error.
    pub fn credential(provider: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Credential {
            provider: provider.into(),
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a checkpoint serialization error.
    pub fn checkpoint(path: impl Into<PathBuf>, msg: impl Into<String>) -> Self {
        Self::Checkpoint {
            path: path.into(),
            message: msg.into(),
        }
    }

    /// Whether this error must end the run.
    ///
    /// Provider and credential failures only cost the current batch.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Provider { .. } | Self::Credential { .. })
    }
}
