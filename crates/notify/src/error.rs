//! Error types for the notification synchronization engine.

use thiserror::Error;

/// Result type for notification sync operations.
pub type Result<T> = std::result::Result<T, NotifyError>;

/// Errors that can occur while synchronizing notifications.
#[derive(Error, Debug)]
pub enum NotifyError {
    /// No usable access token and the refresh path did not produce one.
    #[error("Credential error: {0}")]
    Credential(String),

    /// Push transport failure (connect, handshake, send, decode).
    #[error("Transport error: {0}")]
    Transport(String),

    /// REST endpoint answered with a non-success status.
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// User or entity lookup failed, the original text stays unresolved.
    #[error("Lookup error: {0}")]
    Lookup(String),

    /// Invalid engine configuration.
    #[error("Config error: {0}")]
    Config(String),

    /// Network error.
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// JSON error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl NotifyError {
    /// Create a credential error.
    pub fn credential(msg: impl Into<String>) -> Self {
        Self::Credential(msg.into())
    }

    /// Create a transport error.
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Create an API error from a status code and response body.
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// Create a lookup error.
    pub fn lookup(msg: impl Into<String>) -> Self {
        Self::Lookup(msg.into())
    }

    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Whether retrying without operator action can plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Network(_) => true,
            Self::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// Whether the operator has to sign in again.
    pub fn requires_login(&self) -> bool {
        matches!(self, Self::Credential(_) | Self::Api { status: 401, .. })
    }
}
