//! Error types for the synchronization client

use thiserror::Error;

/// Main error type for the library
#[derive(Error, Debug)]
pub enum Error {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors reported by a [`Transport`](crate::transport::Transport) call
///
/// `Unavailable` is the "not ready yet" sentinel: callers skip the affected
/// unit of work and retry on the next tick.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Value not available yet")]
    Unavailable,

    #[error("Invalid session")]
    InvalidSession,

    #[error("Index {index} out of range (count {count})")]
    IndexOutOfRange { index: usize, count: usize },

    #[error("Message type disabled")]
    MessageTypeDisabled,

    #[error("Rejected by transport: {0}")]
    Rejected(String),
}

impl TransportError {
    /// Whether the failure is transient and worth retrying next tick
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable | Self::IndexOutOfRange { .. })
    }
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Read(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("No platform config directory")]
    NoConfigDir,
}

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// Result type alias for transport calls
pub type TransportResult<T> = std::result::Result<T, TransportError>;
