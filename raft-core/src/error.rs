//! Ambient, non-protocol error types (§7). Protocol-intrinsic failures
//! (stale term, log inconsistency, vote conflict) are never raised as
//! errors — they are handled entirely as in-band reply traffic.

use thiserror::Error;

/// Failures from the [`crate::storage::Storage`] collaborator.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode persisted state: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("storage not open")]
    NotOpen,
}

/// Failures from the [`crate::transport::Transport`] collaborator.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode outgoing message: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("peer channel closed: {0}")]
    ChannelClosed(String),
}

/// Failures loading a [`crate::config::ClusterConfig`] from a file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),
}
