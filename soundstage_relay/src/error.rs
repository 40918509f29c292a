// Error types for the relay crate.
//
// Runtime faults on live connections (write failures, dropped sockets,
// malformed frames) are absorbed and logged where they happen; these enums
// only cover what a caller can act on: startup failures, emits attempted
// while offline, and bad configuration.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Failures starting the relay server.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("failed to bind relay on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("relay I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Failures on the device side of the transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("not connected to relay")]
    NotConnected,

    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("relay I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("handshake rejected: {0}")]
    Rejected(String),

    #[error("unexpected handshake reply: {0}")]
    Handshake(String),
}

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("invalid value {value:?} for {var}")]
    InvalidEnv { var: String, value: String },
}
