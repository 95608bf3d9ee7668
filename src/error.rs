//! Error types shared across streamvault.
//!
//! Session-facing failures are returned as typed results to the caller;
//! background monitor loops log and continue instead of propagating.

use std::path::PathBuf;

/// Common error type for streamvault operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No session exists for the given stream id. Distinct from a session in
    /// the `error` state: this means "never started" or "already cleaned up".
    #[error("No session for stream {0}")]
    SessionNotFound(u32),

    /// The external transcoder process could not be started.
    #[error("Failed to spawn transcoder '{binary}': {source}")]
    Spawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },

    /// A seek target fell outside the retained window.
    #[error("Seek to {requested:.1}s outside available range {start:.1}s..{end:.1}s")]
    OutOfRangeSeek {
        requested: f64,
        start: f64,
        end: f64,
    },

    /// A quality variant carried a bitrate the command builder cannot parse.
    #[error("Invalid bitrate '{0}' (expected e.g. \"5000k\", \"2M\" or plain bits/s)")]
    InvalidBitrate(String),

    /// An ABR session was requested with no enabled variants.
    #[error("No enabled variants for stream {0}")]
    NoEnabledVariants(u32),

    /// A manifest could not be written to disk.
    #[error("Failed to write manifest {path:?}: {source}")]
    ManifestWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// An I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration was provided.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Create a new InvalidConfig error.
    pub fn invalid_config<S: Into<String>>(msg: S) -> Self {
        Self::InvalidConfig(msg.into())
    }
}

/// Result type alias using the common Error type.
pub type Result<T> = std::result::Result<T, Error>;
