//! Errors raised while persisting or parsing `config.ron`.

use std::path::PathBuf;

/// Failure modes of [`Config`](crate::Config) persistence.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The platform has no per-user configuration directory.
    #[error("no configuration directory available on this platform")]
    NoConfigDir,

    /// Reading `config.ron` failed.
    #[error("failed to read {path}: {source}")]
    ReadError {
        /// File that could not be read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Writing `config.ron` (or creating its directory) failed.
    #[error("failed to write config: {0}")]
    WriteError(#[source] std::io::Error),

    /// The file is not valid RON for [`Config`](crate::Config).
    #[error("failed to parse config: {0}")]
    ParseError(#[source] ron::error::SpannedError),

    /// Serializing to RON failed.
    #[error("failed to serialize config: {0}")]
    SerializeError(#[source] ron::Error),
}
