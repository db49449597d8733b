//! Error types for the Obsidian protocol stack.

use thiserror::Error;

use crate::codec::CodecError;

/// Errors that can occur when submitting a frame for transmission.
#[derive(Debug, Error)]
pub enum SendError {
    /// The frame carries a parameter name reserved for the engine.
    #[error("frame uses reserved parameter name {0:?}")]
    ReservedParameter(char),

    /// The frame could not be serialized.
    #[error("encode error: {0}")]
    Encode(#[from] CodecError),

    /// The engine or physical layer has shut down.
    #[error("the layer has shut down")]
    ShutDown,
}

/// Errors in the persisted peer registry.
#[derive(Debug, Error)]
pub enum PersistError {
    /// Stored data could not be parsed.
    #[error("invalid stored peer data: {0}")]
    InvalidData(String),

    /// I/O error from the backing store.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors building a configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A timing value is outside its allowed range.
    #[error("invalid timing value for {field}: {reason}")]
    InvalidTiming {
        /// Which configuration field.
        field: &'static str,
        /// Why it was rejected.
        reason: String,
    },
}

/// Top-level errors for the protocol stack.
#[derive(Debug, Error)]
pub enum ObsidianError {
    /// Codec error.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Send error.
    #[error("send error: {0}")]
    Send(#[from] SendError),

    /// Persistence error.
    #[error("persist error: {0}")]
    Persist(#[from] PersistError),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// I/O error.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
