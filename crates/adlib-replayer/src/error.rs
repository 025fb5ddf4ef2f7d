//! Error types for AdLib file loading and playback

use opl2::Opl2Error;

/// Error type for AdLib replayer operations
#[derive(thiserror::Error, Debug)]
pub enum ReplayerError {
    /// No format probe recognized the input
    #[error("Unrecognized music format")]
    UnknownFormat,

    /// Structurally invalid file (bad header fields, offsets past EOF, ...)
    #[error("Malformed file: {0}")]
    Malformed(String),

    /// Read past the end of the byte source. Decoders treat this as a
    /// normal end-of-sequence in the command stream, but as a hard error
    /// while parsing headers.
    #[error("Unexpected end of data")]
    Truncated,

    /// The format requires a companion instrument bank that was not supplied
    #[error("Missing companion instrument bank")]
    MissingBank,

    /// An instrument name could not be resolved against the bank
    #[error("Unknown instrument: {0}")]
    UnknownInstrument(String),

    /// IO error from filesystem
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Error from underlying chip emulation
    #[error("Chip error: {0}")]
    Chip(#[from] Opl2Error),

    /// Audio device error
    #[error("Audio error: {0}")]
    Audio(String),
}

impl From<String> for ReplayerError {
    fn from(s: String) -> Self {
        ReplayerError::Malformed(s)
    }
}

impl From<&str> for ReplayerError {
    fn from(s: &str) -> Self {
        ReplayerError::Malformed(s.to_string())
    }
}

/// Result type for replayer operations
pub type Result<T> = std::result::Result<T, ReplayerError>;
