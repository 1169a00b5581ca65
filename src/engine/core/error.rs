use thiserror::Error;

use super::state::SessionState;

/// Errors raised by the encoding engine
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Input file name must not be empty")]
    EmptyFileName,

    #[error("Target bitrate must be a positive number of kb/s")]
    InvalidBitRate,

    #[error("Unsupported output format '{0}' (expected one of mp3, ogg, aac, wma)")]
    UnknownFormat(String),

    #[error("Malformed timestamp '{0}'")]
    MalformedTimestamp(String),

    #[error("Cannot {op} while session is {state:?}")]
    InvalidState {
        op: &'static str,
        state: SessionState,
    },

    #[error("Encoder channel is not available")]
    ChannelUnavailable,

    #[error("Failed to start encoder '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
