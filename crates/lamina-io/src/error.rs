//! Errors raised while selecting or opening a frame generator.

use lamina_pipeline::DecodeError;

/// Errors from generator dispatch, opening, and message decoding.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// No registered generator accepts the identifier.
    #[error("no frame generator accepts source {id}")]
    NoGenerator {
        /// The rejected identifier.
        id: String,
    },

    /// A generator accepted the identifier but could not start reading.
    #[error("failed to open source {id}: {reason}")]
    Open {
        /// The identifier being opened.
        id: String,
        /// What went wrong.
        reason: String,
    },

    /// An external decoder process could not be run.
    #[error("failed to run {program}: {source}")]
    Spawn {
        /// Program name.
        program: &'static str,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// An image message uses an encoding with no frame conversion.
    #[error("unsupported image encoding {encoding:?}")]
    UnsupportedEncoding {
        /// The message's encoding string.
        encoding: String,
    },

    /// An image message's buffer does not match its declared size.
    #[error("malformed image message: {0}")]
    MalformedMessage(String),

    /// A still image could not be decoded.
    #[error(transparent)]
    Decode(#[from] DecodeError),
}
