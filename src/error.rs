//! Error taxonomy for player commands.
//!
//! These are the rejections a well-formed command can produce; each maps to
//! an `ACK FAIL` line addressed back to the requesting tag. Malformed input
//! (unknown verbs, bad arity, unparseable arguments) never reaches the
//! player and is answered with `ACK WHAT` at the connection layer instead.

use thiserror::Error;

/// A command rejection from the player or the audio subsystem.
#[derive(Debug, Error)]
pub enum DeckError {
    /// A state-requiring command arrived while no file was loaded.
    #[error("no file loaded")]
    NoAudio,

    /// The loaded file's format was refused by the output device.
    #[error("device rejected format: {0}")]
    BadFormat(String),

    /// The source builder refused the file.
    #[error("{0}")]
    DecoderBuild(String),

    /// No source builder is registered for the file's extension.
    #[error("no decoder for extension: {0}")]
    NoDecoder(String),

    /// A seek produced an unusable position.
    #[error("seek out of range: {0}")]
    SeekRange(String),
}

pub type DeckResult<T> = Result<T, DeckError>;
