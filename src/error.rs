//! Error taxonomy for the metadata strippers.

use std::io;
use thiserror::Error;

/// Failure while stripping a single file.
///
/// The batch runner never propagates these: each one becomes an `Error`
/// result line carrying [`StripError::kind`] and the display message.
#[derive(Debug, Error)]
pub enum StripError {
    /// The file does not start with the container signature it was routed to.
    #[error("not a valid {0} file (bad signature)")]
    Format(&'static str),

    /// A length-prefixed field runs past the end of the file.
    #[error("unexpected end of file while reading {0}")]
    Truncated(&'static str),

    /// A declared length makes no sense (too small or too large).
    #[error("{0}")]
    InvalidData(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl StripError {
    /// Short taxonomy name shown in `[Error] [<kind>: <message>]` lines.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Format(_) => "FormatError",
            Self::Truncated(_) => "TruncatedError",
            Self::InvalidData(_) => "InvalidDataError",
            Self::Io(_) => "IoError",
        }
    }
}

pub type Result<T> = std::result::Result<T, StripError>;
