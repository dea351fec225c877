//! Error taxonomy for the output backend.
//!
//! Every failure raised by this crate bottoms out in an [`EmitError`] so
//! callers can tell caller bugs apart from environmental failures by
//! downcasting through `anyhow`.

use std::fmt;

/// Classified failure raised by the writer core.
#[derive(Debug)]
pub enum EmitError {
    /// Unknown output format or assembly dialect. Rejected at writer
    /// construction, before any I/O happens.
    Configuration(String),
    /// Caller contract violation, e.g. a function that was never bound
    /// to a target ABI. Not a recoverable runtime condition.
    Precondition(String),
    /// Failure on the backing output file (open/write/close).
    Io(std::io::Error),
    /// Failure propagated from the instruction encoder. Opaque to the
    /// writer core.
    Encoding(String),
}

impl fmt::Display for EmitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EmitError::Configuration(msg) => write!(f, "configuration error: {}", msg),
            EmitError::Precondition(msg) => write!(f, "precondition violated: {}", msg),
            EmitError::Io(err) => write!(f, "i/o failure: {}", err),
            EmitError::Encoding(msg) => write!(f, "encoding failure: {}", msg),
        }
    }
}

impl std::error::Error for EmitError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EmitError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for EmitError {
    fn from(err: std::io::Error) -> Self {
        EmitError::Io(err)
    }
}
