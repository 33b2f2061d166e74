//! Error types for the archive engine.

use std::fmt;

use super::format::Method;

/// Any error that can occur while reading, writing or streaming a ZIP
/// archive.
///
/// This maps onto the error-kind catalogue of the archive core: rather than
/// one flat enum of kind tags, each kind that carries structured context
/// (an offset, an expected/actual pair, a method name) gets a proper
/// variant so callers can match on it without re-parsing a message.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No data was found where some was expected (e.g. an empty read past EOF).
    #[error("no data available")]
    NoData,

    /// The archive (or a structure within it) is not well-formed.
    #[error("invalid data: {0}")]
    InvalidData(&'static str),

    /// Failed to read from the backing stream.
    #[error("read error: {0}")]
    Read(#[source] std::io::Error),

    /// Failed to write to the backing stream.
    #[error("write error: {0}")]
    Write(#[source] std::io::Error),

    /// Failed to seek within the backing stream.
    #[error("seek error: {0}")]
    Seek(#[source] std::io::Error),

    /// A filesystem operation (creating a file, a symlink, setting
    /// permissions) failed.
    #[error("file error: {0}")]
    File(#[source] std::io::Error),

    /// The requested operation, or the archive's format variant, isn't
    /// supported by this implementation.
    #[error("not supported: {0}")]
    NoSupport(&'static str),

    /// A path was required but none was given, or resolved to nothing.
    #[error("missing path")]
    MissingPath,

    /// The caller isn't allowed to perform the requested operation.
    #[error("permission denied")]
    NoPermission,

    /// A fixed-size buffer overflowed.
    #[error("buffer overflow")]
    BufferOverflow,

    /// Memory could not be allocated for the requested operation.
    #[error("allocation failure")]
    AllocMemory,

    /// The archive uses a feature that requires a newer version of this
    /// implementation than the one in use (mirrors the inflater's
    /// `VERSION_ERROR`).
    #[error("wrong version")]
    WrongVersion,

    /// A (de)compression error for the given method.
    #[error("{method:?} decompression error: {msg}")]
    Decompression {
        /// The compression method that was in use.
        method: Method,
        /// Additional detail.
        msg: String,
    },

    /// A glob/path lookup didn't match any entry.
    #[error("no matching entry")]
    Search,

    /// A feedback callback requested cancellation.
    #[error("cancelled")]
    Cancelled,

    /// Catch-all for failures that don't fit another variant.
    #[error("failed: {0}")]
    Failed(String),
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Read(e)
    }
}

impl From<Error> for std::io::Error {
    fn from(e: Error) -> Self {
        match e {
            Error::Read(e) | Error::Write(e) | Error::Seek(e) | Error::File(e) => e,
            other => std::io::Error::other(other),
        }
    }
}

/// Outcome a feedback callback can return from an archive operation.
///
/// Mirrors §6's `Feedback` contract: `continue` proceeds, `skip` moves past
/// the current entry without aborting the whole operation, `cancel` (or
/// `terminate`, its XPath-side counterpart) aborts the operation entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedbackAction {
    /// Keep going.
    Continue,
    /// Skip the current entry, keep going with the rest.
    Skip,
    /// Abort the whole operation.
    Cancel,
}

impl fmt::Display for FeedbackAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeedbackAction::Continue => write!(f, "continue"),
            FeedbackAction::Skip => write!(f, "skip"),
            FeedbackAction::Cancel => write!(f, "cancel"),
        }
    }
}
