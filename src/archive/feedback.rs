//! Progress feedback for compress/decompress operations (§6).

use super::error::FeedbackAction;

/// What kind of operation a [`Feedback`] record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedbackKind {
    /// An entry is being written.
    Compress,
    /// An entry is being extracted.
    Decompress,
}

/// One progress notification, emitted per matched entry during a
/// wildcarded extract or during `add_file` (§4.4 step 5, §4.5 step 2).
#[derive(Debug, Clone)]
pub struct Feedback {
    /// Whether this is a compress or decompress operation.
    pub kind: FeedbackKind,
    /// Index of this entry among all matches in the current operation.
    pub index: usize,
    /// Year component of the entry's modified timestamp.
    pub year: i32,
    /// Month component (1-12).
    pub month: u32,
    /// Day component (1-31).
    pub day: u32,
    /// Hour component (0-23).
    pub hour: u32,
    /// Minute component (0-59).
    pub minute: u32,
    /// Second component (0-59).
    pub second: u32,
    /// Entry path inside the archive.
    pub path: String,
    /// Destination path on the host side, when applicable.
    pub dest: Option<String>,
    /// Uncompressed size of the entry.
    pub original_size: u64,
    /// Compressed size of the entry.
    pub compressed_size: u64,
    /// Bytes processed so far for this entry (0 at the first callback).
    pub progress: u64,
}

/// A caller-supplied callback invoked with [`Feedback`] records.
///
/// Boxed as a trait object (rather than a bare `fn`) so a host can close
/// over arbitrary state — mirrors §9's "callback plurality" note: both the
/// native-closure and opaque-script-hook shapes collapse to one
/// polymorphic value here.
pub trait FeedbackCallback: FnMut(&Feedback) -> FeedbackAction {}
impl<F> FeedbackCallback for F where F: FnMut(&Feedback) -> FeedbackAction {}
