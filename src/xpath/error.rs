//! Error types for the XPath/XQuery engine (§7 "Error kinds (XPath)").

/// Any error that can occur while compiling or evaluating a query.
///
/// The evaluator never panics or unwinds on a query it cannot evaluate —
/// every code path that the source models as setting an "unsupported"
/// latch (§5, §7) instead returns `Err` here, which is how idiomatic Rust
/// threads a failure through return values rather than an out-of-band
/// flag.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// The query text could not be parsed. Carries the concatenated
    /// diagnostics collected while tokenizing/parsing (§4.9: "collects
    /// error strings non-fatally... returns null on any hard failure").
    #[error("syntax error: {0}")]
    Syntax(String),

    /// An operation expected data that wasn't there (e.g. `exactly-one`
    /// on an empty sequence).
    #[error("no data available")]
    NoData,

    /// A lookup (variable, function, axis target) found no match.
    #[error("no match")]
    Search,

    /// Catch-all evaluation failure, with a human-readable message
    /// (§7: "a human-readable message in the document's error slot").
    #[error("{0}")]
    Failed(String),

    /// A function or constructor required an argument that was missing
    /// or empty.
    #[error("missing required argument")]
    NullArgs,
}

impl Error {
    /// Build a [`Error::Failed`] from a formatted message; the common
    /// case for evaluator-internal failures.
    pub fn failed(msg: impl Into<String>) -> Self {
        Error::Failed(msg.into())
    }
}
