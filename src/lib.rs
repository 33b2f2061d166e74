#![warn(missing_docs)]
//! `arcquery` bundles two independent engines that happen to live in the
//! same source tree:
//!
//!   * [`archive`] — a PKZIP reader/writer with a streaming DEFLATE codec,
//!     a gzip/zlib/deflate stream proxy, and a read-only virtual filesystem
//!     view over named archives.
//!   * [`xpath`] — an XPath 2.0 / XQuery tokenizer, parser, evaluator and
//!     function library over a host-provided XML tree.
//!
//! Neither module depends on the other. A consumer interested in only one
//! of the two engines can simply ignore the other module tree.

pub mod archive;
pub mod xpath;
