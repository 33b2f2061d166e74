//! A PKZIP archive engine: read/write, streaming DEFLATE, in-place
//! removal, a read-only virtual filesystem view, and a gzip/zlib/deflate
//! stream proxy (§2.1).
//!
//! ```no_run
//! use std::io::Cursor;
//! use arcquery::archive::{Archive, AddFileOptions};
//!
//! let mut archive = Archive::create(Cursor::new(Vec::new()));
//! archive.add_file("hello.txt", &mut &b"hello"[..], AddFileOptions::default())?;
//! archive.finalize()?;
//! # Ok::<(), arcquery::archive::Error>(())
//! ```

mod archive;
mod deflate;
mod encoding;
mod entry;
mod error;
mod feedback;
pub mod format;
mod io;
mod scan;
mod stream_proxy;
pub mod vfs;

pub use archive::{glob_match, AddFileOptions, Archive};
pub use encoding::Encoding;
pub use entry::{CompressedItem, CompressedItemFlags, Entry};
pub use error::{Error, FeedbackAction};
pub use feedback::{Feedback, FeedbackCallback, FeedbackKind};
pub use io::{ByteIo, Whence};
pub use stream_proxy::{ProxyFormat, ProxySink, ProxySource, StreamProxy};
