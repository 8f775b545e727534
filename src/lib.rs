//! Solid archive (SAR) container format.
//!
//! A sarchive bundles a directory tree into a single byte stream with a
//! separately extractable, compressed table of contents, somewhat
//! comparable to ZIP or XAR. Unlike either, the file data is compressed
//! as one continuous solid block, which buys much better ratios for
//! archives of similar files at the cost of random access.
//!
//! # On-disk format
//!
//! | Offset | Field      | Description |
//! | -----: | ---------- | ----------- |
//! | 0      | `"SAR"`    | Magic bytes |
//! | 3      | version    | Format version, currently 1 |
//! | 4      | TOC block  | `uvarint(len)`, `scheme: u8`, compressed TOC |
//! | next   | data block | `uvarint(len)`, `scheme: u8`, compressed file data |
//! | end    | trailer    | `scheme: u8`, digest, `digest_len: u8` |
//!
//! The TOC is the bincode encoding of [`Toc`]. The data block is every
//! file's bytes concatenated in the TOC's depth-first order; boundaries
//! are reconstructed on read from each file's size, so nothing in the
//! format stores per-file offsets. The trailing checksum covers every
//! byte before it, and its final length byte makes it parseable by
//! seeking from the end without decoding anything else.
//!
//! The format deliberately does not preserve ownership ids or full POSIX
//! mode bits. Files carry a small set of cross-platform flags (read-only,
//! executable) plus Windows attribute bits instead.
//!
//! # Reading
//!
//! ```no_run
//! use std::fs::File;
//! use std::path::Path;
//!
//! use sarc::{open, CancelToken, OpenOptions};
//!
//! # fn main() -> Result<(), sarc::ArchiveError> {
//! let source = File::open("tree.sar")?;
//! let mut archive = open(source, OpenOptions::default())?;
//! archive.unpack_to(&CancelToken::new(), Path::new("./tree"))?;
//! # Ok(())
//! # }
//! ```
//!
//! # Writing
//!
//! ```no_run
//! use std::fs::File;
//! use std::io::Read;
//!
//! use sarc::{create_from, ArchiveError, CreateOptions, FileEntry, Toc};
//!
//! # fn main() -> Result<(), ArchiveError> {
//! # let toc = Toc::default();
//! let sink = File::create("tree.sar")?;
//! let mut bodies = |path: &[String], _file: &FileEntry| -> Result<Box<dyn Read>, ArchiveError> {
//!     Ok(Box::new(File::open(path.join("/"))?))
//! };
//! create_from(sink, &toc, &mut bodies, &CreateOptions::default())?;
//! # Ok(())
//! # }
//! ```

pub mod block;
pub mod buf;
pub mod checksum;
pub mod compression;
pub mod create;
pub mod error;
pub mod magic;
pub mod open;
mod platform;
pub mod toc;
pub mod unpack;
pub mod varint;

pub use checksum::ChecksumScheme;
pub use compression::CompressionScheme;
pub use create::{create_from, CreateOptions, FileSource};
pub use error::ArchiveError;
pub use open::{open, OpenOptions, OpenedArchive, Verification};
pub use toc::{
    read_toc, write_toc, CommonMode, Entry, EntryKind, FileEntry, PosixMode, Symlink, Toc, Tree,
    WinMode,
};
pub use unpack::CancelToken;
