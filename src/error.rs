use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::checksum::ChecksumScheme;

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("bad magic: {0:?}")]
    BadMagic([u8; 3]),

    #[error("bad version: {found} (max supported {supported})")]
    BadVersion { found: u8, supported: u8 },

    #[error("unknown compression scheme {0:#04x}")]
    UnknownCompression(u8),

    #[error("unknown checksum scheme {0:#04x}")]
    UnknownChecksum(u8),

    #[error("mismatched hash size ({scheme}): trailer says {nominal}, scheme has {actual}")]
    HashSizeMismatch {
        scheme: ChecksumScheme,
        nominal: u8,
        actual: usize,
    },

    #[error("mismatched checksum ({scheme}): {actual} expected {nominal}")]
    MismatchedChecksum {
        scheme: ChecksumScheme,
        nominal: String,
        actual: String,
    },

    #[error("junk after payload ({diff} bytes)")]
    JunkAfterPayload { diff: u64 },

    #[error("block length {0} exceeds i64::MAX")]
    BlockTooLarge(u64),

    #[error("short read: got {got} of {wanted} bytes")]
    ShortRead { wanted: u64, got: u64 },

    #[error("invalid table of contents in {path:?}: {reason}")]
    TocInvalid { reason: String, path: String },

    #[error("decoding table of contents")]
    TocDecode(#[source] bincode::Error),

    #[error("encoding table of contents")]
    TocEncode(#[source] bincode::Error),

    #[error("file {path:?} declared {declared} bytes, producer supplied {actual}")]
    SizeMismatch {
        path: String,
        declared: u64,
        actual: u64,
    },

    #[error("can only unpack once, and not on a closed archive")]
    DoubleUnpack,

    #[error("directory {0:?} is not empty")]
    NotEmpty(PathBuf),

    #[error("making dir {path:?}")]
    FatalMkdir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{op} {path:?}")]
    FileIo {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("unpack cancelled")]
    Cancelled,

    #[error("{} errors while unpacking", .0.len())]
    Unpack(Vec<ArchiveError>),

    #[error("must supply with_raw_toc to open to use raw_toc")]
    NoRawToc,

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("{context}")]
    Context {
        context: String,
        #[source]
        source: Box<ArchiveError>,
    },
}

impl ArchiveError {
    /// Wrap this error with one more layer of context, preserving the
    /// original as the source.
    pub fn context(self, context: impl Into<String>) -> ArchiveError {
        ArchiveError::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error, skipping past context annotations.
    pub fn root_cause(&self) -> &ArchiveError {
        let mut err = self;
        while let ArchiveError::Context { source, .. } = err {
            err = source;
        }
        err
    }
}
