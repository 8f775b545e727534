//! Reader pipeline: parse the envelope, load the TOC, and hand out an
//! [`OpenedArchive`] ready for unpacking.
//!
//! Opening reads and validates the TOC but none of the file data. The
//! archive transitions once from open to either unpacked or closed and
//! never again. With the default `Late` verification a positive integrity
//! result only arrives from `close` (or from a finished unpack), because
//! the trailing checksum can only be compared after the whole payload has
//! streamed past it.

use std::io::{self, Read, Seek, Take};

use log::debug;

use crate::block::block_reader;
use crate::buf::{drain, TeeReader};
use crate::checksum::{self, ChecksumReader};
use crate::compression::Decoder;
use crate::error::ArchiveError;
use crate::magic::read_magic;
use crate::toc::{read_toc, Toc};

/// When checksum verification happens, relative to reading the archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verification {
    /// Verify when the archive is closed or an unpack finishes.
    #[default]
    Late,
    /// Stream the whole payload through the hash at open time, then read
    /// without a checksum layer. Avoids double hashing during unpack.
    Early,
    /// Skip checksum verification entirely.
    Never,
}

#[derive(Debug, Clone, Copy)]
pub struct OpenOptions {
    pub verification: Verification,
    /// Keep a copy of the raw compressed TOC block, retrievable through
    /// [`OpenedArchive::raw_toc`].
    pub with_raw_toc: bool,
    /// Read-ahead budget for unpacking, in bytes. Zero disables the
    /// read-ahead pipe.
    pub unpack_buffer_size: usize,
}

impl Default for OpenOptions {
    fn default() -> OpenOptions {
        OpenOptions {
            verification: Verification::Late,
            with_raw_toc: false,
            unpack_buffer_size: 16 * 1024 * 1024,
        }
    }
}

/// The archive source, wrapped in the verifying checksum layer when the
/// verification mode calls for one.
pub(crate) enum Source<R: Read + Seek> {
    Checked(ChecksumReader<R>),
    Raw(R),
}

impl<R: Read + Seek> Read for Source<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Source::Checked(r) => r.read(buf),
            Source::Raw(r) => r.read(buf),
        }
    }
}

impl<R: Read + Seek> Source<R> {
    /// Close the layer. The checked variant verifies here.
    pub(crate) fn close(self) -> Result<R, ArchiveError> {
        match self {
            Source::Checked(r) => r.close(),
            Source::Raw(r) => Ok(r),
        }
    }
}

pub(crate) type DataReader<R> = Decoder<Take<Source<R>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum State {
    Open,
    Unpacked,
    Closed,
}

/// An archive whose envelope and TOC have been read and validated. The
/// data block reader is positioned at the first file's first byte.
#[derive(Debug)]
pub struct OpenedArchive<R: Read + Seek> {
    pub(crate) toc: Toc,
    pub(crate) data: Option<DataReader<R>>,
    pub(crate) state: State,
    pub(crate) opts: OpenOptions,
    raw_toc: Option<Vec<u8>>,
    version: u8,
}

/// Open an archive from a seekable source.
pub fn open<R: Read + Seek>(
    source: R,
    options: OpenOptions,
) -> Result<OpenedArchive<R>, ArchiveError> {
    let mut src = match options.verification {
        Verification::Late => Source::Checked(
            ChecksumReader::new(source).map_err(|e| e.context("checksum setup"))?,
        ),
        Verification::Never => Source::Raw(source),
        Verification::Early => {
            let mut source = source;
            checksum::verify(&mut source).map_err(|e| e.context("early verification"))?;
            Source::Raw(source)
        }
    };

    let version = read_magic(&mut src).map_err(|e| e.context("checking magic"))?;
    if version != 1 {
        return Err(ArchiveError::BadVersion {
            found: version,
            supported: 1,
        });
    }

    let (toc, raw_toc) = if options.with_raw_toc {
        let mut raw = Vec::new();
        let mut tee = TeeReader::new(&mut src, &mut raw);
        let toc = read_toc(&mut tee).map_err(|e| e.context("reading TOC"))?;
        (toc, Some(raw))
    } else {
        let toc = read_toc(&mut src).map_err(|e| e.context("reading TOC"))?;
        (toc, None)
    };
    debug!("opened sar v{version}, {} root entries", toc.root.entries.len());

    let data = block_reader(src).map_err(|e| e.context("opening data block"))?;

    Ok(OpenedArchive {
        toc,
        data: Some(data),
        state: State::Open,
        opts: options,
        raw_toc,
        version,
    })
}

impl<R: Read + Seek> OpenedArchive<R> {
    pub fn toc(&self) -> &Toc {
        &self.toc
    }

    pub fn version(&self) -> u8 {
        self.version
    }

    /// Raw bytes of the compressed TOC block, captured at open time.
    pub fn raw_toc(&self) -> Result<&[u8], ArchiveError> {
        self.raw_toc.as_deref().ok_or(ArchiveError::NoRawToc)
    }

    /// Close the archive and the underlying source.
    ///
    /// From the open state this drains the rest of the data block so the
    /// checksum layer can verify. After an unpack or a previous close it
    /// is a no-op.
    pub fn close(&mut self) -> Result<(), ArchiveError> {
        if self.state != State::Open {
            return Ok(());
        }
        self.state = State::Closed;

        let Some(data) = self.data.take() else {
            return Ok(());
        };
        // only the late-verifying layer needs the rest of the payload
        finish(data, self.opts.verification == Verification::Late)
    }
}

/// Drain what remains of the data block and close the source.
///
/// With `verify` set, both the decompressed stream and the residual
/// compressed bytes are discarded by streaming (never by a precomputed
/// size sum) so the checksum layer sees the whole payload. A checksum
/// failure wins over a decode failure, since corrupt input produces both.
pub(crate) fn finish<R: Read + Seek>(
    mut data: DataReader<R>,
    verify: bool,
) -> Result<(), ArchiveError> {
    if !verify {
        // abort path: close the source without verification
        drop(data);
        return Ok(());
    }

    let decode_err = drain(&mut data).err();
    let mut rest = data.into_inner();
    drain(&mut rest)?;
    rest.into_inner().close()?;

    match decode_err {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}
