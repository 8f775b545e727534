//! Trailing checksum layer.
//!
//! The last bytes of an archive carry an integrity trailer:
//!
//! | Type    | Name       | Description |
//! | ------: | ---------- | ----------- |
//! | u8      | scheme     | [`ChecksumScheme`] identifier |
//! | [u8; N] | digest     | Digest over every preceding byte of the file |
//! | u8      | digest_len | N, so the trailer is parseable from the end |
//!
//! The final length byte is what keeps the archive a proper append-only
//! stream: a reader seeks one byte back from the end, learns N, seeks
//! `-(N + 2)` and has the whole trailer without touching anything else.
//! The NULL scheme writes `FF 00` and carries no digest.

use std::fmt;
use std::io::{self, Read, Seek, SeekFrom, Write};

use blake2::{Blake2b512, Blake2s256};
use byteorder::{ReadBytesExt, WriteBytesExt};
use digest::DynDigest;
use sha2::{Sha256, Sha512};
use sha3::{Sha3_256, Sha3_512};

use crate::error::ArchiveError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumScheme {
    Sha2_256 = 1,
    Sha2_512 = 2,
    Blake2s = 3,
    Blake2b = 4,
    Sha3_256 = 5,
    Sha3_512 = 6,
    /// Carries no digest and bypasses verification entirely.
    Null = 0xff,
}

impl fmt::Display for ChecksumScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChecksumScheme::Sha2_256 => "SHA2-256",
            ChecksumScheme::Sha2_512 => "SHA2-512",
            ChecksumScheme::Blake2s => "BLAKE2s",
            ChecksumScheme::Blake2b => "BLAKE2b",
            ChecksumScheme::Sha3_256 => "SHA3-256",
            ChecksumScheme::Sha3_512 => "SHA3-512",
            ChecksumScheme::Null => "NULL",
        };
        f.write_str(name)
    }
}

pub(crate) type Hasher = Box<dyn DynDigest + Send>;

impl ChecksumScheme {
    pub fn from_u8(id: u8) -> Result<ChecksumScheme, ArchiveError> {
        match id {
            1 => Ok(ChecksumScheme::Sha2_256),
            2 => Ok(ChecksumScheme::Sha2_512),
            3 => Ok(ChecksumScheme::Blake2s),
            4 => Ok(ChecksumScheme::Blake2b),
            5 => Ok(ChecksumScheme::Sha3_256),
            6 => Ok(ChecksumScheme::Sha3_512),
            0xff => Ok(ChecksumScheme::Null),
            other => Err(ArchiveError::UnknownChecksum(other)),
        }
    }

    pub fn digest_size(self) -> usize {
        match self {
            ChecksumScheme::Sha2_256 => 32,
            ChecksumScheme::Sha2_512 => 64,
            ChecksumScheme::Blake2s => 32,
            ChecksumScheme::Blake2b => 64,
            ChecksumScheme::Sha3_256 => 32,
            ChecksumScheme::Sha3_512 => 64,
            ChecksumScheme::Null => 0,
        }
    }

    pub(crate) fn hasher(self) -> Option<Hasher> {
        match self {
            ChecksumScheme::Sha2_256 => Some(Box::new(Sha256::default())),
            ChecksumScheme::Sha2_512 => Some(Box::new(Sha512::default())),
            ChecksumScheme::Blake2s => Some(Box::new(Blake2s256::default())),
            ChecksumScheme::Blake2b => Some(Box::new(Blake2b512::default())),
            ChecksumScheme::Sha3_256 => Some(Box::new(Sha3_256::default())),
            ChecksumScheme::Sha3_512 => Some(Box::new(Sha3_512::default())),
            ChecksumScheme::Null => None,
        }
    }
}

pub(crate) fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Tees every write into the running digest; close appends the trailer.
pub struct ChecksumWriter<W: Write> {
    inner: W,
    scheme: ChecksumScheme,
    hash: Option<Hasher>,
}

impl<W: Write> ChecksumWriter<W> {
    pub fn new(sink: W, scheme: ChecksumScheme) -> ChecksumWriter<W> {
        ChecksumWriter {
            hash: scheme.hasher(),
            inner: sink,
            scheme,
        }
    }

    /// Append the trailer and hand back the sink.
    pub fn close(mut self) -> io::Result<W> {
        self.inner.write_u8(self.scheme as u8)?;
        match self.hash.take() {
            Some(hash) => {
                let digest = hash.finalize();
                self.inner.write_all(&digest)?;
                self.inner.write_u8(digest.len() as u8)?;
            }
            None => self.inner.write_u8(0)?,
        }
        Ok(self.inner)
    }
}

impl<W: Write> Write for ChecksumWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        if let Some(hash) = self.hash.as_mut() {
            hash.update(&buf[..n]);
        }
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[derive(Debug)]
pub struct Trailer {
    pub scheme: ChecksumScheme,
    /// Absolute offset of the trailer's scheme byte, which is also where
    /// the checksummed payload ends.
    pub payload_end: u64,
    pub digest: Vec<u8>,
}

/// Seek to the end of `r`, parse the trailer, and seek back to where the
/// source was.
pub fn parse_trailer<R: Read + Seek>(r: &mut R) -> Result<Trailer, ArchiveError> {
    let start = r.stream_position()?;

    r.seek(SeekFrom::End(-1))?;
    let nominal_size = r.read_u8()?;

    // back over digest_len, the digest itself, and the scheme byte
    let payload_end = r.seek(SeekFrom::Current(-(i64::from(nominal_size) + 2)))?;
    let mut buf = vec![0u8; nominal_size as usize + 1];
    r.read_exact(&mut buf)?;

    let scheme = ChecksumScheme::from_u8(buf[0])?;
    if nominal_size as usize != scheme.digest_size() {
        return Err(ArchiveError::HashSizeMismatch {
            scheme,
            nominal: nominal_size,
            actual: scheme.digest_size(),
        });
    }

    r.seek(SeekFrom::Start(start))?;
    Ok(Trailer {
        scheme,
        payload_end,
        digest: buf[1..].to_vec(),
    })
}

/// Verifies the trailing checksum of a stream. The checksummed range is
/// assumed to begin at the source's position when the reader is built.
///
/// Reads stop at the payload end, so the trailer itself is never handed
/// out. Verification happens in [`ChecksumReader::close`], which also
/// checks that the payload was consumed exactly.
pub struct ChecksumReader<R: Read + Seek> {
    inner: R,
    scheme: ChecksumScheme,
    hash: Option<Hasher>,
    nominal: Vec<u8>,
    payload_end: u64,
    pos: u64,
}

impl<R: Read + Seek> ChecksumReader<R> {
    pub fn new(mut source: R) -> Result<ChecksumReader<R>, ArchiveError> {
        let trailer = parse_trailer(&mut source)?;
        let pos = source.stream_position()?;

        Ok(ChecksumReader {
            hash: trailer.scheme.hasher(),
            scheme: trailer.scheme,
            nominal: trailer.digest,
            payload_end: trailer.payload_end,
            pos,
            inner: source,
        })
    }

    pub fn scheme(&self) -> ChecksumScheme {
        self.scheme
    }

    /// Check that the payload was read to exactly its end, compare the
    /// digest, and hand back the source.
    pub fn close(mut self) -> Result<R, ArchiveError> {
        if self.pos != self.payload_end {
            return Err(ArchiveError::JunkAfterPayload {
                diff: self.payload_end - self.pos,
            });
        }
        if let Some(hash) = self.hash.take() {
            let actual = hash.finalize();
            if actual[..] != self.nominal[..] {
                return Err(ArchiveError::MismatchedChecksum {
                    scheme: self.scheme,
                    nominal: hex(&self.nominal),
                    actual: hex(&actual),
                });
            }
        }
        Ok(self.inner)
    }
}

impl<R: Read + Seek> Read for ChecksumReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let left = self.payload_end - self.pos;
        if left == 0 || buf.is_empty() {
            return Ok(0);
        }

        let want = u64::min(left, buf.len() as u64) as usize;
        let n = self.inner.read(&mut buf[..want])?;
        if let Some(hash) = self.hash.as_mut() {
            hash.update(&buf[..n]);
        }
        self.pos += n as u64;
        Ok(n)
    }
}

/// One-shot verification pass: hash from the current position to the
/// trailer's payload end, compare digests, and seek back so the source
/// can be read again from where it was.
pub fn verify<R: Read + Seek>(source: &mut R) -> Result<(), ArchiveError> {
    let trailer = parse_trailer(source)?;
    let Some(mut hash) = trailer.scheme.hasher() else {
        return Ok(());
    };

    let start = source.stream_position()?;
    let mut payload = source.by_ref().take(trailer.payload_end - start);
    let mut buf = [0u8; 32 * 1024];
    loop {
        let n = payload.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hash.update(&buf[..n]);
    }

    let actual = hash.finalize();
    if actual[..] != trailer.digest[..] {
        return Err(ArchiveError::MismatchedChecksum {
            scheme: trailer.scheme,
            nominal: hex(&trailer.digest),
            actual: hex(&actual),
        });
    }

    source.seek(SeekFrom::Start(start))?;
    Ok(())
}
