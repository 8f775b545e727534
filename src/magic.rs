//! The envelope prefix of every archive: the magic bytes and a version.

use std::io::{self, Read, Write};

use crate::error::ArchiveError;

/// Magic bytes at the start of every archive.
pub const MAGIC: &[u8; 3] = b"SAR";

/// Highest archive format version this crate understands.
pub const VERSION: u8 = 1;

/// Write `SAR` plus the current version byte.
pub fn write_magic<W: Write>(w: &mut W) -> io::Result<()> {
    w.write_all(MAGIC)?;
    w.write_all(&[VERSION])
}

/// Read and check the magic, returning the archive's version byte.
///
/// Versions above [`VERSION`] are rejected; older ones are returned so the
/// caller can branch on them.
pub fn read_magic<R: Read>(r: &mut R) -> Result<u8, ArchiveError> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;

    if &buf[..3] != MAGIC {
        return Err(ArchiveError::BadMagic([buf[0], buf[1], buf[2]]));
    }

    let version = buf[3];
    if version > VERSION {
        return Err(ArchiveError::BadVersion {
            found: version,
            supported: VERSION,
        });
    }
    Ok(version)
}

#[cfg(test)]
mod test_magic {
    use super::*;
    use crate::error::ArchiveError;
    use std::io::Cursor;

    #[test]
    fn roundtrip() {
        let mut data = Vec::new();
        write_magic(&mut data).unwrap();
        assert_eq!(&data[..], b"SAR\x01");

        let version = read_magic(&mut Cursor::new(data)).unwrap();
        assert_eq!(version, 1);
    }

    #[test]
    fn zip_is_not_a_sarchive() {
        let err = read_magic(&mut Cursor::new(b"PK\x03\x04".to_vec())).unwrap_err();
        match err {
            ArchiveError::BadMagic(magic) => assert_eq!(&magic, b"PK\x03"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn future_version_is_rejected() {
        let err = read_magic(&mut Cursor::new(b"SAR\x04".to_vec())).unwrap_err();
        match err {
            ArchiveError::BadVersion { found, supported } => {
                assert_eq!(found, 4);
                assert_eq!(supported, 1);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn truncated_magic() {
        let err = read_magic(&mut Cursor::new(b"SA".to_vec())).unwrap_err();
        match err {
            ArchiveError::Io(e) => assert_eq!(e.kind(), std::io::ErrorKind::UnexpectedEof),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
