//! Writer pipeline: assemble a complete archive over a byte sink.
//!
//! The sink is wrapped in a [`ChecksumWriter`], then magic, TOC block and
//! data block are written through it in order. File bodies are pulled
//! from a caller-supplied [`FileSource`] in the TOC's traversal order and
//! concatenated into the single data block. No per-file offsets are
//! stored anywhere.

use std::io::{self, Read, Write};

use crate::block::BlockWriter;
use crate::checksum::{ChecksumScheme, ChecksumWriter};
use crate::compression::CompressionScheme;
use crate::error::ArchiveError;
use crate::magic::write_magic;
use crate::toc::{write_toc, EntryKind, FileEntry, Toc};

#[derive(Debug, Clone, Copy)]
pub struct CreateOptions {
    pub compression: CompressionScheme,
    pub level: i32,
    pub checksum: ChecksumScheme,
}

impl Default for CreateOptions {
    fn default() -> CreateOptions {
        // 64-bit lanes make the 512-bit hashes the faster pick
        #[cfg(target_arch = "x86_64")]
        let checksum = ChecksumScheme::Sha2_512;
        #[cfg(not(target_arch = "x86_64"))]
        let checksum = ChecksumScheme::Sha2_256;

        CreateOptions {
            compression: CompressionScheme::Flate,
            level: 9,
            checksum,
        }
    }
}

/// Supplies the body of each file named by the TOC, in traversal order.
pub trait FileSource {
    fn open(&mut self, path: &[String], file: &FileEntry)
        -> Result<Box<dyn Read>, ArchiveError>;
}

impl<F> FileSource for F
where
    F: FnMut(&[String], &FileEntry) -> Result<Box<dyn Read>, ArchiveError>,
{
    fn open(
        &mut self,
        path: &[String],
        file: &FileEntry,
    ) -> Result<Box<dyn Read>, ArchiveError> {
        self(path, file)
    }
}

/// Write a complete archive to `sink`.
///
/// Every file's producer must supply exactly the number of bytes its TOC
/// entry declares; anything shorter or longer fails the whole create.
pub fn create_from<W, S>(
    sink: W,
    toc: &Toc,
    source: &mut S,
    options: &CreateOptions,
) -> Result<(), ArchiveError>
where
    W: Write,
    S: FileSource + ?Sized,
{
    toc.validate()?;

    let mut csum = ChecksumWriter::new(sink, options.checksum);
    write_magic(&mut csum)?;
    write_toc(&mut csum, toc, options.compression, options.level)?;

    let mut data = BlockWriter::new(csum, options.compression, options.level)?;
    toc.walk(|path, entry| {
        let EntryKind::File(file) = &entry.kind else {
            return Ok(());
        };

        let mut body = source.open(path, file)?;
        let copied = io::copy(&mut body.by_ref().take(file.size), &mut data)?;

        // one probe byte past the declared size catches over-long producers
        let mut probe = [0u8; 1];
        let extra = body.read(&mut probe)?;
        if copied != file.size || extra != 0 {
            return Err(ArchiveError::SizeMismatch {
                path: path.join("/"),
                declared: file.size,
                actual: copied + extra as u64,
            });
        }
        Ok(())
    })?;

    let csum = data.close()?;
    csum.close()?;
    Ok(())
}

#[cfg(test)]
mod test_create {
    use super::*;
    use crate::error::ArchiveError;
    use crate::magic::MAGIC;
    use crate::toc::{Entry, Tree};
    use std::io::Cursor;

    fn file(name: &str, size: u64) -> Entry {
        Entry {
            name: name.to_string(),
            kind: EntryKind::File(FileEntry {
                size,
                ..Default::default()
            }),
        }
    }

    struct FixedBody(&'static [u8]);

    impl FileSource for FixedBody {
        fn open(
            &mut self,
            _path: &[String],
            _file: &FileEntry,
        ) -> Result<Box<dyn Read>, ArchiveError> {
            Ok(Box::new(Cursor::new(self.0.to_vec())))
        }
    }

    fn one_file_toc(size: u64) -> Toc {
        Toc {
            case_safe: false,
            root: Tree {
                entries: vec![file("f", size)],
            },
        }
    }

    #[test]
    fn archive_starts_with_magic() {
        let mut out = Vec::new();
        create_from(
            &mut out,
            &one_file_toc(5),
            &mut FixedBody(b"12345"),
            &CreateOptions::default(),
        )
        .unwrap();

        assert_eq!(&out[..3], MAGIC);
        assert_eq!(out[3], 1);
    }

    #[test]
    fn short_producer_is_rejected() {
        let mut out = Vec::new();
        let err = create_from(
            &mut out,
            &one_file_toc(13),
            &mut FixedBody(b"12345"),
            &CreateOptions::default(),
        )
        .unwrap_err();

        match err {
            ArchiveError::SizeMismatch {
                path,
                declared,
                actual,
            } => {
                assert_eq!(path, "f");
                assert_eq!(declared, 13);
                assert_eq!(actual, 5);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn long_producer_is_rejected() {
        let mut out = Vec::new();
        let err = create_from(
            &mut out,
            &one_file_toc(3),
            &mut FixedBody(b"12345"),
            &CreateOptions::default(),
        )
        .unwrap_err();

        match err {
            ArchiveError::SizeMismatch {
                declared, actual, ..
            } => {
                assert_eq!(declared, 3);
                assert_eq!(actual, 4);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn invalid_toc_writes_nothing() {
        let toc = Toc {
            case_safe: false,
            root: Tree {
                entries: vec![file("dup", 1), file("dup", 1)],
            },
        };

        let mut out = Vec::new();
        let err = create_from(
            &mut out,
            &toc,
            &mut FixedBody(b"x"),
            &CreateOptions::default(),
        )
        .unwrap_err();

        assert!(matches!(err, ArchiveError::TocInvalid { .. }));
        assert!(out.is_empty());
    }

    #[test]
    fn closure_sources_work_too() {
        let mut source = |_path: &[String],
                          _file: &FileEntry|
         -> Result<Box<dyn Read>, ArchiveError> {
            Ok(Box::new(Cursor::new(b"12345".to_vec())))
        };

        let mut out = Vec::new();
        create_from(
            &mut out,
            &one_file_toc(5),
            &mut source,
            &CreateOptions::default(),
        )
        .unwrap();
        assert!(!out.is_empty());
    }
}
