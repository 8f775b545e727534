//! Length-prefixed compressed blocks.
//!
//! A block on the wire is:
//!
//! | Type    | Name    | Description |
//! | ------: | ------- | ----------- |
//! | uvarint | length  | Number of compressed payload bytes after the header |
//! | u8      | scheme  | [`CompressionScheme`] of the payload |
//! | [u8; N] | payload | The compressed encoding of the block content |
//!
//! The length can only be known once compression finishes, so the writer
//! buffers the compressed payload in memory and emits header plus payload
//! when it is closed.

use std::io::{self, Read, Take, Write};

use byteorder::{ReadBytesExt, WriteBytesExt};

use crate::compression::{CompressionScheme, Decoder, Encoder};
use crate::error::ArchiveError;
use crate::varint::{read_uvarint, write_uvarint};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    pub length: u64,
    pub compression: CompressionScheme,
}

impl BlockHeader {
    pub fn write<W: Write>(&self, w: &mut W) -> io::Result<()> {
        write_uvarint(w, self.length)?;
        w.write_u8(self.compression as u8)
    }

    pub fn read<R: Read>(r: &mut R) -> Result<BlockHeader, ArchiveError> {
        let length = read_uvarint(r)?;
        let compression = CompressionScheme::from_u8(r.read_u8()?)?;
        Ok(BlockHeader {
            length,
            compression,
        })
    }
}

/// Writer half of the block layer.
///
/// Everything written is compressed into an in-memory buffer. Nothing
/// reaches the sink until [`BlockWriter::close`], which emits the header
/// and the buffered payload, leaving the sink positioned just past it.
pub struct BlockWriter<W: Write> {
    inner: W,
    scheme: CompressionScheme,
    encoder: Encoder<Vec<u8>>,
}

impl<W: Write> BlockWriter<W> {
    pub fn new(sink: W, scheme: CompressionScheme, level: i32) -> io::Result<BlockWriter<W>> {
        Ok(BlockWriter {
            inner: sink,
            scheme,
            encoder: scheme.writer(Vec::new(), level)?,
        })
    }

    pub fn close(mut self) -> io::Result<W> {
        let payload = self.encoder.finish()?;
        let header = BlockHeader {
            length: payload.len() as u64,
            compression: self.scheme,
        };
        header.write(&mut self.inner)?;
        self.inner.write_all(&payload)?;
        Ok(self.inner)
    }
}

impl<W: Write> Write for BlockWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.encoder.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.encoder.flush()
    }
}

/// Parse a block header from `source` and return a decoder over a
/// length-limited view of it, so no codec can read past the block into
/// whatever follows.
pub fn block_reader<R: Read>(mut source: R) -> Result<Decoder<Take<R>>, ArchiveError> {
    let header = BlockHeader::read(&mut source)?;
    if header.length > i64::MAX as u64 {
        return Err(ArchiveError::BlockTooLarge(header.length));
    }
    Ok(header.compression.reader(source.take(header.length))?)
}

#[cfg(test)]
mod test_block {
    use super::*;
    use crate::buf::drain;
    use crate::error::ArchiveError;
    use crate::varint::uvarint_len;
    use std::io::{Cursor, Seek, SeekFrom};

    #[test]
    fn none_scheme_framing() {
        let payload = b"Hello World!!";

        let mut bw = BlockWriter::new(Vec::new(), CompressionScheme::None, 0).unwrap();
        bw.write_all(payload).unwrap();
        let encoded = bw.close().unwrap();

        assert_eq!(
            encoded.len(),
            uvarint_len(payload.len() as u64) + 1 + payload.len()
        );
        assert_eq!(&encoded[2..], payload);
    }

    #[test]
    fn flate_roundtrip() {
        let payload: Vec<u8> = b"some payload "
            .iter()
            .cycle()
            .take(4096)
            .copied()
            .collect();

        let data = Cursor::new(Vec::new());
        let mut bw = BlockWriter::new(data, CompressionScheme::Flate, 9).unwrap();
        bw.write_all(&payload).unwrap();
        let mut data = bw.close().unwrap();
        data.seek(SeekFrom::Start(0)).unwrap();

        let mut dec = block_reader(data).unwrap();
        let mut out = Vec::new();
        dec.read_to_end(&mut out).unwrap();

        assert_eq!(out, payload);
    }

    #[test]
    fn adjacent_blocks_stay_separate() {
        let mut data = Cursor::new(Vec::new());

        let mut bw = BlockWriter::new(&mut data, CompressionScheme::Flate, 9).unwrap();
        bw.write_all(b"first block").unwrap();
        bw.close().unwrap();

        let mut bw = BlockWriter::new(&mut data, CompressionScheme::None, 0).unwrap();
        bw.write_all(b"second block").unwrap();
        bw.close().unwrap();

        data.seek(SeekFrom::Start(0)).unwrap();

        let mut dec = block_reader(&mut data).unwrap();
        let mut out = Vec::new();
        dec.read_to_end(&mut out).unwrap();
        assert_eq!(&out[..], b"first block");

        // position the source at the next block before reading on
        drain(&mut dec.into_inner()).unwrap();

        let mut dec = block_reader(&mut data).unwrap();
        out.clear();
        dec.read_to_end(&mut out).unwrap();
        assert_eq!(&out[..], b"second block");
    }

    #[test]
    fn oversized_length_is_rejected() {
        let mut header = Vec::new();
        crate::varint::write_uvarint(&mut header, u64::MAX).unwrap();
        header.push(CompressionScheme::None as u8);

        let err = block_reader(Cursor::new(header)).unwrap_err();
        match err {
            ArchiveError::BlockTooLarge(len) => assert_eq!(len, u64::MAX),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn unknown_scheme_in_header() {
        // length 0, scheme 9
        let err = block_reader(Cursor::new(vec![0x00, 0x09])).unwrap_err();
        match err {
            ArchiveError::UnknownCompression(id) => assert_eq!(id, 9),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn empty_block_roundtrip() {
        let bw = BlockWriter::new(Vec::new(), CompressionScheme::None, 0).unwrap();
        let encoded = bw.close().unwrap();
        assert_eq!(&encoded[..], &[0x00, CompressionScheme::None as u8]);

        let mut dec = block_reader(Cursor::new(encoded)).unwrap();
        let mut out = Vec::new();
        dec.read_to_end(&mut out).unwrap();
        assert!(out.is_empty());
    }
}
