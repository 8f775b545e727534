//! Compression schemes for block payloads.
//!
//! Each scheme is identified by a single byte in the block header.
//! `None` is an identity pass-through, `Flate` is a raw deflate stream
//! (no gzip or zlib wrapper), and `Zstd` is a zstandard stream. Unknown
//! identifiers never silently decode.

use std::io::{self, BufReader, Read, Write};

use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;

use crate::error::ArchiveError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionScheme {
    None = 1,
    Flate = 2,
    Zstd = 3,
}

impl CompressionScheme {
    pub fn from_u8(id: u8) -> Result<CompressionScheme, ArchiveError> {
        match id {
            1 => Ok(CompressionScheme::None),
            2 => Ok(CompressionScheme::Flate),
            3 => Ok(CompressionScheme::Zstd),
            other => Err(ArchiveError::UnknownCompression(other)),
        }
    }

    /// A streaming encoder for this scheme, writing into `sink`.
    pub fn writer<W: Write>(self, sink: W, level: i32) -> io::Result<Encoder<W>> {
        Ok(match self {
            CompressionScheme::None => Encoder::None(sink),
            CompressionScheme::Flate => Encoder::Flate(DeflateEncoder::new(
                sink,
                flate2::Compression::new(level.clamp(0, 9) as u32),
            )),
            CompressionScheme::Zstd => {
                Encoder::Zstd(zstd::stream::write::Encoder::new(sink, level)?)
            }
        })
    }

    /// A streaming decoder for this scheme, reading from `source`.
    pub fn reader<R: Read>(self, source: R) -> io::Result<Decoder<R>> {
        Ok(match self {
            CompressionScheme::None => Decoder::None(source),
            CompressionScheme::Flate => Decoder::Flate(DeflateDecoder::new(source)),
            CompressionScheme::Zstd => Decoder::Zstd(zstd::stream::read::Decoder::new(source)?),
        })
    }
}

pub enum Encoder<W: Write> {
    None(W),
    Flate(DeflateEncoder<W>),
    Zstd(zstd::stream::write::Encoder<'static, W>),
}

impl<W: Write> Encoder<W> {
    /// Flush the compressed stream to completion and hand back the sink.
    pub fn finish(self) -> io::Result<W> {
        match self {
            Encoder::None(w) => Ok(w),
            Encoder::Flate(enc) => enc.finish(),
            Encoder::Zstd(enc) => enc.finish(),
        }
    }
}

impl<W: Write> Write for Encoder<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Encoder::None(w) => w.write(buf),
            Encoder::Flate(enc) => enc.write(buf),
            Encoder::Zstd(enc) => enc.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Encoder::None(w) => w.flush(),
            Encoder::Flate(enc) => enc.flush(),
            Encoder::Zstd(enc) => enc.flush(),
        }
    }
}

pub enum Decoder<R: Read> {
    None(R),
    Flate(DeflateDecoder<R>),
    Zstd(zstd::stream::read::Decoder<'static, BufReader<R>>),
}

impl<R: Read> Decoder<R> {
    /// Hand back the inner source. Compressed bytes the codec buffered but
    /// never consumed are discarded, so callers that need the source
    /// positioned at the end of the block must drain it afterwards.
    pub fn into_inner(self) -> R {
        match self {
            Decoder::None(r) => r,
            Decoder::Flate(dec) => dec.into_inner(),
            Decoder::Zstd(dec) => dec.finish().into_inner(),
        }
    }
}

impl<R: Read> std::fmt::Debug for Decoder<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let variant = match self {
            Decoder::None(_) => "None",
            Decoder::Flate(_) => "Flate",
            Decoder::Zstd(_) => "Zstd",
        };
        f.debug_tuple(variant).finish()
    }
}

impl<R: Read> Read for Decoder<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Decoder::None(r) => r.read(buf),
            Decoder::Flate(dec) => dec.read(buf),
            Decoder::Zstd(dec) => dec.read(buf),
        }
    }
}
