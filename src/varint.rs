//! Unsigned LEB128 integers, as used by block headers.
//!
//! Little-endian groups of 7 bits, high bit set on every byte except the
//! last. A `u64` needs at most 10 bytes.

use std::io::{self, Read, Write};

use byteorder::ReadBytesExt;

pub const MAX_UVARINT_LEN: usize = 10;

/// Encode `value` to `w`, returning the number of bytes written.
pub fn write_uvarint<W: Write>(w: &mut W, mut value: u64) -> io::Result<usize> {
    let mut buf = [0u8; MAX_UVARINT_LEN];
    let mut i = 0;

    while value >= 0x80 {
        buf[i] = (value as u8) | 0x80;
        value >>= 7;
        i += 1;
    }
    buf[i] = value as u8;

    w.write_all(&buf[..=i])?;
    Ok(i + 1)
}

/// Decode one unsigned varint from `r`. Encodings that overflow a `u64`
/// are rejected rather than wrapped.
pub fn read_uvarint<R: Read>(r: &mut R) -> io::Result<u64> {
    let mut value: u64 = 0;
    let mut shift: u32 = 0;

    for i in 0..MAX_UVARINT_LEN {
        let byte = r.read_u8()?;
        if i == MAX_UVARINT_LEN - 1 {
            // The tenth byte only has room for the top bit of a u64.
            if byte > 1 {
                break;
            }
            return Ok(value | (u64::from(byte) << shift));
        }
        if byte < 0x80 {
            return Ok(value | (u64::from(byte) << shift));
        }
        value |= u64::from(byte & 0x7f) << shift;
        shift += 7;
    }
    Err(io::Error::new(
        io::ErrorKind::InvalidData,
        "uvarint overflows u64",
    ))
}

/// Number of bytes `write_uvarint` emits for `value`.
pub fn uvarint_len(value: u64) -> usize {
    ((64 - (value | 1).leading_zeros() as usize) + 6) / 7
}
