use std::cmp;
use std::io::{self, Read};

/// Read until `buf` is full or the source is exhausted.
///
/// Returns `(eof, bytes_read)`. A partial fill always means EoF was hit.
pub fn fill_buf<R: Read>(data: &mut R, buf: &mut [u8]) -> io::Result<(bool, usize)> {
    let mut buf_read = 0;

    while buf_read < buf.len() {
        match data.read(&mut buf[buf_read..]) {
            Ok(0) => return Ok((true, buf_read)),
            Ok(x) => buf_read += x,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
    }
    Ok((false, buf_read))
}

/// Move as much of `in_buf` as fits into `buf`, draining what was copied.
pub fn flush_buf(in_buf: &mut Vec<u8>, buf: &mut [u8]) -> usize {
    let split_at = cmp::min(in_buf.len(), buf.len());
    buf[..split_at].clone_from_slice(&in_buf[..split_at]);
    in_buf.drain(..split_at);

    split_at
}

/// Discard everything left in `data`, returning how many bytes went by.
pub fn drain<R: Read>(data: &mut R) -> io::Result<u64> {
    io::copy(data, &mut io::sink())
}

/// Mirrors every byte read from the inner source into a buffer.
pub struct TeeReader<'a, R: Read> {
    inner: &'a mut R,
    mirror: &'a mut Vec<u8>,
}

impl<'a, R: Read> TeeReader<'a, R> {
    pub fn new(inner: &'a mut R, mirror: &'a mut Vec<u8>) -> TeeReader<'a, R> {
        TeeReader { inner, mirror }
    }
}

impl<R: Read> Read for TeeReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.mirror.extend_from_slice(&buf[..n]);
        Ok(n)
    }
}


#[cfg(test)]
mod test_flush_buf {
    use super::*;

    #[test]
    fn zero_buf() {
        let mut in_buf: Vec<u8> = vec![1, 2];
        let mut buf: [u8; 0] = [0; 0];

        assert_eq!(flush_buf(&mut in_buf, &mut buf), 0);
        assert_eq!(&in_buf[..], &[1, 2]);
    }

    #[test]
    fn big_buf_small_vec() {
        let mut in_buf: Vec<u8> = vec![1, 2];
        let mut buf: [u8; 4] = [0; 4];

        assert_eq!(flush_buf(&mut in_buf, &mut buf), 2);
        assert_eq!(&buf, &[1, 2, 0, 0]);
        assert_eq!(&in_buf[..], &[]);
    }

    #[test]
    fn small_buf_big_vec() {
        let mut in_buf: Vec<u8> = vec![1, 2, 3, 4];
        let mut buf: [u8; 2] = [0; 2];

        assert_eq!(flush_buf(&mut in_buf, &mut buf), 2);
        assert_eq!(&buf, &[1, 2]);
        assert_eq!(&in_buf[..], &[3, 4]);
    }
}

#[cfg(test)]
mod test_tee_reader {
    use super::*;
    use std::io::{Cursor, Read};

    #[test]
    fn mirrors_everything_read() {
        let mut source = Cursor::new(vec![1, 2, 3, 4, 5, 6]);
        let mut mirror = Vec::new();

        let mut tee = TeeReader::new(&mut source, &mut mirror);
        let mut buf: [u8; 4] = [0; 4];
        tee.read_exact(&mut buf).unwrap();

        assert_eq!(&buf, &[1, 2, 3, 4]);
        assert_eq!(&mirror[..], &[1, 2, 3, 4]);
    }

    #[test]
    fn unread_tail_is_not_mirrored() {
        let mut source = Cursor::new(vec![1, 2, 3, 4]);
        let mut mirror = Vec::new();

        let mut tee = TeeReader::new(&mut source, &mut mirror);
        let mut buf: [u8; 2] = [0; 2];
        tee.read_exact(&mut buf).unwrap();
        drop(tee);

        assert_eq!(&mirror[..], &[1, 2]);
        assert_eq!(drain(&mut source).unwrap(), 2);
    }
}
