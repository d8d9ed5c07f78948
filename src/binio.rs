//! Byte-range read/write primitives for the disc image.
//!
//! Every field access in the engine goes through these helpers: fixed-width
//! big-endian integers at absolute offsets, bounded null-terminated byte
//! strings, and zero-padded integer writes. Reads past end-of-file return
//! fewer bytes than requested; callers interpret the short result as
//! truncation. Writes never truncate the destination, they only extend it as
//! far as the seek requires.

use std::io::{self, Read, Seek, SeekFrom, Write};

/// Chunk size used while scanning for a terminator byte.
const SCAN_CHUNK: usize = 0x20;

/// Reads up to `size` bytes starting at `start`. A short result means the
/// range ran past end-of-file.
pub fn read_bytes<F: Read + Seek>(f: &mut F, start: u64, size: usize) -> io::Result<Vec<u8>> {
    f.seek(SeekFrom::Start(start))?;
    let mut buf = vec![0u8; size];
    let mut filled = 0;
    while filled < size {
        let n = f.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    buf.truncate(filled);
    Ok(buf)
}

/// Reads bytes starting at `start` until a NUL terminator, up to `max`
/// bytes. The terminator is not included in the result. If no terminator is
/// found within `max` bytes, the result has length `max`; end-of-file also
/// ends the scan.
pub fn read_until_nul<F: Read + Seek>(f: &mut F, start: u64, max: usize) -> io::Result<Vec<u8>> {
    f.seek(SeekFrom::Start(start))?;
    let mut out = Vec::new();
    let mut left = max;
    while left > 0 {
        let want = SCAN_CHUNK.min(left);
        let mut chunk = vec![0u8; want];
        let n = f.read(&mut chunk)?;
        chunk.truncate(n);
        match chunk.iter().position(|&b| b == 0) {
            Some(pos) => {
                out.extend_from_slice(&chunk[..pos]);
                break;
            }
            None => {
                out.extend_from_slice(&chunk);
                if n < want {
                    // short read: EOF
                    break;
                }
                left -= n;
            }
        }
    }
    Ok(out)
}

/// Reads a single byte at `start`.
pub fn read_u8<F: Read + Seek>(f: &mut F, start: u64) -> io::Result<u8> {
    f.seek(SeekFrom::Start(start))?;
    let mut buf = [0u8; 1];
    f.read_exact(&mut buf)?;
    Ok(buf[0])
}

/// Reads a big-endian 24-bit integer at `start`.
pub fn read_u24<F: Read + Seek>(f: &mut F, start: u64) -> io::Result<u32> {
    f.seek(SeekFrom::Start(start))?;
    let mut buf = [0u8; 3];
    f.read_exact(&mut buf)?;
    Ok(u32::from_be_bytes([0, buf[0], buf[1], buf[2]]))
}

/// Reads a big-endian 32-bit integer at `start`.
pub fn read_u32<F: Read + Seek>(f: &mut F, start: u64) -> io::Result<u32> {
    f.seek(SeekFrom::Start(start))?;
    let mut buf = [0u8; 4];
    f.read_exact(&mut buf)?;
    Ok(u32::from_be_bytes(buf))
}

/// Writes raw bytes at `pos`.
pub fn write_bytes<F: Write + Seek>(f: &mut F, pos: u64, data: &[u8]) -> io::Result<()> {
    f.seek(SeekFrom::Start(pos))?;
    f.write_all(data)
}

/// Writes a byte at `pos`.
pub fn write_u8<F: Write + Seek>(f: &mut F, pos: u64, value: u8) -> io::Result<()> {
    write_bytes(f, pos, &[value])
}

/// Writes a big-endian 24-bit integer at `pos`.
pub fn write_u24<F: Write + Seek>(f: &mut F, pos: u64, value: u32) -> io::Result<()> {
    let b = value.to_be_bytes();
    write_bytes(f, pos, &b[1..4])
}

/// Writes a big-endian 32-bit integer at `pos`.
pub fn write_u32<F: Write + Seek>(f: &mut F, pos: u64, value: u32) -> io::Result<()> {
    write_bytes(f, pos, &value.to_be_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_read_bytes_exact() {
        let mut c = Cursor::new(vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(read_bytes(&mut c, 2, 3).unwrap(), vec![3, 4, 5]);
    }

    #[test]
    fn test_read_bytes_short_at_eof() {
        let mut c = Cursor::new(vec![1, 2, 3]);
        assert_eq!(read_bytes(&mut c, 1, 10).unwrap(), vec![2, 3]);
        assert_eq!(read_bytes(&mut c, 5, 4).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_read_until_nul() {
        let mut c = Cursor::new(b"abc\0def".to_vec());
        assert_eq!(read_until_nul(&mut c, 0, 0x200).unwrap(), b"abc".to_vec());
        assert_eq!(read_until_nul(&mut c, 4, 0x200).unwrap(), b"def".to_vec());
    }

    #[test]
    fn test_read_until_nul_spanning_chunks() {
        let mut data = vec![b'x'; SCAN_CHUNK * 3 + 5];
        data.push(0);
        data.push(b'y');
        let len = data.len();
        let mut c = Cursor::new(data);
        let got = read_until_nul(&mut c, 0, len).unwrap();
        assert_eq!(got.len(), SCAN_CHUNK * 3 + 5);
        assert!(got.iter().all(|&b| b == b'x'));
    }

    #[test]
    fn test_read_until_nul_hits_max() {
        let mut c = Cursor::new(vec![b'a'; 100]);
        assert_eq!(read_until_nul(&mut c, 0, 8).unwrap().len(), 8);
    }

    #[test]
    fn test_read_integers() {
        let mut c = Cursor::new(vec![0x00, 0xc2, 0x33, 0x9f, 0x3d, 0x07]);
        assert_eq!(read_u32(&mut c, 1).unwrap(), 0xc2339f3d);
        assert_eq!(read_u24(&mut c, 1).unwrap(), 0xc2339f);
        assert_eq!(read_u8(&mut c, 5).unwrap(), 0x07);
    }

    #[test]
    fn test_write_integers_roundtrip() {
        let mut c = Cursor::new(vec![0u8; 8]);
        write_u32(&mut c, 0, 0xdeadbeef).unwrap();
        write_u24(&mut c, 4, 0x0102_03).unwrap();
        write_u8(&mut c, 7, 0xff).unwrap();
        assert_eq!(read_u32(&mut c, 0).unwrap(), 0xdeadbeef);
        assert_eq!(read_u24(&mut c, 4).unwrap(), 0x010203);
        assert_eq!(read_u8(&mut c, 7).unwrap(), 0xff);
    }

    #[test]
    fn test_write_extends_but_never_truncates() {
        let mut c = Cursor::new(vec![9u8; 4]);
        write_bytes(&mut c, 6, &[1, 2]).unwrap();
        let inner = c.into_inner();
        assert_eq!(inner.len(), 8);
        assert_eq!(&inner[..4], &[9, 9, 9, 9]);
        assert_eq!(&inner[6..], &[1, 2]);
    }
}
