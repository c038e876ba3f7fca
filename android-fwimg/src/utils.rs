use bytemuck::{Pod, bytes_of, bytes_of_mut};
use std::cmp::min;
use std::fmt::{Debug, Display, LowerHex};
use std::io;
use std::io::{Read, Write};

pub trait ReadExt {
    fn skip(&mut self, len: u64) -> io::Result<()>;
    fn read_pod<F: Pod>(&mut self, data: &mut F) -> io::Result<()>;
    /// Reads until `buf` is full or EOF, returning how many bytes were read.
    fn read_full(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

impl<T: Read> ReadExt for T {
    fn skip(&mut self, len: u64) -> io::Result<()> {
        let skipped = io::copy(&mut self.by_ref().take(len), &mut io::sink())?;
        if skipped != len {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        Ok(())
    }

    fn read_pod<F: Pod>(&mut self, data: &mut F) -> io::Result<()> {
        self.read_exact(bytes_of_mut(data))
    }

    fn read_full(&mut self, mut buf: &mut [u8]) -> io::Result<usize> {
        let mut total = 0;
        while !buf.is_empty() {
            match self.read(buf) {
                Ok(0) => break,
                Ok(n) => {
                    total += n;
                    buf = &mut buf[n..];
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(total)
    }
}

pub trait WriteExt {
    fn write_zeros(&mut self, len: u64) -> io::Result<u64>;
    fn write_pod<F: Pod>(&mut self, data: &F) -> io::Result<()>;
    /// Writes `pattern` repeatedly until `len` bytes have been written.
    fn write_pattern(&mut self, pattern: [u8; 4], len: u64) -> io::Result<()>;
}

impl<T: Write> WriteExt for T {
    fn write_zeros(&mut self, mut len: u64) -> io::Result<u64> {
        let buf = [0_u8; 4096];
        let orig_len = len;
        while len > 0 {
            let l = min(buf.len() as u64, len) as usize;
            self.write_all(&buf[..l])?;
            len -= l as u64;
        }
        Ok(orig_len)
    }

    fn write_pod<F: Pod>(&mut self, data: &F) -> io::Result<()> {
        self.write_all(bytes_of(data))
    }

    fn write_pattern(&mut self, pattern: [u8; 4], mut len: u64) -> io::Result<()> {
        let buf = pattern.repeat(1024);
        while len > 0 {
            let l = min(buf.len() as u64, len) as usize;
            self.write_all(&buf[..l])?;
            len -= l as u64;
        }
        Ok(())
    }
}

/// Copies exactly `len` bytes, returning how many were copied before the
/// source ran dry.
pub fn copy_exact<R: Read, W: Write + ?Sized>(
    reader: &mut R,
    writer: &mut W,
    len: u64,
) -> io::Result<u64> {
    let mut buf = vec![0_u8; min(len, crate::constants::COPY_CHUNK_SIZE as u64) as usize];
    let mut remaining = len;
    while remaining > 0 {
        let l = min(buf.len() as u64, remaining) as usize;
        let n = reader.read_full(&mut buf[..l])?;
        if n == 0 {
            break;
        }
        writer.write_all(&buf[..n])?;
        remaining -= n as u64;
        if n < l {
            break;
        }
    }
    Ok(len - remaining)
}

pub fn align_to<N: num_traits::PrimInt + Display + Debug + LowerHex>(num: N, alignment: N) -> N {
    let one = N::one();
    assert_eq!(
        alignment & (alignment - one),
        N::zero(),
        "invalid alignment 0x{:x}",
        alignment
    );
    (num + alignment - one) & !(alignment - one)
}

pub fn is_valid_alignment<N: num_traits::PrimInt>(alignment: N) -> bool {
    alignment > N::zero() && alignment & (alignment - N::one()) == N::zero()
}

pub trait SliceExt {
    fn u16_at(&self, offset: usize) -> Option<u16>;
    fn u32_at(&self, offset: usize) -> Option<u32>;
    fn u64_at(&self, offset: usize) -> Option<u64>;
}

impl SliceExt for [u8] {
    fn u16_at(&self, offset: usize) -> Option<u16> {
        self.get(offset..offset + 2)
            .and_then(|data| data.try_into().ok())
            .map(u16::from_le_bytes)
    }

    fn u32_at(&self, offset: usize) -> Option<u32> {
        self.get(offset..offset + 4)
            .and_then(|data| data.try_into().ok())
            .map(u32::from_le_bytes)
    }

    fn u64_at(&self, offset: usize) -> Option<u64> {
        self.get(offset..offset + 8)
            .and_then(|data| data.try_into().ok())
            .map(u64::from_le_bytes)
    }
}

/// Cuts a fixed-width field at its first NUL.
pub fn trim_end(data: &[u8]) -> &[u8] {
    &data[..data.iter().position(|&b| b == 0).unwrap_or(data.len())]
}

pub fn fixed_name(data: &[u8]) -> String {
    String::from_utf8_lossy(trim_end(data)).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn align_rounds_up_to_next_multiple() {
        assert_eq!(align_to(0_u64, 4096), 0);
        assert_eq!(align_to(1_u64, 4096), 4096);
        assert_eq!(align_to(4096_u32, 4096), 4096);
        assert_eq!(align_to(4097_usize, 4096), 8192);
    }

    #[test]
    fn alignment_must_be_power_of_two() {
        assert!(is_valid_alignment(4096_u32));
        assert!(!is_valid_alignment(0_u32));
        assert!(!is_valid_alignment(3000_u32));
    }

    #[test]
    fn trim_end_stops_at_first_nul() {
        assert_eq!(trim_end(b"system\0\0\0"), b"system");
        assert_eq!(trim_end(b"\0\0"), b"");
        assert_eq!(fixed_name(b"vendor_a\0junk"), "vendor_a");
    }

    #[test]
    fn copy_exact_reports_short_source() {
        let mut src = Cursor::new(vec![7_u8; 10]);
        let mut dst = Vec::new();
        assert_eq!(copy_exact(&mut src, &mut dst, 16).unwrap(), 10);
        assert_eq!(dst, vec![7_u8; 10]);
    }

    #[test]
    fn write_pattern_handles_partial_words() {
        let mut out = Vec::new();
        out.write_pattern([1, 2, 3, 4], 6).unwrap();
        assert_eq!(out, [1, 2, 3, 4, 1, 2]);
    }
}
