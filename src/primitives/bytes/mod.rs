#![forbid(unsafe_code)]
//! Big-endian, varint and cursor utilities shared by the page and node codecs.

pub mod be {
    //! Big-endian appenders for fixed-width integers.

    /// Appends a `u32` in big-endian byte order.
    pub fn put_u32(dst: &mut Vec<u8>, v: u32) {
        dst.extend_from_slice(&v.to_be_bytes());
    }

    /// Appends an `i32` in big-endian byte order.
    pub fn put_i32(dst: &mut Vec<u8>, v: i32) {
        dst.extend_from_slice(&v.to_be_bytes());
    }

    /// Appends a `u64` in big-endian byte order.
    pub fn put_u64(dst: &mut Vec<u8>, v: u64) {
        dst.extend_from_slice(&v.to_be_bytes());
    }

    /// Appends an `i64` in big-endian byte order.
    pub fn put_i64(dst: &mut Vec<u8>, v: i64) {
        dst.extend_from_slice(&v.to_be_bytes());
    }

    /// Appends a `u32` length prefix followed by the raw bytes.
    pub fn put_bytes(dst: &mut Vec<u8>, bytes: &[u8]) {
        put_u32(dst, bytes.len() as u32);
        dst.extend_from_slice(bytes);
    }
}

pub mod var {
    //! Unsigned varints and ZigZag signed integers.

    use crate::types::{Result, VersoError};

    /// Encodes a u64 as an unsigned varint.
    pub fn encode_u64(mut v: u64, out: &mut Vec<u8>) {
        loop {
            let byte = (v & 0x7f) as u8;
            v >>= 7;
            if v == 0 {
                out.push(byte);
                break;
            }
            out.push(byte | 0x80);
        }
    }

    /// Decodes a u64 varint from a slice, updating the offset.
    pub fn decode_u64(src: &[u8], off: &mut usize) -> Result<u64> {
        let mut result = 0u64;
        for i in 0..10u32 {
            let byte = *src
                .get(*off)
                .ok_or_else(|| VersoError::corrupt("varint truncated"))?;
            *off += 1;
            let payload = (byte & 0x7f) as u64;
            if i == 9 && payload > 1 {
                return Err(VersoError::corrupt("varint overflows 64 bits"));
            }
            result |= payload << (7 * i);
            if byte & 0x80 == 0 {
                return Ok(result);
            }
        }
        Err(VersoError::corrupt("varint longer than 10 bytes"))
    }

    /// Encodes an i64 as a ZigZag-encoded varint.
    pub fn encode_i64(v: i64, out: &mut Vec<u8>) {
        encode_u64(((v << 1) ^ (v >> 63)) as u64, out);
    }

    /// Decodes a ZigZag-encoded i64 varint from a slice, updating the offset.
    pub fn decode_i64(src: &[u8], off: &mut usize) -> Result<i64> {
        let zigzag = decode_u64(src, off)?;
        Ok(((zigzag >> 1) as i64) ^ (-((zigzag & 1) as i64)))
    }
}

pub mod buf {
    //! A slice-backed cursor whose reads fail with `Corruption` instead of panicking.

    use core::fmt;

    use super::var;
    use crate::types::{Result, VersoError};

    /// A cursor for reading bytes from a slice with offset tracking.
    pub struct Cursor<'a> {
        /// The underlying byte slice.
        pub buf: &'a [u8],
        /// Current read offset.
        pub off: usize,
    }

    impl<'a> Cursor<'a> {
        /// Creates a new cursor starting at offset 0.
        pub fn new(buf: &'a [u8]) -> Self {
            Self { buf, off: 0 }
        }

        /// Takes the next `n` bytes from the cursor, advancing the offset.
        pub fn take(&mut self, n: usize) -> Result<&'a [u8]> {
            let end = self
                .off
                .checked_add(n)
                .filter(|end| *end <= self.buf.len())
                .ok_or_else(|| {
                    VersoError::corrupt(format!(
                        "record truncated: need {n} bytes, {} remaining",
                        self.remaining()
                    ))
                })?;
            let slice = &self.buf[self.off..end];
            self.off = end;
            Ok(slice)
        }

        fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
            let mut out = [0u8; N];
            out.copy_from_slice(self.take(N)?);
            Ok(out)
        }

        /// Reads one byte.
        pub fn read_u8(&mut self) -> Result<u8> {
            Ok(self.array::<1>()?[0])
        }

        /// Reads a big-endian `u32`.
        pub fn read_u32(&mut self) -> Result<u32> {
            Ok(u32::from_be_bytes(self.array()?))
        }

        /// Reads a big-endian `i32`.
        pub fn read_i32(&mut self) -> Result<i32> {
            Ok(i32::from_be_bytes(self.array()?))
        }

        /// Reads a big-endian `u64`.
        pub fn read_u64(&mut self) -> Result<u64> {
            Ok(u64::from_be_bytes(self.array()?))
        }

        /// Reads a big-endian `i64`.
        pub fn read_i64(&mut self) -> Result<i64> {
            Ok(i64::from_be_bytes(self.array()?))
        }

        /// Reads an unsigned varint.
        pub fn read_var_u64(&mut self) -> Result<u64> {
            var::decode_u64(self.buf, &mut self.off)
        }

        /// Reads a ZigZag varint.
        pub fn read_var_i64(&mut self) -> Result<i64> {
            var::decode_i64(self.buf, &mut self.off)
        }

        /// Reads a `u32` length prefix and the bytes it announces.
        pub fn read_bytes(&mut self) -> Result<&'a [u8]> {
            let len = self.read_u32()? as usize;
            self.take(len)
        }

        /// Returns the number of bytes remaining in the buffer.
        pub fn remaining(&self) -> usize {
            self.buf.len().saturating_sub(self.off)
        }

        /// Fails unless every byte has been consumed.
        pub fn finish(&self) -> Result<()> {
            if self.remaining() == 0 {
                Ok(())
            } else {
                Err(VersoError::corrupt(format!(
                    "{} trailing bytes after record",
                    self.remaining()
                )))
            }
        }
    }

    impl<'a> fmt::Debug for Cursor<'a> {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("Cursor")
                .field("off", &self.off)
                .field("remaining", &self.remaining())
                .finish()
        }
    }
}
