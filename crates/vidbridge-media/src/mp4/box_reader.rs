//! Big-endian primitives over a byte stream.
//!
//! Everything else in the crate reads the container through these two
//! functions, so a short read always surfaces as [`Error::EndOfStream`].

use crate::{Error, Result};
use std::io::{self, Read};

/// Read `byte_count` bytes as a big-endian unsigned integer.
///
/// An 8-byte value with the top bit set is rejected with
/// [`Error::IntegerOverflow`] instead of being returned as a wrapped value.
pub fn read_unsigned_int<R: Read + ?Sized>(source: &mut R, byte_count: usize) -> Result<u64> {
    if byte_count == 0 || byte_count > 8 {
        return Err(Error::unexpected(format!(
            "cannot read a {byte_count}-byte unsigned integer"
        )));
    }

    let mut buf = [0u8; 8];
    source.read_exact(&mut buf[..byte_count])?;

    if byte_count == 8 && buf[0] & 0x80 != 0 {
        return Err(Error::IntegerOverflow { byte_count });
    }

    Ok(buf[..byte_count]
        .iter()
        .fold(0u64, |acc, &b| (acc << 8) | u64::from(b)))
}

/// Read and drop exactly `n` bytes.
pub fn discard<R: Read + ?Sized>(source: &mut R, n: u64) -> Result<()> {
    let copied = io::copy(&mut (&mut *source).take(n), &mut io::sink())?;
    if copied < n {
        return Err(Error::EndOfStream);
    }
    Ok(())
}

/// Read a single byte.
pub fn read_u8<R: Read + ?Sized>(source: &mut R) -> Result<u8> {
    read_unsigned_int(source, 1).map(|v| v as u8)
}

/// Read a big-endian 16-bit value.
pub fn read_u16<R: Read + ?Sized>(source: &mut R) -> Result<u16> {
    read_unsigned_int(source, 2).map(|v| v as u16)
}

/// Read a big-endian 32-bit value.
pub fn read_u32<R: Read + ?Sized>(source: &mut R) -> Result<u32> {
    read_unsigned_int(source, 4).map(|v| v as u32)
}

/// Read a big-endian 64-bit value (top bit must be clear).
pub fn read_u64<R: Read + ?Sized>(source: &mut R) -> Result<u64> {
    read_unsigned_int(source, 8)
}

/// Read exactly `len` bytes into a fresh buffer.
pub fn read_bytes<R: Read + ?Sized>(source: &mut R, len: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    source.read_exact(&mut buf)?;
    Ok(buf)
}
