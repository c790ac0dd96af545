//! Connection handshake on the shared local socket.
//!
//! Before any media bytes the client writes two newline-terminated ASCII
//! decimal keys: the session key, then the per-connection key.

use std::io::{self, Read, Write};
use vidbridge_media::{Error, Result};

/// Longest key accepted (a `u64` in decimal).
pub const MAX_KEY_LEN: usize = 20;

/// Generate a fresh random decimal key.
pub fn new_key() -> String {
    rand::random::<u64>().to_string()
}

/// Write the handshake.
pub fn write_keys<W: Write>(writer: &mut W, session_key: &str, connection_key: &str) -> io::Result<()> {
    writer.write_all(format!("{session_key}\n{connection_key}\n").as_bytes())?;
    writer.flush()
}

/// Read one key line.
///
/// Reads a byte at a time so nothing past the newline is consumed; the
/// media stream starts right after it.
pub fn read_key<R: Read + ?Sized>(reader: &mut R) -> Result<String> {
    let mut key = String::with_capacity(MAX_KEY_LEN);
    let mut byte = [0u8; 1];

    loop {
        reader.read_exact(&mut byte)?;
        match byte[0] {
            b'\n' => break,
            b @ b'0'..=b'9' if key.len() < MAX_KEY_LEN => key.push(b as char),
            b'0'..=b'9' => return Err(Error::unexpected("handshake key too long")),
            other => {
                return Err(Error::unexpected(format!(
                    "non-decimal byte 0x{other:02x} in handshake key"
                )))
            }
        }
    }

    if key.is_empty() {
        return Err(Error::unexpected("empty handshake key"));
    }
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_round_trip_leaves_media_untouched() {
        let mut wire = Vec::new();
        write_keys(&mut wire, "1234", "987654321").unwrap();
        wire.extend_from_slice(b"\x00\x00\x00\x18ftyp");

        let mut src = Cursor::new(wire);
        assert_eq!(read_key(&mut src).unwrap(), "1234");
        assert_eq!(read_key(&mut src).unwrap(), "987654321");
        let mut rest = Vec::new();
        src.read_to_end(&mut rest).unwrap();
        assert_eq!(&rest, b"\x00\x00\x00\x18ftyp");
    }

    #[test]
    fn test_new_key_is_decimal() {
        let key = new_key();
        assert!(!key.is_empty());
        assert!(key.len() <= MAX_KEY_LEN);
        assert!(key.bytes().all(|b| b.is_ascii_digit()));
    }

    #[test]
    fn test_rejects_non_decimal() {
        let mut src = Cursor::new(b"12a4\n".to_vec());
        assert!(matches!(read_key(&mut src), Err(Error::Unexpected(_))));
    }

    #[test]
    fn test_rejects_empty_and_long_keys() {
        let mut src = Cursor::new(b"\n".to_vec());
        assert!(matches!(read_key(&mut src), Err(Error::Unexpected(_))));

        let long = format!("{}\n", "9".repeat(MAX_KEY_LEN + 1));
        let mut src = Cursor::new(long.into_bytes());
        assert!(matches!(read_key(&mut src), Err(Error::Unexpected(_))));
    }

    #[test]
    fn test_eof_mid_key() {
        let mut src = Cursor::new(b"123".to_vec());
        assert!(read_key(&mut src).unwrap_err().is_end_of_stream());
    }
}
