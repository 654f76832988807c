//! Byte-level encode/decode primitives: big-endian integers and fixed-width ASCII fields.

use crate::error::{EngineError, Result};

pub const CHARSET: &str = "US-ASCII";

pub fn encode_u16(value: u16) -> [u8; 2] {
    value.to_be_bytes()
}

pub fn encode_u32(value: u32) -> [u8; 4] {
    value.to_be_bytes()
}

pub fn decode_u16(buf: &[u8]) -> u16 {
    u16::from_be_bytes([buf[0], buf[1]])
}

pub fn decode_u32(buf: &[u8]) -> u32 {
    u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]])
}

/// Decodes a big-endian integer of at least 4 bytes as a signed 32-bit value.
pub fn decode_i32(buf: &[u8]) -> i32 {
    i32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]])
}

pub fn validate_charset(charset: &str) -> Result<()> {
    if charset.eq_ignore_ascii_case(CHARSET) {
        Ok(())
    } else {
        Err(EngineError::format_error(format!(
            "unsupported charset {charset:?}, only {CHARSET} is supported"
        )))
    }
}

/// Encodes `value` into a `length`-byte ASCII field, trimmed and right-padded with spaces.
pub fn encode_ascii_field(value: &str, length: usize) -> Result<Vec<u8>> {
    if !value.is_ascii() {
        return Err(EngineError::format_error(format!("{value:?} is not valid {CHARSET}")));
    }
    let trimmed = value.trim();
    if trimmed.len() > length {
        return Err(EngineError::format_error(format!(
            "{trimmed:?} ({} bytes) does not fit in a {length}-byte field",
            trimmed.len()
        )));
    }
    let mut buf = vec![b' '; length];
    buf[..trimmed.len()].copy_from_slice(trimmed.as_bytes());
    Ok(buf)
}

/// Decodes a `length`-byte ASCII field starting at `offset`. Stops at the first NUL byte, if
/// any, then right-trims whitespace. Leading whitespace is preserved.
pub fn decode_ascii_field(buf: &[u8], offset: usize, length: usize) -> Result<String> {
    let window = buf
        .get(offset..offset + length)
        .ok_or_else(|| EngineError::format_error("field window is out of bounds"))?;
    let end = window.iter().position(|&b| b == 0).unwrap_or(length);
    let text = std::str::from_utf8(&window[..end])
        .map_err(|_| EngineError::format_error(format!("field at offset {offset} is not valid {CHARSET}")))?;
    Ok(text.trim_end().to_string())
}
