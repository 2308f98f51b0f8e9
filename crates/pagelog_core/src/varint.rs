//! Compressed unsigned integers.
//!
//! Values are split into 7-bit groups, least significant group first. Every
//! byte but the last has its high bit clear; the last byte has it set:
//!
//! ```text
//! 0      -> 80
//! 127    -> ff
//! 128    -> 00 81
//! 16384  -> 00 00 81
//! ```

use crate::error::{LogError, LogResult};

/// Largest number of bytes a compressed `u64` can occupy.
pub const MAX_COMPRESSED_SIZE: usize = 10;

/// Returns the encoded size of `value`, in bytes.
#[must_use]
pub const fn compressed_size(value: u64) -> usize {
    if value < 128 {
        return 1;
    }
    if value < 16384 {
        return 2;
    }
    let mut size = 3;
    let mut rest = value >> 21;
    while rest > 0 {
        size += 1;
        rest >>= 7;
    }
    size
}

/// Appends the compressed form of `value` to `out`.
pub fn put_compressed(out: &mut Vec<u8>, mut value: u64) {
    loop {
        let group = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(group | 0x80);
            return;
        }
        out.push(group);
    }
}

/// Returns the compressed form of `value`.
#[must_use]
pub fn encode_compressed(value: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(compressed_size(value));
    put_compressed(&mut out, value);
    out
}

/// Decodes a compressed value from a byte source.
///
/// `next` is called once per byte until the terminal byte is seen.
///
/// # Errors
///
/// Returns [`LogError::DataCorruption`] when the encoding is longer than any
/// `u64` could need, and propagates errors from `next`.
pub fn read_compressed(mut next: impl FnMut() -> LogResult<u8>) -> LogResult<u64> {
    let mut value = 0u64;
    for index in 0..MAX_COMPRESSED_SIZE {
        let byte = next()?;
        let group = u64::from(byte & 0x7f);
        let shift = 7 * index as u32;
        if shift == 63 && group > 1 {
            return Err(LogError::corruption("compressed value overflows u64"));
        }
        value |= group << shift;
        if byte & 0x80 != 0 {
            return Ok(value);
        }
    }
    Err(LogError::corruption("compressed value is not terminated"))
}

/// Decodes a compressed value from the front of `bytes`.
///
/// Returns the value and the number of bytes consumed, or `None` when
/// `bytes` ends before the terminal byte or the value is malformed.
#[must_use]
pub fn decode_compressed(bytes: &[u8]) -> Option<(u64, usize)> {
    let mut consumed = 0;
    let value = read_compressed(|| {
        let byte = bytes
            .get(consumed)
            .copied()
            .ok_or_else(|| LogError::corruption("truncated compressed value"))?;
        consumed += 1;
        Ok(byte)
    })
    .ok()?;
    Some((value, consumed))
}
