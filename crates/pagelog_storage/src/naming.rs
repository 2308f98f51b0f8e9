//! Block file naming.
//!
//! Every block file is named after the log address of its first byte,
//! encoded in base 32 with a fixed width:
//!
//! ```text
//! 00000000000.xd   # address 0
//! 00000000400.xd   # address 4096 (0x1000)
//! ```
//!
//! Names are invertible, so the directory listing alone is enough to
//! rebuild the block set.

use crate::error::{StorageError, StorageResult};

/// Extension of every block file.
pub const BLOCK_FILE_EXTENSION: &str = ".xd";

/// Number of base-32 digits in a block file name.
pub const BLOCK_FILE_NAME_LENGTH: usize = 11;

/// Digits used by the base-32 encoding, in value order.
const ALPHABET: &[u8; 32] = b"0123456789abcdefghijklmnopqrstuv";

/// Largest address that still fits in [`BLOCK_FILE_NAME_LENGTH`] digits.
pub const MAX_NAMED_ADDRESS: u64 = (1 << (5 * BLOCK_FILE_NAME_LENGTH)) - 1;

/// Returns the file name for the block starting at `address`.
///
/// # Errors
///
/// Returns [`StorageError::InvalidFileName`] if the address is larger than
/// [`MAX_NAMED_ADDRESS`].
pub fn block_file_name(address: u64) -> StorageResult<String> {
    if address > MAX_NAMED_ADDRESS {
        return Err(StorageError::InvalidFileName(format!(
            "address {address} does not fit in {BLOCK_FILE_NAME_LENGTH} base-32 digits"
        )));
    }

    let mut digits = [b'0'; BLOCK_FILE_NAME_LENGTH];
    let mut rest = address;
    for digit in digits.iter_mut().rev() {
        *digit = ALPHABET[(rest & 0x1f) as usize];
        rest >>= 5;
    }

    let mut name = String::with_capacity(BLOCK_FILE_NAME_LENGTH + BLOCK_FILE_EXTENSION.len());
    name.extend(digits.iter().map(|&d| char::from(d)));
    name.push_str(BLOCK_FILE_EXTENSION);
    Ok(name)
}

/// Parses a block file name back into the block address.
///
/// Returns `None` for anything that is not a well-formed block file name.
#[must_use]
pub fn parse_block_file_name(name: &str) -> Option<u64> {
    let stem = name.strip_suffix(BLOCK_FILE_EXTENSION)?;
    if stem.len() != BLOCK_FILE_NAME_LENGTH {
        return None;
    }

    let mut address = 0u64;
    for byte in stem.bytes() {
        let value = match byte {
            b'0'..=b'9' => byte - b'0',
            b'a'..=b'v' => byte - b'a' + 10,
            _ => return None,
        };
        address = (address << 5) | u64::from(value);
    }
    Some(address)
}

/// Returns `true` if `name` is a well-formed block file name.
#[must_use]
pub fn is_block_file_name(name: &str) -> bool {
    parse_block_file_name(name).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn zero_address() {
        assert_eq!(block_file_name(0).unwrap(), "00000000000.xd");
    }

    #[test]
    fn known_addresses() {
        assert_eq!(block_file_name(4096).unwrap(), "00000000400.xd");
        assert_eq!(block_file_name(31).unwrap(), "0000000000v.xd");
        assert_eq!(block_file_name(32).unwrap(), "00000000010.xd");
        assert_eq!(
            block_file_name(MAX_NAMED_ADDRESS).unwrap(),
            "vvvvvvvvvvv.xd"
        );
    }

    #[test]
    fn address_too_large() {
        assert!(block_file_name(MAX_NAMED_ADDRESS + 1).is_err());
    }

    #[test]
    fn rejects_malformed_names() {
        assert_eq!(parse_block_file_name("0000000040.xd"), None);
        assert_eq!(parse_block_file_name("000000000400.xd"), None);
        assert_eq!(parse_block_file_name("00000000400.dat"), None);
        assert_eq!(parse_block_file_name("0000000040w.xd"), None);
        assert_eq!(parse_block_file_name("0000000040A.xd"), None);
        assert!(!is_block_file_name("LOCK"));
    }

    proptest! {
        #[test]
        fn name_is_invertible(address in 0..=MAX_NAMED_ADDRESS) {
            let name = block_file_name(address).unwrap();
            prop_assert_eq!(name.len(), BLOCK_FILE_NAME_LENGTH + BLOCK_FILE_EXTENSION.len());
            prop_assert_eq!(parse_block_file_name(&name), Some(address));
        }
    }
}
