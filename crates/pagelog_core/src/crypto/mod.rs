//! Page encryption for PageLog.
//!
//! Log bytes are encrypted with AES-256 used as a stream cipher keyed by the
//! log address of every byte. Hash trailers are computed over ciphertext, so
//! a log can be verified without the key. Encryption is optional and must be
//! enabled via the `encryption` feature.
//!
//! ## Usage
//!
//! ```ignore
//! use pagelog_core::crypto::{CipherKey, PageCipher};
//!
//! let cipher = PageCipher::new(&CipherKey::generate(), 0x5eed);
//! let mut bytes = *b"secret";
//! cipher.crypt(4096, &mut bytes);
//! cipher.crypt(4096, &mut bytes);
//! assert_eq!(&bytes, b"secret");
//! ```

#[cfg(feature = "encryption")]
mod cipher;

#[cfg(feature = "encryption")]
pub use cipher::*;

/// Module contents when encryption feature is disabled.
#[cfg(not(feature = "encryption"))]
mod stub {
    use crate::error::{LogError, LogResult};

    /// Cipher key (stub when encryption disabled).
    #[derive(Debug, Clone)]
    pub struct CipherKey {
        _private: (),
    }

    impl CipherKey {
        /// Always returns an error when encryption is disabled.
        pub fn generate() -> LogResult<Self> {
            Err(LogError::encryption_not_enabled())
        }

        /// Always returns an error when encryption is disabled.
        pub fn from_bytes(_bytes: &[u8]) -> LogResult<Self> {
            Err(LogError::encryption_not_enabled())
        }
    }

    /// Page cipher (stub when encryption disabled).
    #[derive(Debug)]
    pub struct PageCipher {
        _private: (),
    }

    impl PageCipher {
        /// A key cannot exist without the feature, so this is unreachable.
        pub fn new(key: &CipherKey, _basic_iv: u64) -> Self {
            let _ = key;
            Self { _private: () }
        }

        /// Leaves the data untouched.
        pub fn crypt(&self, _address: u64, _data: &mut [u8]) {}
    }
}

#[cfg(not(feature = "encryption"))]
pub use stub::*;

/// Cipher settings of a log.
#[derive(Debug, Clone)]
pub struct CipherConfig {
    /// Encryption key.
    pub key: CipherKey,
    /// Initialization vector mixed into every keystream block.
    pub basic_iv: u64,
}

impl CipherConfig {
    /// Creates cipher settings.
    #[must_use]
    pub fn new(key: CipherKey, basic_iv: u64) -> Self {
        Self { key, basic_iv }
    }
}
