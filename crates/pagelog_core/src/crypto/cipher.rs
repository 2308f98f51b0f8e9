//! Position-keyed AES-256 stream cipher.

use crate::error::{LogError, LogResult};
use aes_gcm::aes::cipher::{BlockEncrypt, KeyInit};
use aes_gcm::aes::Aes256;
use aes_gcm::aead::generic_array::GenericArray;
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of the AES-256 key in bytes.
pub const KEY_SIZE: usize = 32;

const BLOCK_SIZE: u64 = 16;

/// Key for page encryption.
///
/// The key is automatically zeroized when dropped for security.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct CipherKey {
    bytes: [u8; KEY_SIZE],
}

impl CipherKey {
    /// Generates a new random key.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self { bytes }
    }

    /// Creates a key from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes slice is not exactly 32 bytes.
    pub fn from_bytes(bytes: &[u8]) -> LogResult<Self> {
        if bytes.len() != KEY_SIZE {
            return Err(LogError::invalid_key_size(bytes.len(), KEY_SIZE));
        }

        let mut key_bytes = [0u8; KEY_SIZE];
        key_bytes.copy_from_slice(bytes);
        Ok(Self { bytes: key_bytes })
    }

    /// Returns the key as a byte slice.
    ///
    /// # Security
    ///
    /// Be careful with this method - don't log or serialize the result.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl std::fmt::Debug for CipherKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CipherKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Encrypts log bytes as a function of their address.
///
/// The keystream block for address `a` is AES-256 over
/// `basic_iv (8 bytes LE) || a / 16 (8 bytes LE)`, so any byte range can be
/// encrypted or decrypted on its own and rewriting a range yields the same
/// ciphertext. Encryption and decryption are the same operation.
pub struct PageCipher {
    cipher: Aes256,
    basic_iv: u64,
}

impl PageCipher {
    /// Creates a cipher from a key and the per-log initialization vector.
    #[must_use]
    pub fn new(key: &CipherKey, basic_iv: u64) -> Self {
        let cipher = Aes256::new(GenericArray::from_slice(key.as_bytes()));
        Self { cipher, basic_iv }
    }

    /// XORs `data`, which starts at log address `address`, with the keystream.
    pub fn crypt(&self, address: u64, data: &mut [u8]) {
        let mut done = 0usize;
        while done < data.len() {
            let position = address + done as u64;
            let in_block = (position % BLOCK_SIZE) as usize;
            let keystream = self.keystream(position / BLOCK_SIZE);
            let n = (BLOCK_SIZE as usize - in_block).min(data.len() - done);
            for (byte, key) in data[done..done + n]
                .iter_mut()
                .zip(&keystream[in_block..in_block + n])
            {
                *byte ^= key;
            }
            done += n;
        }
    }

    fn keystream(&self, counter: u64) -> [u8; 16] {
        let mut block = [0u8; 16];
        block[..8].copy_from_slice(&self.basic_iv.to_le_bytes());
        block[8..].copy_from_slice(&counter.to_le_bytes());
        let mut block = GenericArray::from(block);
        self.cipher.encrypt_block(&mut block);
        block.into()
    }
}

impl std::fmt::Debug for PageCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageCipher").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_key() {
        let key1 = CipherKey::generate();
        let key2 = CipherKey::generate();
        assert_ne!(key1.as_bytes(), key2.as_bytes());
    }

    #[test]
    fn key_wrong_size() {
        assert!(matches!(
            CipherKey::from_bytes(&[0u8; 16]),
            Err(LogError::InvalidKeySize {
                expected: 32,
                actual: 16
            })
        ));
    }

    #[test]
    fn key_debug_is_redacted() {
        let key = CipherKey::from_bytes(&[7u8; KEY_SIZE]).unwrap();
        assert!(format!("{key:?}").contains("REDACTED"));
    }

    #[test]
    fn crypt_is_an_involution() {
        let cipher = PageCipher::new(&CipherKey::generate(), 42);
        let plain: Vec<u8> = (0..200u8).collect();
        let mut data = plain.clone();
        cipher.crypt(1000, &mut data);
        assert_ne!(data, plain);
        cipher.crypt(1000, &mut data);
        assert_eq!(data, plain);
    }

    #[test]
    fn ranges_encrypt_independently() {
        let cipher = PageCipher::new(&CipherKey::generate(), 7);
        let plain: Vec<u8> = (0..100u8).collect();

        let mut whole = plain.clone();
        cipher.crypt(5, &mut whole);

        let mut head = plain[..37].to_vec();
        let mut tail = plain[37..].to_vec();
        cipher.crypt(5, &mut head);
        cipher.crypt(5 + 37, &mut tail);
        head.extend_from_slice(&tail);

        assert_eq!(whole, head);
    }

    #[test]
    fn iv_changes_keystream() {
        let key = CipherKey::generate();
        let mut a = vec![0u8; 32];
        let mut b = vec![0u8; 32];
        PageCipher::new(&key, 1).crypt(0, &mut a);
        PageCipher::new(&key, 2).crypt(0, &mut b);
        assert_ne!(a, b);
    }
}
