//! Page sealing and verification.
//!
//! The writer hands out plaintext pages; on disk a complete page is the
//! encrypted usable region followed by the XXH3 hash of that ciphertext:
//!
//! ```text
//! | usable bytes (ciphertext) | xxh3_64 (8 bytes LE) |
//! ```
//!
//! Hash loggables embedded in partial pages use [`PagePipeline::record_digest`]
//! over the plaintext bytes preceding them.

use crate::crypto::PageCipher;
use crate::error::{LogError, LogResult};
use crate::geometry::LogGeometry;
use crate::loggable::{HASH_CODE_BYTE, HASH_RECORD_SIZE};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use xxhash_rust::xxh3::xxh3_64;

/// Hash stored in the trailer of a page.
#[must_use]
pub fn page_hash(bytes: &[u8]) -> u64 {
    xxh3_64(bytes)
}

/// Transforms pages between their plaintext and on-disk forms.
#[derive(Debug, Clone)]
pub(crate) struct PagePipeline {
    geometry: LogGeometry,
    cipher: Option<Arc<PageCipher>>,
}

impl PagePipeline {
    pub(crate) fn new(geometry: LogGeometry, cipher: Option<Arc<PageCipher>>) -> Self {
        Self { geometry, cipher }
    }

    pub(crate) fn geometry(&self) -> &LogGeometry {
        &self.geometry
    }

    pub(crate) fn has_cipher(&self) -> bool {
        self.cipher.is_some()
    }

    fn crypt(&self, address: u64, bytes: &mut [u8]) {
        if let Some(cipher) = &self.cipher {
            cipher.crypt(address, bytes);
        }
    }

    /// On-disk image of a complete plaintext page.
    pub(crate) fn seal_page(&self, page_address: u64, plain: &[u8]) -> Vec<u8> {
        debug_assert_eq!(plain.len(), self.geometry.page_size());
        let usable = self.geometry.usable_page_size();
        let mut sealed = plain.to_vec();
        self.crypt(page_address, &mut sealed[..usable]);
        if self.geometry.has_checksums() {
            let hash = page_hash(&sealed[..usable]);
            sealed[usable..].copy_from_slice(&hash.to_le_bytes());
        }
        sealed
    }

    /// On-disk image of plaintext bytes starting at `address`.
    pub(crate) fn seal_range(&self, address: u64, plain: &[u8]) -> Vec<u8> {
        let mut sealed = plain.to_vec();
        self.crypt(address, &mut sealed);
        sealed
    }

    /// Turns `len` bytes read from disk into plaintext, in place.
    ///
    /// A complete page has its trailer verified first.
    pub(crate) fn open_page(&self, page_address: u64, raw: &mut [u8], len: usize) -> LogResult<()> {
        let usable = self.geometry.usable_page_size();
        if len == self.geometry.page_size() && self.geometry.has_checksums() {
            let mut stored = [0u8; 8];
            stored.copy_from_slice(&raw[usable..usable + 8]);
            let stored = u64::from_le_bytes(stored);
            let computed = page_hash(&raw[..usable]);
            if stored != computed {
                return Err(LogError::corruption(format!(
                    "page {page_address} hash mismatch: stored {stored:016x}, computed {computed:016x}"
                )));
            }
        }
        let plain_len = len.min(usable);
        self.crypt(page_address, &mut raw[..plain_len]);
        Ok(())
    }

    /// Digest stored in a hash loggable.
    ///
    /// Encrypted logs use the first 8 bytes of SHA-256 instead of XXH3.
    pub(crate) fn record_digest(&self, bytes: &[u8]) -> u64 {
        if self.has_cipher() {
            let digest = Sha256::digest(bytes);
            let mut head = [0u8; 8];
            head.copy_from_slice(&digest[..8]);
            u64::from_le_bytes(head)
        } else {
            xxh3_64(bytes)
        }
    }

    /// Encoded hash loggable for a page whose first bytes are `preceding`.
    pub(crate) fn hash_record(&self, preceding: &[u8]) -> [u8; HASH_RECORD_SIZE] {
        let mut record = [0u8; HASH_RECORD_SIZE];
        record[0] = HASH_CODE_BYTE;
        record[1..].copy_from_slice(&self.record_digest(preceding).to_le_bytes());
        record
    }

    /// Returns the end of the last valid hash loggable in a plaintext page
    /// prefix, scanning backwards.
    pub(crate) fn last_hash_record_end(&self, page: &[u8]) -> Option<usize> {
        if page.len() < HASH_RECORD_SIZE {
            return None;
        }
        (0..=page.len() - HASH_RECORD_SIZE).rev().find_map(|offset| {
            if page[offset] != HASH_CODE_BYTE {
                return None;
            }
            let mut stored = [0u8; 8];
            stored.copy_from_slice(&page[offset + 1..offset + HASH_RECORD_SIZE]);
            (u64::from_le_bytes(stored) == self.record_digest(&page[..offset]))
                .then_some(offset + HASH_RECORD_SIZE)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loggable::NULL_BYTE;

    fn pipeline() -> PagePipeline {
        PagePipeline::new(LogGeometry::new(1024, 4096, true).unwrap(), None)
    }

    #[test]
    fn sealed_page_verifies() {
        let p = pipeline();
        let plain = vec![0x42u8; 1024];
        let mut sealed = p.seal_page(0, &plain);
        p.open_page(0, &mut sealed, 1024).unwrap();
        assert_eq!(&sealed[..1016], &plain[..1016]);
    }

    #[test]
    fn flipped_bit_is_detected() {
        let p = pipeline();
        let mut sealed = p.seal_page(0, &vec![1u8; 1024]);
        sealed[100] ^= 0x04;
        assert!(p.open_page(0, &mut sealed, 1024).unwrap_err().is_corruption());
    }

    #[test]
    fn flipped_trailer_is_detected() {
        let p = pipeline();
        let mut sealed = p.seal_page(0, &vec![1u8; 1024]);
        sealed[1020] ^= 0x01;
        assert!(p.open_page(0, &mut sealed, 1024).is_err());
    }

    #[test]
    fn partial_pages_are_not_verified() {
        let p = pipeline();
        let mut raw = vec![9u8; 100];
        p.open_page(0, &mut raw, 100).unwrap();
        assert_eq!(raw, vec![9u8; 100]);
    }

    #[test]
    fn legacy_pages_have_no_trailer() {
        let p = PagePipeline::new(LogGeometry::new(1024, 4096, false).unwrap(), None);
        let plain = vec![5u8; 1024];
        let mut sealed = p.seal_page(0, &plain);
        assert_eq!(sealed, plain);
        p.open_page(0, &mut sealed, 1024).unwrap();
    }

    #[test]
    fn finds_latest_hash_record() {
        let p = pipeline();
        let mut page = vec![0x81, 0x80, 0x81, 0x07];
        let first = p.hash_record(&page);
        page.extend_from_slice(&first);
        page.extend_from_slice(&[0x81, 0x80, 0x80]);
        let second = p.hash_record(&page);
        page.extend_from_slice(&second);
        let valid = page.len();
        page.extend_from_slice(&[0x82, 0x80, 0x85, 1, 2]);

        assert_eq!(p.last_hash_record_end(&page), Some(valid));
        assert_eq!(p.last_hash_record_end(&page[..valid - 1]), Some(13));
    }

    #[test]
    fn no_hash_record() {
        let p = pipeline();
        assert_eq!(p.last_hash_record_end(&[NULL_BYTE; 50]), None);
        assert_eq!(p.last_hash_record_end(&[0xff; 4]), None);
    }

    #[cfg(feature = "encryption")]
    #[test]
    fn encrypted_page_hash_covers_ciphertext() {
        use crate::crypto::CipherKey;

        let geometry = LogGeometry::new(1024, 4096, true).unwrap();
        let cipher = Arc::new(PageCipher::new(&CipherKey::generate(), 3));
        let p = PagePipeline::new(geometry, Some(cipher));

        let plain = vec![0u8; 1024];
        let sealed = p.seal_page(2048, &plain);
        assert_ne!(&sealed[..1016], &plain[..1016]);
        assert_eq!(
            &sealed[1016..],
            &page_hash(&sealed[..1016]).to_le_bytes()
        );

        let mut opened = sealed.clone();
        p.open_page(2048, &mut opened, 1024).unwrap();
        assert_eq!(&opened[..1016], &plain[..1016]);
    }

    #[cfg(feature = "encryption")]
    #[test]
    fn encrypted_logs_use_sha256_digest() {
        use crate::crypto::CipherKey;

        let geometry = LogGeometry::new(1024, 4096, true).unwrap();
        let cipher = Arc::new(PageCipher::new(&CipherKey::generate(), 3));
        let p = PagePipeline::new(geometry, Some(cipher));
        assert_ne!(p.record_digest(b"abc"), pipeline().record_digest(b"abc"));
    }
}
