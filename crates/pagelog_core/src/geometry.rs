//! Address arithmetic.
//!
//! The log is one address space split into files of `file_length_bound`
//! bytes and pages of `page_size` bytes. With checksums enabled, the last
//! [`HASH_TRAILER_SIZE`] bytes of every page hold the page hash and carry no
//! log data. Loggable addresses never point into a trailer.

use crate::error::{LogError, LogResult};

/// Size of the hash stored at the end of every complete page.
pub const HASH_TRAILER_SIZE: usize = 8;

/// Smallest supported page size.
pub const MIN_PAGE_SIZE: usize = 1024;

/// Largest supported page size.
pub const MAX_PAGE_SIZE: usize = 1 << 24;

/// Page and file layout of a log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogGeometry {
    page_size: usize,
    file_length_bound: u64,
    checksums: bool,
}

impl LogGeometry {
    /// Creates a geometry after validating its parameters.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::InvalidConfig`] if the page size is not a power
    /// of two within bounds, or the file length is not a positive multiple
    /// of the page size.
    pub fn new(page_size: usize, file_length_bound: u64, checksums: bool) -> LogResult<Self> {
        if !page_size.is_power_of_two() || !(MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(&page_size) {
            return Err(LogError::invalid_config(format!(
                "page size {page_size} must be a power of two between {MIN_PAGE_SIZE} and {MAX_PAGE_SIZE}"
            )));
        }
        if file_length_bound == 0 || file_length_bound % page_size as u64 != 0 {
            return Err(LogError::invalid_config(format!(
                "file length {file_length_bound} must be a positive multiple of the page size {page_size}"
            )));
        }
        Ok(Self {
            page_size,
            file_length_bound,
            checksums,
        })
    }

    /// Page size in bytes, trailer included.
    #[must_use]
    pub const fn page_size(&self) -> usize {
        self.page_size
    }

    /// File length in bytes.
    #[must_use]
    pub const fn file_length_bound(&self) -> u64 {
        self.file_length_bound
    }

    /// Whether pages carry hash trailers.
    #[must_use]
    pub const fn has_checksums(&self) -> bool {
        self.checksums
    }

    /// Bytes of a page available to log data.
    #[must_use]
    pub const fn usable_page_size(&self) -> usize {
        if self.checksums {
            self.page_size - HASH_TRAILER_SIZE
        } else {
            self.page_size
        }
    }

    /// Number of pages in one file.
    #[must_use]
    pub const fn pages_per_file(&self) -> u64 {
        self.file_length_bound / self.page_size as u64
    }

    /// Bytes of an empty file available to log data.
    #[must_use]
    pub const fn usable_file_size(&self) -> u64 {
        self.pages_per_file() * self.usable_page_size() as u64
    }

    /// Address of the file containing `address`.
    #[must_use]
    pub const fn file_address(&self, address: u64) -> u64 {
        address - address % self.file_length_bound
    }

    /// Address of the page containing `address`.
    #[must_use]
    pub const fn page_address(&self, address: u64) -> u64 {
        address - address % self.page_size as u64
    }

    /// Offset of `address` within its page.
    #[must_use]
    pub const fn page_offset(&self, address: u64) -> usize {
        (address % self.page_size as u64) as usize
    }

    /// Returns `true` if `address` is the first byte of a file.
    #[must_use]
    pub const fn is_file_start(&self, address: u64) -> bool {
        address % self.file_length_bound == 0
    }

    /// Advances `address` by `offset` usable bytes, stepping over trailers.
    ///
    /// The result is normalized: when it lands on the first trailer byte of
    /// a page, the start of the next page is returned instead.
    #[must_use]
    pub const fn adjust_loggable_address(&self, address: u64, offset: u64) -> u64 {
        if !self.checksums {
            return address + offset;
        }
        let usable = self.usable_page_size() as u64;
        let page_size = self.page_size as u64;
        let page_start = self.page_address(address);
        let logical = (address - page_start) + offset;
        let pages = logical / usable;
        page_start + pages * page_size + logical % usable
    }

    /// Usable bytes from `address` to the end of its page.
    #[must_use]
    pub const fn remaining_in_page(&self, address: u64) -> usize {
        let offset = self.page_offset(address);
        let usable = self.usable_page_size();
        if offset >= usable {
            0
        } else {
            usable - offset
        }
    }

    /// Usable bytes from `address` to the end of its file.
    #[must_use]
    pub const fn remaining_in_file(&self, address: u64) -> u64 {
        let page_start = self.page_address(address);
        let file_end = self.file_address(address) + self.file_length_bound;
        let full_pages = (file_end - page_start) / self.page_size as u64 - 1;
        self.remaining_in_page(address) as u64 + full_pages * self.usable_page_size() as u64
    }
}
