//! Log records.
//!
//! On disk a loggable is:
//!
//! ```text
//! | type ^ 0x80 (1) | structure id (compressed) | data length (compressed) | data |
//! ```
//!
//! Two internal types have a shorter form. A null loggable is the single
//! byte `0x80` and pads pages and files. A hash loggable is `0xff` followed
//! by an 8-byte little-endian digest of every preceding byte of its page; it
//! marks where a write session ended.

use crate::error::{LogError, LogResult};
use crate::iterator::DataIterator;
use crate::reader::LogReader;
use crate::varint::{compressed_size, put_compressed};
use bytes::Bytes;
use std::fmt;

/// Type of the null loggable.
pub const NULL_TYPE: u8 = 0;

/// Type of the hash loggable.
pub const HASH_CODE_TYPE: u8 = 0x7f;

/// Largest loggable type.
pub const MAX_TYPE: u8 = 0x7f;

/// Encoded form of a null loggable.
pub const NULL_BYTE: u8 = NULL_TYPE ^ 0x80;

/// Encoded type byte of a hash loggable.
pub const HASH_CODE_BYTE: u8 = HASH_CODE_TYPE ^ 0x80;

/// Size of an encoded hash loggable.
pub const HASH_RECORD_SIZE: usize = 9;

/// Structure id used by records that belong to no structure.
pub const NO_STRUCTURE_ID: u32 = 0;

/// Returns `true` for types that only exist to keep the log well formed.
#[must_use]
pub const fn is_internal_type(loggable_type: u8) -> bool {
    loggable_type == NULL_TYPE || loggable_type == HASH_CODE_TYPE
}

/// Encoded length of a data loggable.
#[must_use]
pub fn encoded_length(structure_id: u32, data_length: usize) -> u64 {
    (1 + compressed_size(u64::from(structure_id)) + compressed_size(data_length as u64)) as u64
        + data_length as u64
}

/// Encodes the header of a data loggable.
///
/// # Errors
///
/// Returns [`LogError::InvalidArgument`] for the internal types and types
/// above [`MAX_TYPE`].
pub fn encode_header(
    loggable_type: u8,
    structure_id: u32,
    data_length: usize,
) -> LogResult<Vec<u8>> {
    if loggable_type > MAX_TYPE || is_internal_type(loggable_type) {
        return Err(LogError::invalid_argument(format!(
            "loggable type {loggable_type} is reserved or out of range"
        )));
    }
    let mut header = Vec::with_capacity(11);
    header.push(loggable_type ^ 0x80);
    put_compressed(&mut header, u64::from(structure_id));
    put_compressed(&mut header, data_length as u64);
    Ok(header)
}

/// Payload of a loggable.
#[derive(Clone)]
pub enum LoggableData {
    /// The payload lies within one page and is shared with the page buffer.
    Page(Bytes),
    /// The payload crosses pages and is read on demand.
    Spanning(SpanningData),
}

impl LoggableData {
    /// Payload length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Page(bytes) => bytes.len(),
            Self::Spanning(data) => data.length,
        }
    }

    /// Returns `true` for an empty payload.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the payload as contiguous bytes.
    ///
    /// # Errors
    ///
    /// Spanning payloads are read from the log and fail like any read.
    pub fn to_bytes(&self) -> LogResult<Bytes> {
        match self {
            Self::Page(bytes) => Ok(bytes.clone()),
            Self::Spanning(data) => data.to_bytes(),
        }
    }

    /// Returns a byte cursor over the payload.
    #[must_use]
    pub fn iter(&self) -> PayloadIterator {
        match self {
            Self::Page(bytes) => PayloadIterator::Page {
                bytes: bytes.clone(),
                position: 0,
            },
            Self::Spanning(data) => PayloadIterator::Spanning {
                inner: data.reader.data_iterator(data.address),
                remaining: data.length,
            },
        }
    }
}

impl fmt::Debug for LoggableData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Page(bytes) => f.debug_tuple("Page").field(&bytes.len()).finish(),
            Self::Spanning(data) => f
                .debug_struct("Spanning")
                .field("address", &data.address)
                .field("length", &data.length)
                .finish(),
        }
    }
}

/// A payload crossing page boundaries.
#[derive(Clone)]
pub struct SpanningData {
    reader: LogReader,
    address: u64,
    length: usize,
}

impl SpanningData {
    pub(crate) fn new(reader: LogReader, address: u64, length: usize) -> Self {
        Self {
            reader,
            address,
            length,
        }
    }

    /// Address of the first payload byte.
    #[must_use]
    pub fn address(&self) -> u64 {
        self.address
    }

    fn to_bytes(&self) -> LogResult<Bytes> {
        let mut buf = vec![0u8; self.length];
        self.reader
            .data_iterator(self.address)
            .read_into(&mut buf)?;
        Ok(Bytes::from(buf))
    }
}

/// Byte cursor over a loggable payload.
pub enum PayloadIterator {
    /// Over a single-page payload.
    Page {
        /// The payload.
        bytes: Bytes,
        /// Next position.
        position: usize,
    },
    /// Over a spanning payload.
    Spanning {
        /// Cursor over the log.
        inner: DataIterator,
        /// Bytes left.
        remaining: usize,
    },
}

impl Iterator for PayloadIterator {
    type Item = LogResult<u8>;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            Self::Page { bytes, position } => {
                let byte = bytes.get(*position).copied()?;
                *position += 1;
                Some(Ok(byte))
            }
            Self::Spanning { inner, remaining } => {
                if *remaining == 0 {
                    return None;
                }
                *remaining -= 1;
                Some(inner.next_byte())
            }
        }
    }
}

/// A record read from the log.
#[derive(Debug, Clone)]
pub struct Loggable {
    pub(crate) address: u64,
    pub(crate) loggable_type: u8,
    pub(crate) structure_id: u32,
    pub(crate) data: LoggableData,
    pub(crate) end_address: u64,
}

impl Loggable {
    /// Address of the type byte.
    #[must_use]
    pub fn address(&self) -> u64 {
        self.address
    }

    /// Loggable type, without the on-disk high bit.
    #[must_use]
    pub fn loggable_type(&self) -> u8 {
        self.loggable_type
    }

    /// Structure id.
    #[must_use]
    pub fn structure_id(&self) -> u32 {
        self.structure_id
    }

    /// Payload length.
    #[must_use]
    pub fn data_length(&self) -> usize {
        self.data.len()
    }

    /// Payload.
    #[must_use]
    pub fn data(&self) -> &LoggableData {
        &self.data
    }

    /// Address just past the record; the next record starts here.
    #[must_use]
    pub fn end_address(&self) -> u64 {
        self.end_address
    }

    /// Returns `true` for the null loggable.
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.loggable_type == NULL_TYPE
    }

    /// Returns `true` for the hash loggable.
    #[must_use]
    pub fn is_hash_code(&self) -> bool {
        self.loggable_type == HASH_CODE_TYPE
    }

    /// Returns `true` for null and hash loggables.
    #[must_use]
    pub fn is_internal(&self) -> bool {
        is_internal_type(self.loggable_type)
    }
}
