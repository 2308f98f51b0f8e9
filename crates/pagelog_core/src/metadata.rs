//! Startup and backup metadata.
//!
//! Startup metadata is written alternately to two files so that a torn
//! write never destroys the last good copy. Both layouts are little-endian
//! and start with an XXH3 hash of everything after it:
//!
//! ```text
//! | hash (8) | file version (8) | format version (4) | environment format version (4)
//! | root address (8, -1 = none) | page size (4) | file length boundary (8)
//! | correctly closed (1) |
//! ```
//!
//! Backup metadata appends the last file address (8) and the offset of the
//! high address within that file (8).

use crate::error::{LogError, LogResult};
use pagelog_storage::BlockStore;
use tracing::{debug, warn};
use xxhash_rust::xxh3::xxh3_64;

/// Names of the two startup metadata files.
pub const STARTUP_METADATA_FILES: [&str; 2] = ["startup-metadata.0", "startup-metadata.1"];

/// Name of the backup metadata file.
pub const BACKUP_METADATA_FILE: &str = "backup-metadata";

/// Format of logs whose pages carry hash trailers.
pub const FORMAT_VERSION: u32 = 2;

/// Format of logs without page hashes.
pub const LEGACY_FORMAT_VERSION: u32 = 1;

/// Persisted form of a missing root address.
pub const NULL_ADDRESS: i64 = -1;

/// Encoded size of [`StartupMetadata`].
pub const STARTUP_METADATA_SIZE: usize = 45;

/// Encoded size of [`BackupMetadata`].
pub const BACKUP_METADATA_SIZE: usize = STARTUP_METADATA_SIZE + 16;

/// Returns the format version for a log with or without checksums.
#[must_use]
pub const fn format_version(checksums: bool) -> u32 {
    if checksums {
        FORMAT_VERSION
    } else {
        LEGACY_FORMAT_VERSION
    }
}

/// Persisted facts about a log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartupMetadata {
    /// Monotonic version; the higher of the two files wins.
    pub file_version: u64,
    /// Log format version.
    pub format_version: u32,
    /// Format version of the layer above the log.
    pub environment_format_version: u32,
    /// Address of the last root record, if any.
    pub root_address: Option<u64>,
    /// Page size in bytes.
    pub page_size: u32,
    /// File length in bytes.
    pub file_length_boundary: u64,
    /// Whether the log was closed cleanly.
    pub correctly_closed: bool,
}

impl StartupMetadata {
    fn encode_body(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.file_version.to_le_bytes());
        out.extend_from_slice(&self.format_version.to_le_bytes());
        out.extend_from_slice(&self.environment_format_version.to_le_bytes());
        let root = self.root_address.map_or(NULL_ADDRESS, |a| a as i64);
        out.extend_from_slice(&root.to_le_bytes());
        out.extend_from_slice(&self.page_size.to_le_bytes());
        out.extend_from_slice(&self.file_length_boundary.to_le_bytes());
        out.push(u8::from(self.correctly_closed));
    }

    fn decode_body(body: &[u8]) -> Option<Self> {
        let mut reader = FieldReader { bytes: body };
        let file_version = reader.u64()?;
        let format_version = reader.u32()?;
        let environment_format_version = reader.u32()?;
        let root = reader.u64()? as i64;
        let page_size = reader.u32()?;
        let file_length_boundary = reader.u64()?;
        let correctly_closed = match reader.u8()? {
            0 => false,
            1 => true,
            _ => return None,
        };
        Some(Self {
            file_version,
            format_version,
            environment_format_version,
            root_address: u64::try_from(root).ok(),
            page_size,
            file_length_boundary,
            correctly_closed,
        })
    }

    /// Encodes the metadata with its hash.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut body = Vec::with_capacity(STARTUP_METADATA_SIZE - 8);
        self.encode_body(&mut body);
        with_hash(body)
    }

    /// Decodes metadata, returning `None` if the size or hash is wrong.
    #[must_use]
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != STARTUP_METADATA_SIZE {
            return None;
        }
        Self::decode_body(verified_body(bytes)?)
    }
}

/// Startup metadata plus the position of the high address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackupMetadata {
    /// Metadata of the log at backup time.
    pub startup: StartupMetadata,
    /// Address of the last file.
    pub last_file_address: u64,
    /// Offset of the high address in the last file.
    pub last_file_offset: u64,
}

impl BackupMetadata {
    /// Encodes the metadata with its hash.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut body = Vec::with_capacity(BACKUP_METADATA_SIZE - 8);
        self.startup.encode_body(&mut body);
        body.extend_from_slice(&self.last_file_address.to_le_bytes());
        body.extend_from_slice(&self.last_file_offset.to_le_bytes());
        with_hash(body)
    }

    /// Decodes metadata, returning `None` if the size or hash is wrong.
    #[must_use]
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != BACKUP_METADATA_SIZE {
            return None;
        }
        let body = verified_body(bytes)?;
        let split = STARTUP_METADATA_SIZE - 8;
        let startup = StartupMetadata::decode_body(&body[..split])?;
        let mut reader = FieldReader {
            bytes: &body[split..],
        };
        Some(Self {
            startup,
            last_file_address: reader.u64()?,
            last_file_offset: reader.u64()?,
        })
    }

    /// High address recorded by the backup.
    #[must_use]
    pub fn high_address(&self) -> u64 {
        self.last_file_address + self.last_file_offset
    }
}

fn with_hash(body: Vec<u8>) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len() + 8);
    out.extend_from_slice(&xxh3_64(&body).to_le_bytes());
    out.extend_from_slice(&body);
    out
}

fn verified_body(bytes: &[u8]) -> Option<&[u8]> {
    let (hash, body) = bytes.split_at(8);
    let mut stored = [0u8; 8];
    stored.copy_from_slice(hash);
    (u64::from_le_bytes(stored) == xxh3_64(body)).then_some(body)
}

struct FieldReader<'a> {
    bytes: &'a [u8],
}

impl FieldReader<'_> {
    fn take<const N: usize>(&mut self) -> Option<[u8; N]> {
        if self.bytes.len() < N {
            return None;
        }
        let (head, rest) = self.bytes.split_at(N);
        self.bytes = rest;
        let mut out = [0u8; N];
        out.copy_from_slice(head);
        Some(out)
    }

    fn u8(&mut self) -> Option<u8> {
        self.take::<1>().map(|b| b[0])
    }

    fn u32(&mut self) -> Option<u32> {
        self.take().map(u32::from_le_bytes)
    }

    fn u64(&mut self) -> Option<u64> {
        self.take().map(u64::from_le_bytes)
    }
}

/// Tracks which startup metadata file holds the current version.
#[derive(Debug, Default)]
pub(crate) struct StartupMetadataFiles {
    slot: Option<usize>,
    version: u64,
}

impl StartupMetadataFiles {
    /// Reads both files and returns the newest valid metadata.
    pub(crate) fn load(store: &dyn BlockStore) -> LogResult<(Self, Option<StartupMetadata>)> {
        let mut best: Option<(usize, StartupMetadata)> = None;
        for (slot, name) in STARTUP_METADATA_FILES.iter().enumerate() {
            let Some(bytes) = store.read_metadata(name)? else {
                continue;
            };
            let Some(metadata) = StartupMetadata::decode(&bytes) else {
                warn!(file = name, size = bytes.len(), "ignoring invalid startup metadata");
                continue;
            };
            if best.map_or(true, |(_, b)| metadata.file_version > b.file_version) {
                best = Some((slot, metadata));
            }
        }

        let files = Self {
            slot: best.map(|(slot, _)| slot),
            version: best.map_or(0, |(_, m)| m.file_version),
        };
        Ok((files, best.map(|(_, m)| m)))
    }

    /// Writes `metadata` as the next version into the other file.
    pub(crate) fn store_next(
        &mut self,
        store: &dyn BlockStore,
        metadata: &mut StartupMetadata,
    ) -> LogResult<()> {
        let slot = self.slot.map_or(0, |s| 1 - s);
        let version = self.version + 1;
        metadata.file_version = version;
        store.write_metadata(STARTUP_METADATA_FILES[slot], &metadata.encode())?;
        debug!(
            file = STARTUP_METADATA_FILES[slot],
            version,
            closed = metadata.correctly_closed,
            "startup metadata written"
        );
        self.slot = Some(slot);
        self.version = version;
        Ok(())
    }

    /// Removes both files.
    pub(crate) fn remove_all(&mut self, store: &dyn BlockStore) -> LogResult<()> {
        for name in STARTUP_METADATA_FILES {
            store.remove_metadata(name)?;
        }
        *self = Self::default();
        Ok(())
    }
}

/// Reads the backup metadata file, if present and valid.
///
/// # Errors
///
/// Returns an error if the store cannot be read.
pub fn read_backup_metadata(store: &dyn BlockStore) -> LogResult<Option<BackupMetadata>> {
    Ok(store
        .read_metadata(BACKUP_METADATA_FILE)?
        .and_then(|bytes| BackupMetadata::decode(&bytes)))
}

pub(crate) fn write_backup_metadata(store: &dyn BlockStore, metadata: &BackupMetadata) -> LogResult<()> {
    store
        .write_metadata(BACKUP_METADATA_FILE, &metadata.encode())
        .map_err(LogError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pagelog_storage::InMemoryBlockStore;

    fn sample() -> StartupMetadata {
        StartupMetadata {
            file_version: 3,
            format_version: FORMAT_VERSION,
            environment_format_version: 7,
            root_address: Some(123_456),
            page_size: 65536,
            file_length_boundary: 8 << 20,
            correctly_closed: true,
        }
    }

    #[test]
    fn startup_layout() {
        let encoded = sample().encode();
        assert_eq!(encoded.len(), STARTUP_METADATA_SIZE);
        assert_eq!(&encoded[8..16], &3u64.to_le_bytes());
        assert_eq!(&encoded[16..20], &FORMAT_VERSION.to_le_bytes());
        assert_eq!(encoded[44], 1);
        assert_eq!(StartupMetadata::decode(&encoded), Some(sample()));
    }

    #[test]
    fn missing_root_is_minus_one() {
        let metadata = StartupMetadata {
            root_address: None,
            ..sample()
        };
        let encoded = metadata.encode();
        assert_eq!(&encoded[24..32], &(-1i64).to_le_bytes());
        assert_eq!(StartupMetadata::decode(&encoded).unwrap().root_address, None);
    }

    #[test]
    fn corrupted_metadata_is_absent() {
        let mut encoded = sample().encode();
        encoded[30] ^= 0x10;
        assert_eq!(StartupMetadata::decode(&encoded), None);
        assert_eq!(StartupMetadata::decode(&encoded[..44]), None);
    }

    #[test]
    fn backup_layout() {
        let backup = BackupMetadata {
            startup: sample(),
            last_file_address: 8 << 20,
            last_file_offset: 4000,
        };
        let encoded = backup.encode();
        assert_eq!(encoded.len(), BACKUP_METADATA_SIZE);
        assert_eq!(BackupMetadata::decode(&encoded), Some(backup));
        assert_eq!(backup.high_address(), (8 << 20) + 4000);
        assert_eq!(BackupMetadata::decode(&encoded[..45]), None);
    }

    #[test]
    fn files_alternate_and_newest_wins() {
        let store = InMemoryBlockStore::new();
        let (mut files, loaded) = StartupMetadataFiles::load(&store).unwrap();
        assert!(loaded.is_none());

        let mut metadata = sample();
        files.store_next(&store, &mut metadata).unwrap();
        assert_eq!(metadata.file_version, 1);
        metadata.correctly_closed = false;
        files.store_next(&store, &mut metadata).unwrap();
        assert_eq!(
            store.metadata_names(),
            vec!["startup-metadata.0", "startup-metadata.1"]
        );

        let (_, loaded) = StartupMetadataFiles::load(&store).unwrap();
        let loaded = loaded.unwrap();
        assert_eq!(loaded.file_version, 2);
        assert!(!loaded.correctly_closed);
    }

    #[test]
    fn torn_newest_file_falls_back() {
        let store = InMemoryBlockStore::new();
        let (mut files, _) = StartupMetadataFiles::load(&store).unwrap();
        let mut metadata = sample();
        files.store_next(&store, &mut metadata).unwrap();
        metadata.root_address = Some(999);
        files.store_next(&store, &mut metadata).unwrap();

        store.set_metadata(STARTUP_METADATA_FILES[1], vec![0u8; 20]);

        let (mut files, loaded) = StartupMetadataFiles::load(&store).unwrap();
        let loaded = loaded.unwrap();
        assert_eq!(loaded.file_version, 1);
        assert_eq!(loaded.root_address, Some(123_456));

        let mut next = loaded;
        files.store_next(&store, &mut next).unwrap();
        assert_eq!(next.file_version, 2);
        let (_, reloaded) = StartupMetadataFiles::load(&store).unwrap();
        assert_eq!(reloaded.unwrap().file_version, 2);
    }

    #[test]
    fn remove_all_files() {
        let store = InMemoryBlockStore::new();
        let (mut files, _) = StartupMetadataFiles::load(&store).unwrap();
        files.store_next(&store, &mut sample()).unwrap();
        files.remove_all(&store).unwrap();
        assert!(store.metadata_names().is_empty());
    }

    #[test]
    fn backup_file_roundtrip_through_store() {
        let store = InMemoryBlockStore::new();
        assert!(read_backup_metadata(&store).unwrap().is_none());
        let backup = BackupMetadata {
            startup: sample(),
            last_file_address: 0,
            last_file_offset: 10,
        };
        write_backup_metadata(&store, &backup).unwrap();
        assert_eq!(read_backup_metadata(&store).unwrap(), Some(backup));
    }
}
