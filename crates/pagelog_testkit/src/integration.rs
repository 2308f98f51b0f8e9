//! Cross-crate integration test helpers.
//!
//! Provides utilities for testing the log on top of the storage crate:
//! record tracking across reopen, cache and executor sharing, and page
//! encryption.

use crate::fixtures::{small_config, TestLog};
use pagelog_core::{Log, LogConfig, LogResult};
use std::collections::BTreeMap;

/// A record kept by the harness for verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedRecord {
    /// Loggable type.
    pub loggable_type: u8,
    /// Structure id.
    pub structure_id: u32,
    /// Payload.
    pub data: Vec<u8>,
}

/// A test harness for integration testing.
pub struct LogHarness {
    /// The log under test.
    pub log: TestLog,
    records: BTreeMap<u64, TrackedRecord>,
}

impl LogHarness {
    /// Creates a harness with an in-memory log.
    pub fn new() -> Self {
        Self::with_log(TestLog::memory(small_config()))
    }

    /// Creates a harness around an existing test log.
    pub fn with_log(log: TestLog) -> Self {
        Self {
            log,
            records: BTreeMap::new(),
        }
    }

    /// Appends records in one session and tracks them.
    pub fn append_session(&mut self, records: &[(u8, u32, Vec<u8>)]) -> Vec<u64> {
        let mut session = self.log.begin_write().expect("Failed to begin session");
        let mut addresses = Vec::with_capacity(records.len());
        for (loggable_type, structure_id, data) in records {
            let address = session
                .write(*loggable_type, *structure_id, data)
                .expect("Failed to write record");
            addresses.push(address);
        }
        session.end().expect("Failed to end session");

        for (address, (loggable_type, structure_id, data)) in addresses.iter().zip(records) {
            self.records.insert(
                *address,
                TrackedRecord {
                    loggable_type: *loggable_type,
                    structure_id: *structure_id,
                    data: data.clone(),
                },
            );
        }
        addresses
    }

    /// Appends one record and tracks it.
    pub fn append(&mut self, loggable_type: u8, structure_id: u32, data: &[u8]) -> u64 {
        self.append_session(&[(loggable_type, structure_id, data.to_vec())])[0]
    }

    /// Reads a record and verifies it matches the tracked value.
    pub fn read_and_verify(&self, address: u64) -> TrackedRecord {
        let loggable = self.log.read(address).expect("Failed to read record");
        let actual = TrackedRecord {
            loggable_type: loggable.loggable_type(),
            structure_id: loggable.structure_id(),
            data: loggable.data().to_bytes().expect("Failed to read payload").to_vec(),
        };
        if let Some(expected) = self.records.get(&address) {
            assert_eq!(&actual, expected, "Record mismatch at {address}");
        }
        actual
    }

    /// Verifies that iterating the log yields exactly the tracked records.
    pub fn verify_all(&self) {
        let found: BTreeMap<u64, TrackedRecord> = self
            .log
            .loggable_iter(0)
            .map(|l| {
                let l = l.expect("Failed to iterate");
                let data = l.data().to_bytes().expect("Failed to read payload").to_vec();
                (
                    l.address(),
                    TrackedRecord {
                        loggable_type: l.loggable_type(),
                        structure_id: l.structure_id(),
                        data,
                    },
                )
            })
            .collect();
        assert_eq!(found.len(), self.records.len(), "Record count mismatch");
        for (address, expected) in &self.records {
            assert_eq!(found.get(address), Some(expected), "Record mismatch at {address}");
        }
    }

    /// Closes and reopens the log.
    pub fn reopen(&mut self) {
        self.log.reopen();
    }

    /// Returns the count of tracked records.
    pub fn tracked_count(&self) -> usize {
        self.records.len()
    }
}

impl Default for LogHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Test cache and executor sharing between logs.
pub mod sharing {
    use super::*;
    use pagelog_core::{LogError, SharedPageCache, WriteExecutor};
    use std::sync::Arc;

    /// Opens two logs on one shared cache and checks they stay apart.
    pub fn test_logs_share_cache(config: &LogConfig) -> LogResult<()> {
        let cache = Arc::new(SharedPageCache::for_config(config)?);
        let config = config.clone().shared_cache(Arc::clone(&cache));
        let first = Log::open_in_memory(config.clone())?;
        let second = Log::open_in_memory(config)?;

        let a = first.write(1, 1, &vec![0xAA; 2000])?;
        let b = second.write(1, 2, &vec![0xBB; 2000])?;
        assert_eq!(a, b, "Fresh logs start at the same address");

        let from_first = first.read(a)?.data().to_bytes()?;
        let from_second = second.read(b)?.data().to_bytes()?;
        assert!(from_first.iter().all(|&x| x == 0xAA));
        assert!(from_second.iter().all(|&x| x == 0xBB));
        assert!(!cache.is_empty(), "Shared cache should hold pages");
        Ok(())
    }

    /// Checks that a log refuses a shared cache with another page size.
    pub fn test_cache_page_size_mismatch(config: &LogConfig) -> LogResult<()> {
        let cache = SharedPageCache::new(1 << 20, config.page_size * 2, 2, false, false)?;
        let config = config.clone().shared_cache(Arc::new(cache));
        match Log::open_in_memory(config) {
            Err(LogError::ConfigMismatch { .. }) => Ok(()),
            Err(err) => Err(err),
            Ok(_) => panic!("Log accepted a cache with another page size"),
        }
    }

    /// Checks that a log refuses an executor sized for other files.
    pub fn test_executor_mismatch(config: &LogConfig) -> LogResult<()> {
        let pages_per_file = config.file_length_bound() / config.page_size as u64;
        let executor = WriteExecutor::new(pages_per_file as usize + 1)?;
        match Log::open_in_memory(config.clone().write_executor(executor)) {
            Err(LogError::ConfigMismatch { .. }) => Ok(()),
            Err(err) => Err(err),
            Ok(_) => panic!("Log accepted an executor sized for other files"),
        }
    }

    /// Runs two logs on one executor.
    pub fn test_logs_share_executor(config: &LogConfig) -> LogResult<()> {
        let pages_per_file = config.file_length_bound() / config.page_size as u64;
        let executor = WriteExecutor::new(pages_per_file as usize)?;
        let config = config.clone().write_executor(executor.clone());
        let first = Log::open_in_memory(config.clone())?;
        let second = Log::open_in_memory(config)?;
        for i in 0..50u32 {
            first.write(1, i, &[1; 300])?;
            second.write(2, i, &[2; 300])?;
        }
        first.sync()?;
        second.sync()?;
        assert_eq!(executor.available_permits(), executor.max_in_flight_pages());
        assert_eq!(first.loggable_iter(0).count(), 50);
        assert_eq!(second.loggable_iter(0).count(), 50);
        Ok(())
    }
}

/// Test encrypted logs.
#[cfg(feature = "encryption")]
pub mod encryption {
    use super::*;
    use pagelog_core::{CipherConfig, CipherKey};
    use pagelog_storage::{BlockStore, InMemoryBlockStore};
    use std::sync::Arc;

    /// Writes through a cipher and checks storage never holds the plaintext.
    pub fn test_encrypted_round_trip(config: &LogConfig) -> LogResult<()> {
        let key = CipherKey::generate();
        let config = config.clone().cipher(CipherConfig::new(key, 0x5eed));
        let store = Arc::new(InMemoryBlockStore::new());
        let secret = b"attack at dawn, attack at dawn, attack at dawn".to_vec();

        let log = Log::open(Arc::clone(&store) as Arc<dyn BlockStore>, config.clone())?;
        let addresses: Vec<u64> = (0..40)
            .map(|i| log.write(1, i, &secret))
            .collect::<LogResult<_>>()?;
        log.close()?;
        drop(log);

        for address in store.list_blocks()? {
            let raw = store.block_data(address).unwrap_or_default();
            assert!(
                !raw.windows(secret.len()).any(|w| w == secret.as_slice()),
                "Plaintext found in file {address}"
            );
        }

        let log = Log::open(store, config)?;
        for &address in &addresses {
            assert_eq!(log.read(address)?.data().to_bytes()?.as_ref(), secret.as_slice());
        }
        Ok(())
    }

    /// Reads an encrypted log with the wrong key.
    pub fn test_wrong_key_hides_data(config: &LogConfig) -> LogResult<()> {
        let store = Arc::new(InMemoryBlockStore::new());
        let right = config
            .clone()
            .cipher(CipherConfig::new(CipherKey::generate(), 7));
        let log = Log::open(Arc::clone(&store) as Arc<dyn BlockStore>, right)?;
        let address = log.write(3, 9, b"only for the right key")?;
        log.close()?;
        drop(log);

        let wrong = config
            .clone()
            .cipher(CipherConfig::new(CipherKey::generate(), 7));
        let log = Log::open(store, wrong)?;
        let leaked = log
            .read(address)
            .and_then(|l| l.data().to_bytes())
            .is_ok_and(|d| d.as_ref() == b"only for the right key");
        assert!(!leaked, "Wrong key revealed the payload");
        Ok(())
    }
}
