//! Property-based test generators using proptest.
//!
//! Provides strategies for generating records and write patterns that a
//! log must accept.

use pagelog_core::loggable::{HASH_CODE_TYPE, NULL_TYPE};
use proptest::prelude::*;

/// A record to append: type, structure id and payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordSpec {
    /// Loggable type, never an internal one.
    pub loggable_type: u8,
    /// Structure id.
    pub structure_id: u32,
    /// Payload.
    pub data: Vec<u8>,
}

/// Strategy for generating loggable types available to callers.
pub fn loggable_type_strategy() -> impl Strategy<Value = u8> {
    (NULL_TYPE + 1)..HASH_CODE_TYPE
}

/// Strategy for generating structure ids, biased towards small values.
pub fn structure_id_strategy() -> impl Strategy<Value = u32> {
    prop_oneof![
        3 => 0u32..128,
        2 => 128u32..16_384,
        1 => any::<u32>(),
    ]
}

/// Strategy for generating payloads up to `max_len` bytes.
pub fn payload_strategy(max_len: usize) -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..=max_len)
}

/// Strategy for generating one record with a payload up to `max_len` bytes.
pub fn record_strategy(max_len: usize) -> impl Strategy<Value = RecordSpec> {
    (
        loggable_type_strategy(),
        structure_id_strategy(),
        payload_strategy(max_len),
    )
        .prop_map(|(loggable_type, structure_id, data)| RecordSpec {
            loggable_type,
            structure_id,
            data,
        })
}

/// Strategy for generating write sessions: each inner vector is one session.
pub fn sessions_strategy(
    max_sessions: usize,
    max_records: usize,
    max_len: usize,
) -> impl Strategy<Value = Vec<Vec<RecordSpec>>> {
    prop::collection::vec(
        prop::collection::vec(record_strategy(max_len), 1..=max_records),
        1..=max_sessions,
    )
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to generate.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Creates a configuration for thorough tests.
    #[must_use]
    pub fn thorough() -> Self {
        Self {
            cases: 1024,
            max_shrink_iters: 10000,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{small_config, TestLog};
    use pagelog_core::loggable::is_internal_type;

    proptest! {
        #![proptest_config(PropTestConfig::quick().to_proptest_config())]

        #[test]
        fn loggable_type_is_not_internal(t in loggable_type_strategy()) {
            prop_assert!(!is_internal_type(t));
        }

        #[test]
        fn sessions_read_back_in_order(sessions in sessions_strategy(6, 8, 1500)) {
            let mut test_log = TestLog::memory(small_config());
            let mut expected = Vec::new();
            for session in &sessions {
                let mut write = test_log.begin_write().unwrap();
                for record in session {
                    let address = write
                        .write(record.loggable_type, record.structure_id, &record.data)
                        .unwrap();
                    expected.push((address, record.clone()));
                }
                write.end().unwrap();
            }

            let log = test_log.reopen();
            let found: Vec<_> = log
                .loggable_iter(0)
                .collect::<Result<_, _>>()
                .unwrap();
            prop_assert_eq!(found.len(), expected.len());
            for (loggable, (address, record)) in found.iter().zip(&expected) {
                prop_assert_eq!(loggable.address(), *address);
                prop_assert_eq!(loggable.loggable_type(), record.loggable_type);
                prop_assert_eq!(loggable.structure_id(), record.structure_id);
                let data = loggable.data().to_bytes().unwrap();
                prop_assert_eq!(data.as_ref(), record.data.as_slice());
            }
        }
    }
}
