//! Stress tests for PageLog.
//!
//! These tests verify behavior under heavy load and concurrent access.

use crate::fixtures::payload;
use pagelog_core::Log;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Result of a stress test run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Total operations performed.
    pub total_ops: usize,
    /// Successful operations.
    pub successful_ops: usize,
    /// Failed operations.
    pub failed_ops: usize,
    /// Total duration.
    pub duration: Duration,
    /// Operations per second.
    pub ops_per_second: f64,
}

impl StressTestResult {
    /// Creates a new result.
    pub fn new(successful: usize, failed: usize, duration: Duration) -> Self {
        let total = successful + failed;
        let ops_per_second = if duration.as_secs_f64() > 0.0 {
            total as f64 / duration.as_secs_f64()
        } else {
            0.0
        };

        Self {
            total_ops: total,
            successful_ops: successful,
            failed_ops: failed,
            duration,
            ops_per_second,
        }
    }

    /// Prints a summary of the test.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {} ===", name);
        println!("Total operations: {}", self.total_ops);
        println!("Successful: {}", self.successful_ops);
        println!("Failed: {}", self.failed_ops);
        println!("Duration: {:?}", self.duration);
        println!("Throughput: {:.2} ops/sec", self.ops_per_second);
    }
}

/// Configuration for stress tests.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Number of records to write.
    pub operations: usize,
    /// Number of concurrent reader threads.
    pub threads: usize,
    /// Payload size in bytes.
    pub record_size: usize,
    /// Records written per session.
    pub records_per_session: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            operations: 10_000,
            threads: 4,
            record_size: 256,
            records_per_session: 8,
        }
    }
}

/// Appends `operations` records in sessions of `records_per_session`.
pub fn stress_sequential_writes(log: &Log, config: &StressConfig) -> StressTestResult {
    let start = Instant::now();
    let mut successful = 0usize;
    let mut failed = 0usize;
    let mut written = 0usize;

    while written < config.operations {
        let batch = config.records_per_session.min(config.operations - written);
        let outcome = log.begin_write().and_then(|mut session| {
            for i in written..written + batch {
                session.write(1, i as u32, &payload(i as u64, config.record_size))?;
            }
            session.end()
        });
        match outcome {
            Ok(_) => successful += batch,
            Err(_) => failed += batch,
        }
        written += batch;
    }

    StressTestResult::new(successful, failed, start.elapsed())
}

/// Reads every record written by [`stress_sequential_writes`] in order.
pub fn stress_sequential_reads(log: &Log, config: &StressConfig) -> StressTestResult {
    let start = Instant::now();
    let mut successful = 0usize;
    let mut failed = 0usize;

    for (i, loggable) in log.loggable_iter(0).enumerate() {
        let ok = loggable.is_ok_and(|l| {
            l.structure_id() == i as u32
                && l.data()
                    .to_bytes()
                    .is_ok_and(|d| d.as_ref() == payload(i as u64, config.record_size).as_slice())
        });
        if ok {
            successful += 1;
        } else {
            failed += 1;
        }
    }
    failed += config.operations.saturating_sub(successful + failed);

    StressTestResult::new(successful, failed, start.elapsed())
}

/// Writes records on one thread while `threads` readers scan the log.
///
/// Readers only ever see whole sessions: every scan must find a gapless
/// run of records starting at structure id zero.
pub fn stress_concurrent_reads(log: &Log, config: &StressConfig) -> StressTestResult {
    let writer_done = AtomicBool::new(false);
    let successful = AtomicUsize::new(0);
    let failed = AtomicUsize::new(0);
    let start = Instant::now();

    thread::scope(|scope| {
        for _ in 0..config.threads {
            scope.spawn(|| {
                let mut last_seen = 0usize;
                loop {
                    let done = writer_done.load(Ordering::Acquire);
                    let reader = log.reader();
                    let mut seen = 0usize;
                    let mut scan_ok = true;
                    for loggable in reader.loggables(0) {
                        match loggable {
                            Ok(l) if l.structure_id() as usize == seen => seen += 1,
                            _ => {
                                scan_ok = false;
                                break;
                            }
                        }
                    }
                    let whole_sessions = seen % config.records_per_session == 0
                        || seen == config.operations;
                    if scan_ok && seen >= last_seen && whole_sessions {
                        successful.fetch_add(1, Ordering::Relaxed);
                    } else {
                        failed.fetch_add(1, Ordering::Relaxed);
                    }
                    last_seen = seen;
                    if done {
                        break;
                    }
                }
            });
        }

        let result = stress_sequential_writes(log, config);
        failed.fetch_add(result.failed_ops, Ordering::Relaxed);
        writer_done.store(true, Ordering::Release);
    });

    StressTestResult::new(
        successful.load(Ordering::Relaxed),
        failed.load(Ordering::Relaxed),
        start.elapsed(),
    )
}

/// Writes one large session spanning several files.
pub fn stress_large_sessions(log: &Log, config: &StressConfig) -> StressTestResult {
    let start = Instant::now();
    let outcome = log.begin_write().and_then(|mut session| {
        for i in 0..config.operations {
            session.write(2, i as u32, &payload(i as u64, config.record_size))?;
        }
        session.end()
    });
    let (successful, failed) = match outcome {
        Ok(_) => (config.operations, 0),
        Err(_) => (0, config.operations),
    };
    StressTestResult::new(successful, failed, start.elapsed())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{small_config, TestLog};

    fn create_test_log() -> TestLog {
        TestLog::memory(small_config())
    }

    #[test]
    fn test_sequential_writes() {
        let log = create_test_log();
        let config = StressConfig {
            operations: 1_000,
            record_size: 64,
            ..Default::default()
        };

        let result = stress_sequential_writes(&log, &config);
        assert_eq!(result.failed_ops, 0);
        assert_eq!(result.successful_ops, 1_000);
    }

    #[test]
    fn test_sequential_reads() {
        let mut log = create_test_log();
        let config = StressConfig {
            operations: 500,
            record_size: 300,
            ..Default::default()
        };

        stress_sequential_writes(&log, &config);
        log.reopen();
        let result = stress_sequential_reads(&log, &config);
        assert_eq!(result.failed_ops, 0);
        assert_eq!(result.successful_ops, 500);
    }

    #[test]
    fn test_concurrent_reads() {
        let log = create_test_log();
        let config = StressConfig {
            operations: 400,
            threads: 4,
            record_size: 100,
            records_per_session: 4,
        };

        let result = stress_concurrent_reads(&log, &config);
        assert_eq!(result.failed_ops, 0);
        assert!(result.successful_ops >= 4);
    }

    #[test]
    fn test_large_sessions() {
        let log = create_test_log();
        let config = StressConfig {
            operations: 200,
            record_size: 200,
            ..Default::default()
        };

        let result = stress_large_sessions(&log, &config);
        assert_eq!(result.failed_ops, 0);
        assert!(log.file_addresses().len() > 5);
        assert_eq!(log.loggable_iter(0).count(), 200);
    }
}
