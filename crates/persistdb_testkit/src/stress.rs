//! Stress tests for persistdb.
//!
//! These helpers save from several threads at once to exercise the
//! atomic uniqueness check.

use persistdb_core::{CoreError, Database, ObjectRef};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing::debug;

/// Result of a stress test run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Saves that succeeded.
    pub successful_ops: usize,
    /// Saves rejected by a unique index.
    pub uniqueness_failures: usize,
    /// Saves that failed for any other reason.
    pub other_failures: usize,
    /// Total duration.
    pub duration: Duration,
}

impl StressTestResult {
    /// Total saves attempted.
    pub fn total_ops(&self) -> usize {
        self.successful_ops + self.uniqueness_failures + self.other_failures
    }
}

/// Configuration for stress tests.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Number of saving threads.
    pub threads: usize,
    /// Saves per thread.
    pub saves_per_thread: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            threads: 4,
            saves_per_thread: 50,
        }
    }
}

/// Saves objects of `class` from many threads, each carrying
/// `value_for(thread, i)` at `attribute`.
///
/// With a unique index on `attribute`, exactly one save per distinct value
/// can succeed, however the threads interleave.
pub fn concurrent_saves<F>(
    db: &Database,
    config: &StressConfig,
    class: &str,
    attribute: &str,
    value_for: F,
) -> StressTestResult
where
    F: Fn(usize, usize) -> i64 + Sync,
{
    let successful = AtomicUsize::new(0);
    let uniqueness = AtomicUsize::new(0);
    let other = AtomicUsize::new(0);
    let start = Instant::now();

    thread::scope(|scope| {
        for t in 0..config.threads {
            let (successful, uniqueness, other, value_for) =
                (&successful, &uniqueness, &other, &value_for);
            scope.spawn(move || {
                for i in 0..config.saves_per_thread {
                    let object = ObjectRef::new(class);
                    object.set(attribute, value_for(t, i));
                    match db.save(&object) {
                        Ok(()) => successful.fetch_add(1, Ordering::Relaxed),
                        Err(CoreError::Uniqueness { .. }) => {
                            uniqueness.fetch_add(1, Ordering::Relaxed)
                        }
                        Err(_) => other.fetch_add(1, Ordering::Relaxed),
                    };
                }
            });
        }
    });

    let result = StressTestResult {
        successful_ops: successful.into_inner(),
        uniqueness_failures: uniqueness.into_inner(),
        other_failures: other.into_inner(),
        duration: start.elapsed(),
    };
    debug!(
        "{} saves on {} threads in {:?}: {} ok, {} rejected",
        result.total_ops(),
        config.threads,
        result.duration,
        result.successful_ops,
        result.uniqueness_failures
    );
    result
}
