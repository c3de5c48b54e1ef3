#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![cfg_attr(coverage_nightly, coverage(off))] // This is all test code, no need to test it.

//! Private helpers for testing and benchmarking the elastic pool.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, mpsc};
use std::thread;
use std::time::Duration;

/// Runs a test with a timeout to prevent infinite hangs.
///
/// A pool bug typically shows up as an acquire that spins forever or a shutdown that never
/// drains, so every multithreaded test runs under this watchdog. If the test takes longer than
/// the timeout, the test panics instead of hanging the build.
///
/// The timeout is 10 seconds under normal conditions and 60 seconds under
/// Miri, where thread synchronization primitives are significantly slower.
///
/// When the `MUTATION_TESTING` environment variable is set to "1", the watchdog
/// is disabled and the test function is executed directly. This allows mutation
/// testing to properly detect hanging mutations.
///
/// # Panics
///
/// Panics if the test exceeds the timeout (when not in mutation testing mode).
///
/// # Example
///
/// ```rust
/// use testing::with_watchdog;
///
/// with_watchdog(|| {
///     assert_eq!(2 + 2, 4);
/// });
/// ```
pub fn with_watchdog<F, R>(test_fn: F) -> R
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    if std::env::var("MUTATION_TESTING").as_deref() == Ok("1") {
        return test_fn();
    }

    let (tx, rx) = mpsc::channel();

    let test_handle = thread::spawn(move || {
        let result = test_fn();
        // If this fails, the receiver has timed out.
        drop(tx.send(result));
    });

    let timeout = if cfg!(miri) {
        Duration::from_secs(60)
    } else {
        Duration::from_secs(10)
    };

    match rx.recv_timeout(timeout) {
        Ok(result) => {
            test_handle.join().expect("Test thread should not panic");
            result
        }
        Err(mpsc::RecvTimeoutError::Timeout) => {
            panic!("Test exceeded {} second timeout", timeout.as_secs());
        }
        Err(mpsc::RecvTimeoutError::Disconnected) => match test_handle.join() {
            Ok(()) => panic!("Test thread disconnected unexpectedly"),
            Err(e) => std::panic::resume_unwind(e),
        },
    }
}

/// Runs `work` on `threads` threads that all start at the same moment, returning their results
/// in thread index order.
///
/// # Panics
///
/// Re-raises the panic of any worker thread.
pub fn run_concurrently<F, R>(threads: usize, work: F) -> Vec<R>
where
    F: Fn(usize) -> R + Send + Sync + 'static,
    R: Send + 'static,
{
    let work = Arc::new(work);
    let start = Arc::new(Barrier::new(threads));

    let handles = (0..threads)
        .map(|index| {
            let work = Arc::clone(&work);
            let start = Arc::clone(&start);

            thread::spawn(move || {
                start.wait();
                work(index)
            })
        })
        .collect::<Vec<_>>();

    handles
        .into_iter()
        .map(|handle| match handle.join() {
            Ok(result) => result,
            Err(e) => std::panic::resume_unwind(e),
        })
        .collect()
}

/// Shared bookkeeping for test elements: how many were created, validated and disposed, and
/// which of them should report themselves as unhealthy.
///
/// Clones share the same counters, so a factory closure and the test body can each hold one.
///
/// # Example
///
/// ```rust
/// use testing::LifeCounters;
///
/// let counters = LifeCounters::new();
///
/// let id = counters.next_id();
/// assert_eq!(id, 0);
/// assert_eq!(counters.created(), 1);
///
/// counters.record_disposed();
/// assert_eq!(counters.alive(), 0);
/// ```
#[derive(Clone, Debug, Default)]
pub struct LifeCounters {
    inner: Arc<LifeCountersInner>,
}

#[derive(Debug, Default)]
struct LifeCountersInner {
    created: AtomicUsize,
    validated: AtomicUsize,
    disposed: AtomicUsize,
    fail_validation: AtomicBool,
}

impl LifeCounters {
    /// Creates a fresh set of counters, all at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a new element and returns its identifier. Identifiers are assigned sequentially
    /// starting from zero.
    #[must_use]
    pub fn next_id(&self) -> usize {
        self.inner.created.fetch_add(1, Ordering::SeqCst)
    }

    /// Records a validation and returns the outcome the element should report.
    #[must_use]
    pub fn record_validated(&self) -> bool {
        self.inner.validated.fetch_add(1, Ordering::SeqCst);
        !self.inner.fail_validation.load(Ordering::SeqCst)
    }

    /// Records a disposal.
    pub fn record_disposed(&self) {
        self.inner.disposed.fetch_add(1, Ordering::SeqCst);
    }

    /// Makes every following validation fail (or succeed again).
    pub fn set_fail_validation(&self, fail: bool) {
        self.inner.fail_validation.store(fail, Ordering::SeqCst);
    }

    /// Number of elements created so far.
    #[must_use]
    pub fn created(&self) -> usize {
        self.inner.created.load(Ordering::SeqCst)
    }

    /// Number of validations performed so far.
    #[must_use]
    pub fn validated(&self) -> usize {
        self.inner.validated.load(Ordering::SeqCst)
    }

    /// Number of elements disposed so far.
    #[must_use]
    pub fn disposed(&self) -> usize {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    /// Number of elements created but not yet disposed.
    #[must_use]
    pub fn alive(&self) -> usize {
        self.created().saturating_sub(self.disposed())
    }
}
