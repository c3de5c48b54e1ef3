use std::any::type_name;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::time::Duration;

use rsevents::{Awaitable, EventState, ManualResetEvent};
use tracing::debug;

const RUNNING: u8 = 0;
const DRAINING: u8 = 1;
const CLOSED: u8 = 2;

/// The phase of life an [`ElasticPool`][crate::ElasticPool] is in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum LifecycleState {
    /// The pool hands out and takes back elements.
    Running,

    /// Shutdown has been requested and the pool is waiting for in-flight operations to finish.
    /// New operations return immediately without touching any element.
    Draining,

    /// Every operation that was in flight when shutdown was requested has finished.
    Closed,
}

impl LifecycleState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            RUNNING => Self::Running,
            DRAINING => Self::Draining,
            _ => Self::Closed,
        }
    }
}

/// A cancellation source that can be shared between one or more pools and their owner.
///
/// Cancelling the token makes every pool built with it behave as if shutdown had started:
/// acquire calls return `None` and released elements are disposed. The pools still need to be
/// shut down to drain in-flight operations and fire their completion signal.
///
/// # Example
///
/// ```rust
/// use elastic_pool::CancellationToken;
///
/// let token = CancellationToken::new();
/// let observer = token.clone();
///
/// token.cancel();
/// assert!(observer.is_cancelled());
/// ```
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Creates a token that has not been cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancels the token. Cancellation cannot be undone.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Whether [`cancel()`][Self::cancel] has been called on this token or any of its clones.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Fires once a pool has finished shutting down.
///
/// Obtained from [`ElasticPool::completion()`][crate::ElasticPool::completion]. Any number of
/// clones may wait on the same signal.
#[derive(Clone)]
pub struct Completion {
    event: Arc<ManualResetEvent>,
}

impl Completion {
    fn new() -> Self {
        Self {
            event: Arc::new(ManualResetEvent::new(EventState::Unset)),
        }
    }

    fn fire(&self) {
        self.event.set();
    }

    /// Blocks the current thread until the pool has shut down.
    pub fn wait(&self) {
        self.event.wait();
    }

    /// Blocks until the pool has shut down or `timeout` elapses, whichever happens first.
    ///
    /// Returns `true` if the pool has shut down.
    #[must_use]
    pub fn wait_for(&self, timeout: Duration) -> bool {
        self.event.wait_for(timeout)
    }

    /// Whether the pool has shut down, without blocking.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.event.wait_for(Duration::ZERO)
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(type_name::<Self>())
            .field("is_complete", &self.is_complete())
            .finish()
    }
}

/// Tracks outstanding operations and coordinates the drain that precedes shutdown.
///
/// Every acquire and release registers itself via [`begin()`][Self::begin] and stays registered
/// until the returned guard is dropped. Shutdown flips the state to draining, which every
/// registered operation observes on its next retry iteration, and then blocks until the count of
/// outstanding operations reaches zero.
pub(crate) struct Lifecycle {
    state: AtomicU8,
    parent: Option<CancellationToken>,
    outstanding: AtomicUsize,

    /// Set by whoever observes "draining and no outstanding operations" first.
    drained: ManualResetEvent,

    completion: Completion,
}

impl fmt::Debug for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(type_name::<Self>())
            .field("state", &self.state())
            .field("parent", &self.parent)
            .field("outstanding", &self.outstanding())
            .field("completion", &self.completion)
            .finish_non_exhaustive()
    }
}

impl Lifecycle {
    pub(crate) fn new(parent: Option<CancellationToken>) -> Self {
        Self {
            state: AtomicU8::new(RUNNING),
            parent,
            outstanding: AtomicUsize::new(0),
            drained: ManualResetEvent::new(EventState::Unset),
            completion: Completion::new(),
        }
    }

    pub(crate) fn state(&self) -> LifecycleState {
        LifecycleState::from_raw(self.state.load(Ordering::SeqCst))
    }

    /// Whether operations must stop touching elements, either because shutdown has started or
    /// because the parent cancellation token was cancelled.
    pub(crate) fn is_cancelled(&self) -> bool {
        self.state.load(Ordering::SeqCst) != RUNNING
            || self
                .parent
                .as_ref()
                .is_some_and(CancellationToken::is_cancelled)
    }

    pub(crate) fn is_shutting_down(&self) -> bool {
        self.state.load(Ordering::SeqCst) != RUNNING
    }

    pub(crate) fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }

    /// Registers an outstanding operation for as long as the returned guard lives.
    pub(crate) fn begin(&self) -> OperationGuard<'_> {
        self.outstanding.fetch_add(1, Ordering::SeqCst);

        OperationGuard { lifecycle: self }
    }

    fn finish(&self) {
        let previous = self.outstanding.fetch_sub(1, Ordering::SeqCst);

        // Either we see the draining state here or the shutdown caller sees our decrement when
        // it checks the counter after changing the state. Both may set the event, which is fine.
        if previous == 1 && self.is_shutting_down() {
            self.drained.set();
        }
    }

    /// Moves the lifecycle to draining, waits for every outstanding operation to finish and
    /// then fires the completion signal.
    ///
    /// Only the first call performs the transition. Later calls (including concurrent ones)
    /// block until the first one has finished, so every caller returns with the pool closed.
    pub(crate) fn shutdown(&self) {
        if self
            .state
            .compare_exchange(RUNNING, DRAINING, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            self.completion.wait();
            return;
        }

        let outstanding = self.outstanding();
        debug!(outstanding, "pool draining");

        if outstanding == 0 {
            self.drained.set();
        }

        self.drained.wait();

        self.state.store(CLOSED, Ordering::SeqCst);
        self.completion.fire();

        debug!("pool closed");
    }

    pub(crate) fn completion(&self) -> Completion {
        self.completion.clone()
    }
}

/// Deregisters an outstanding operation when dropped, including when the operation unwinds.
#[derive(Debug)]
pub(crate) struct OperationGuard<'a> {
    lifecycle: &'a Lifecycle,
}

impl OperationGuard<'_> {
    pub(crate) fn is_cancelled(&self) -> bool {
        self.lifecycle.is_cancelled()
    }
}

impl Drop for OperationGuard<'_> {
    fn drop(&mut self) {
        self.lifecycle.finish();
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::thread;

    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(Lifecycle: Send, Sync);
    assert_impl_all!(Completion: Send, Sync, Clone);
    assert_impl_all!(CancellationToken: Send, Sync, Clone);

    #[test]
    fn starts_running() {
        let lifecycle = Lifecycle::new(None);

        assert_eq!(lifecycle.state(), LifecycleState::Running);
        assert!(!lifecycle.is_cancelled());
        assert!(!lifecycle.completion().is_complete());
    }

    #[test]
    fn guard_tracks_outstanding_operations() {
        let lifecycle = Lifecycle::new(None);

        let first = lifecycle.begin();
        let second = lifecycle.begin();
        assert_eq!(lifecycle.outstanding(), 2);

        drop(first);
        assert_eq!(lifecycle.outstanding(), 1);

        drop(second);
        assert_eq!(lifecycle.outstanding(), 0);
    }

    #[test]
    fn shutdown_without_operations_closes_immediately() {
        let lifecycle = Lifecycle::new(None);

        lifecycle.shutdown();

        assert_eq!(lifecycle.state(), LifecycleState::Closed);
        assert!(lifecycle.is_cancelled());
        assert!(lifecycle.completion().is_complete());
    }

    #[test]
    fn shutdown_is_idempotent() {
        let lifecycle = Lifecycle::new(None);

        lifecycle.shutdown();
        lifecycle.shutdown();

        assert_eq!(lifecycle.state(), LifecycleState::Closed);
    }

    #[test]
    fn parent_cancellation_cancels_without_closing() {
        let token = CancellationToken::new();
        let lifecycle = Lifecycle::new(Some(token.clone()));

        token.cancel();

        assert!(lifecycle.is_cancelled());
        assert_eq!(lifecycle.state(), LifecycleState::Running);
        assert!(!lifecycle.completion().is_complete());
    }

    #[cfg_attr(miri, ignore)] // Slow under Miri.
    #[test]
    fn shutdown_waits_for_outstanding_operation() {
        testing::with_watchdog(|| {
            let lifecycle = Arc::new(Lifecycle::new(None));
            let started = Arc::new(ManualResetEvent::new(EventState::Unset));

            let worker = thread::spawn({
                let lifecycle = Arc::clone(&lifecycle);
                let started = Arc::clone(&started);

                move || {
                    let guard = lifecycle.begin();
                    started.set();

                    while !guard.is_cancelled() {
                        thread::yield_now();
                    }

                    // The pool must not be closed while we are still registered.
                    assert_eq!(lifecycle.state(), LifecycleState::Draining);
                }
            });

            started.wait();
            lifecycle.shutdown();

            assert_eq!(lifecycle.state(), LifecycleState::Closed);
            assert_eq!(lifecycle.outstanding(), 0);

            worker.join().unwrap();
        });
    }

    #[cfg_attr(miri, ignore)] // Slow under Miri.
    #[test]
    fn concurrent_shutdown_callers_all_return_closed() {
        testing::with_watchdog(|| {
            let lifecycle = Arc::new(Lifecycle::new(None));
            let guard_holder = lifecycle.begin();

            let callers = (0..3)
                .map(|_| {
                    let lifecycle = Arc::clone(&lifecycle);
                    thread::spawn(move || {
                        lifecycle.shutdown();
                        lifecycle.state()
                    })
                })
                .collect::<Vec<_>>();

            while !lifecycle.is_shutting_down() {
                thread::yield_now();
            }

            drop(guard_holder);

            for caller in callers {
                assert_eq!(caller.join().unwrap(), LifecycleState::Closed);
            }
        });
    }
}
