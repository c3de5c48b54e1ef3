use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crate::LifecycleState;

/// A point-in-time snapshot of pool bookkeeping, returned by
/// [`ElasticPool::stats()`][crate::ElasticPool::stats].
///
/// The fields are read one by one while other threads keep operating on the pool, so the
/// snapshot is only exactly consistent when the pool is quiescent.
#[derive(Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub struct PoolStats {
    /// Number of slots in the pool.
    pub capacity: usize,

    /// Number of elements currently resident in a slot (available for acquisition).
    pub resident: usize,

    /// Number of elements that exist and belong to the pool, whether resident or checked out.
    pub live: usize,

    /// How many times the pool has been resized since it was created.
    pub epoch: u64,

    /// Total elements constructed by the factory.
    pub created: u64,

    /// Total elements disposed by the pool.
    pub disposed: u64,

    /// Total successful acquisitions.
    pub acquisitions: u64,

    /// Total releases, including ones that ended in disposal.
    pub releases: u64,

    /// Total elements replaced because they failed validation on release.
    pub replacements: u64,

    /// Lifecycle phase of the pool.
    pub state: LifecycleState,
}

/// Counters updated by pool operations.
///
/// The statistics use relaxed ordering. `live` and `ceiling` decide whether a release disposes
/// its element as surplus, so they use sequentially consistent ordering.
#[derive(Debug)]
pub(crate) struct Counters {
    live: AtomicUsize,

    /// Most elements the pool may hold. Equals the capacity, except while a grow is constructing
    /// elements for slots that are not yet published.
    ceiling: AtomicUsize,

    created: AtomicU64,
    disposed: AtomicU64,
    acquisitions: AtomicU64,
    releases: AtomicU64,
    replacements: AtomicU64,
}

impl Counters {
    pub(crate) fn new(ceiling: usize) -> Self {
        Self {
            live: AtomicUsize::new(0),
            ceiling: AtomicUsize::new(ceiling),
            created: AtomicU64::new(0),
            disposed: AtomicU64::new(0),
            acquisitions: AtomicU64::new(0),
            releases: AtomicU64::new(0),
            replacements: AtomicU64::new(0),
        }
    }

    pub(crate) fn set_ceiling(&self, ceiling: usize) {
        self.ceiling.store(ceiling, Ordering::SeqCst);
    }

    pub(crate) fn record_created(&self) {
        self.live.fetch_add(1, Ordering::SeqCst);
        self.created.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_disposed(&self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
        self.disposed.fetch_add(1, Ordering::Relaxed);
    }

    /// Claims one element's worth of surplus if the pool holds more live elements than it has
    /// slots. Returns `true` if the caller now has to dispose one element.
    pub(crate) fn try_retire_surplus(&self) -> bool {
        let retired = self
            .live
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |live| {
                (live > self.ceiling.load(Ordering::SeqCst)).then(|| live.saturating_sub(1))
            })
            .is_ok();

        if retired {
            self.disposed.fetch_add(1, Ordering::Relaxed);
        }

        retired
    }

    pub(crate) fn record_acquisition(&self) {
        self.acquisitions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_release(&self) {
        self.releases.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_replacement(&self) {
        self.replacements.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(
        &self,
        capacity: usize,
        resident: usize,
        epoch: u64,
        state: LifecycleState,
    ) -> PoolStats {
        PoolStats {
            capacity,
            resident,
            live: self.live.load(Ordering::SeqCst),
            epoch,
            created: self.created.load(Ordering::Relaxed),
            disposed: self.disposed.load(Ordering::Relaxed),
            acquisitions: self.acquisitions.load(Ordering::Relaxed),
            releases: self.releases.load(Ordering::Relaxed),
            replacements: self.replacements.load(Ordering::Relaxed),
            state,
        }
    }
}
