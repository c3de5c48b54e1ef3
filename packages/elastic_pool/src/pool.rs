use std::any::type_name;
use std::fmt;
use std::num::NonZero;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::{
    Backoff, CancellationToken, Completion, Counters, Element, ElasticPoolBuilder, Error, Factory,
    Lifecycle, LifecycleState, OperationGuard, PoolStats, Pooled, ReleaseProbe, Result, Slot,
    SlotArray,
};

/// Global counter for generating unique pool IDs.
static POOL_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

fn generate_pool_id() -> u64 {
    POOL_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// A thread-safe pool of reusable elements that can be grown and shrunk while in use.
///
/// Elements live in a fixed-length array of slots. [`acquire()`][Self::acquire] takes an element
/// out of a slot with a single atomic exchange and [`release()`][Self::release] puts it back with
/// a single compare-and-swap, so no lock is ever taken on the hot path. Resizes replace the slot
/// array with a new generation and notify in-flight operations through a per-generation change
/// barrier, so they never wait for outstanding acquisitions.
///
/// The pool is cheap to clone. All clones refer to the same pool.
///
/// # Example
///
/// ```rust
/// use std::num::NonZero;
///
/// use elastic_pool::{Element, ElasticPool};
///
/// #[derive(Debug)]
/// struct Connection {
///     healthy: bool,
/// }
///
/// impl Element for Connection {
///     fn validate(&self) -> bool {
///         self.healthy
///     }
///
///     fn dispose(&mut self) {}
/// }
///
/// let pool = ElasticPool::builder()
///     .capacity(NonZero::new(2).unwrap())
///     .factory(|| Connection { healthy: true })
///     .build()
///     .unwrap();
///
/// let connection = pool.acquire().unwrap();
/// assert!(connection.healthy);
/// pool.release(connection).unwrap();
///
/// pool.double().unwrap();
/// assert_eq!(pool.capacity(), 4);
///
/// pool.shutdown();
/// assert!(pool.acquire().is_none());
/// ```
///
/// # Resizing
///
/// Resizes are serialized by an internal lock, so they may be called from any thread. They never
/// wait for checked-out elements: a shrink that evicts a slot whose element is checked out simply
/// forgets the slot, and the element is disposed as surplus when it is released.
///
/// # Shutdown
///
/// [`shutdown()`][Self::shutdown] stops the pool from handing out elements, waits until every
/// acquire and release that was in flight has returned and then fires the
/// [`completion()`][Self::completion] signal. Elements still resident at that point stay in the
/// pool until the last clone of the pool is dropped, at which point they are disposed.
pub struct ElasticPool<E: Element> {
    inner: Arc<PoolInner<E>>,
}

struct PoolInner<E: Element> {
    /// Elements are tagged with this when acquired so we can detect them being released into
    /// the wrong pool.
    pool_id: u64,

    /// The current generation of slots. Replaced wholesale by resizes.
    slots: ArcSwap<SlotArray<E>>,

    acquire_cursor: AtomicUsize,
    release_cursor: AtomicUsize,
    release_probe: ReleaseProbe,
    spin_limit: u32,

    lifecycle: Lifecycle,
    counters: Counters,
    factory: Box<Factory<E>>,

    /// Held for the duration of every resize. Acquire and release never touch it.
    resize_lock: Mutex<()>,
}

impl<E: Element> ElasticPool<E> {
    /// Creates a builder for configuring and constructing an [`ElasticPool`].
    ///
    /// An element factory must be set on the builder before calling `.build()`.
    pub fn builder() -> ElasticPoolBuilder<E> {
        ElasticPoolBuilder::new()
    }

    pub(crate) fn new_inner(
        capacity: NonZero<usize>,
        factory: Box<Factory<E>>,
        cancellation: Option<CancellationToken>,
        release_probe: ReleaseProbe,
        spin_limit: u32,
    ) -> Result<Self> {
        let counters = Counters::new(capacity.get());
        let elements = create_batch(&*factory, &counters, capacity.get())?;

        let slots = elements.into_iter().map(Slot::occupied).collect();

        let inner = PoolInner {
            pool_id: generate_pool_id(),
            slots: ArcSwap::from_pointee(SlotArray::new(0, slots)),
            acquire_cursor: AtomicUsize::new(0),
            release_cursor: AtomicUsize::new(0),
            release_probe,
            spin_limit,
            lifecycle: Lifecycle::new(cancellation),
            counters,
            factory,
            resize_lock: Mutex::new(()),
        };

        debug!(
            pool_id = inner.pool_id,
            capacity = capacity.get(),
            "pool created"
        );

        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// Takes an element out of the pool.
    ///
    /// Spins (with backoff) until an element becomes available. Returns `None` only once the
    /// pool has started shutting down or its cancellation token has been cancelled, including
    /// when that happens while this call is waiting.
    ///
    /// There is no ordering guarantee between concurrent callers: a call that started earlier
    /// may be served later.
    #[must_use]
    pub fn acquire(&self) -> Option<Pooled<E>> {
        self.inner.acquire(AcquireMode::UntilCancelled)
    }

    /// Takes an element out of the pool if one is resident right now.
    ///
    /// Makes a single pass over the slots and returns `None` if it found nothing, or if the pool
    /// is cancelled.
    #[must_use]
    pub fn try_acquire(&self) -> Option<Pooled<E>> {
        self.inner.acquire(AcquireMode::SinglePass)
    }

    /// Returns an element to the pool.
    ///
    /// The element is validated first. An unhealthy element is disposed and replaced by a fresh
    /// one from the factory. If the pool has been cancelled, the element is disposed instead of
    /// being stored. If the pool holds more elements than it has slots (which happens after a
    /// shrink evicted slots whose elements were checked out), the element is disposed as
    /// surplus.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Factory`] if the element failed validation and the factory could not
    /// construct a replacement. The unhealthy element has been disposed in that case.
    ///
    /// # Panics
    ///
    /// Panics if the element was acquired from a different pool.
    pub fn release(&self, element: Pooled<E>) -> Result<()> {
        assert_eq!(
            element.pool_id(),
            self.inner.pool_id,
            "element released into a pool it was not acquired from"
        );

        self.inner.release(element.into_box())
    }

    /// Adds `additional` slots to the pool, each holding a freshly constructed element.
    ///
    /// Elements already in the pool keep their slots. In-flight acquires and releases are
    /// redirected to the new slots, they are never waited for.
    ///
    /// # Errors
    ///
    /// * [`Error::Factory`] if the factory fails. The pool is left unchanged.
    /// * [`Error::ShutDown`] if shutdown has started.
    /// * [`Error::CapacityOverflow`] if the new capacity does not fit in `usize`.
    pub fn grow_by(&self, additional: NonZero<usize>) -> Result<()> {
        self.inner.resize(|capacity| {
            capacity
                .checked_add(additional.get())
                .map(Resize::Grow)
                .ok_or(Error::CapacityOverflow)
        })
    }

    /// Doubles the capacity of the pool. Otherwise equivalent to [`grow_by()`][Self::grow_by].
    ///
    /// # Errors
    ///
    /// Same as [`grow_by()`][Self::grow_by].
    pub fn double(&self) -> Result<()> {
        self.inner.resize(|capacity| {
            capacity
                .checked_mul(2)
                .map(Resize::Grow)
                .ok_or(Error::CapacityOverflow)
        })
    }

    /// Removes the last `count` slots from the pool.
    ///
    /// Elements resident in the removed slots are disposed. Retained slots whose element is
    /// currently checked out are refilled with fresh elements so the pool starts out full at its
    /// new capacity.
    ///
    /// # Errors
    ///
    /// * [`Error::OutOfRange`] if `count` is zero or not less than the capacity. The pool is left
    ///   unchanged.
    /// * [`Error::ShutDown`] if shutdown has started.
    /// * [`Error::Factory`] if the factory fails while refilling. The shrink has still taken
    ///   effect, the slots that could not be refilled stay vacant until an element is released.
    pub fn shrink_by(&self, count: usize) -> Result<()> {
        self.inner.resize(|capacity| {
            if count == 0 || count >= capacity {
                return Err(Error::OutOfRange {
                    requested: count,
                    capacity,
                });
            }

            Ok(Resize::Shrink(capacity.saturating_sub(count)))
        })
    }

    /// Removes half of the slots (rounding the removed amount down), otherwise equivalent to
    /// [`shrink_by()`][Self::shrink_by].
    ///
    /// A pool with a single slot cannot be halved and is left unchanged.
    ///
    /// # Errors
    ///
    /// * [`Error::ShutDown`] if shutdown has started.
    /// * [`Error::Factory`] if the factory fails while refilling.
    pub fn shrink_to_half(&self) -> Result<()> {
        self.inner.resize(|capacity| {
            #[allow(
                clippy::integer_division,
                reason = "removing the rounded-down half is the documented behavior"
            )]
            let removed = capacity / 2;

            if removed == 0 {
                return Ok(Resize::Unchanged);
            }

            Ok(Resize::Shrink(capacity.saturating_sub(removed)))
        })
    }

    /// Shuts the pool down.
    ///
    /// Stops the pool from handing out elements, then blocks until every acquire and release
    /// that was in flight has returned. In-flight acquires return `None` and in-flight releases
    /// dispose their element. Once drained, the [`completion()`][Self::completion] signal fires.
    ///
    /// Calling this more than once is harmless. Every call blocks until the pool is closed.
    pub fn shutdown(&self) {
        self.inner.lifecycle.shutdown();
    }

    /// Returns a signal that fires once [`shutdown()`][Self::shutdown] has drained the pool.
    #[must_use]
    pub fn completion(&self) -> Completion {
        self.inner.lifecycle.completion()
    }

    /// Returns the current number of slots.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.inner.slots.load().capacity()
    }

    /// Returns the lifecycle phase of the pool.
    #[must_use]
    pub fn state(&self) -> LifecycleState {
        self.inner.lifecycle.state()
    }

    /// Whether the pool has stopped handing out elements, either because shutdown has started
    /// or because its cancellation token was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.lifecycle.is_cancelled()
    }

    /// Returns a snapshot of the pool's bookkeeping.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let slots = self.inner.slots.load();

        self.inner.counters.snapshot(
            slots.capacity(),
            slots.resident_count(),
            slots.epoch(),
            self.inner.lifecycle.state(),
        )
    }
}

impl<E: Element> Clone for ElasticPool<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E: Element> fmt::Debug for ElasticPool<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(type_name::<Self>())
            .field("pool_id", &self.inner.pool_id)
            .field("slots", &*self.inner.slots.load())
            .field("release_probe", &self.inner.release_probe)
            .field("lifecycle", &self.inner.lifecycle)
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum AcquireMode {
    UntilCancelled,
    SinglePass,
}

/// What a resize request resolves to once the current capacity is known.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Resize {
    Grow(usize),
    Shrink(usize),
    Unchanged,
}

impl<E: Element> PoolInner<E> {
    #[cfg_attr(test, mutants::skip)] // Mutated loop conditions spin forever.
    fn acquire(&self, mode: AcquireMode) -> Option<Pooled<E>> {
        let operation = self.lifecycle.begin();
        let mut backoff = Backoff::new(self.spin_limit);

        let mut slots = self.slots.load_full();
        let mut position = self.acquire_cursor.fetch_add(1, Ordering::Relaxed);
        let mut misses = 0_usize;

        loop {
            if operation.is_cancelled() {
                return None;
            }

            if slots.barrier().has_fired() {
                // A resize is replacing the generation we are looking at. Until it publishes the
                // next one, reloading gives us the same generation again, so pace ourselves.
                backoff.snooze();

                let reloaded = self.slots.load_full();
                if reloaded.epoch() != slots.epoch() {
                    backoff.reset();
                }

                slots = reloaded;
                position = self.acquire_cursor.fetch_add(1, Ordering::Relaxed);
                misses = 0;
                continue;
            }

            if let Some(element) = slots.slot_at(position).take() {
                if operation.is_cancelled() {
                    // Cancellation raced with our exchange. Nothing is handed out once the pool
                    // is cancelled, so treat the element like a release after cancellation.
                    self.dispose(element);
                    return None;
                }

                self.counters.record_acquisition();
                return Some(Pooled::new(element, self.pool_id));
            }

            position = position.wrapping_add(1);
            misses = misses.saturating_add(1);

            if misses >= slots.capacity() {
                if mode == AcquireMode::SinglePass {
                    return None;
                }

                misses = 0;
                backoff.snooze();
            }
        }
    }

    fn release(&self, mut element: Box<E>) -> Result<()> {
        let operation = self.lifecycle.begin();
        self.counters.record_release();

        if operation.is_cancelled() {
            self.dispose(element);
            return Ok(());
        }

        if !element.validate() {
            trace!(pool_id = self.pool_id, "element failed validation, replacing it");

            self.dispose(element);
            self.counters.record_replacement();
            element = self.create()?;
        }

        self.store(&operation, element);
        Ok(())
    }

    /// Puts the element into a vacant slot of the current generation, following the generation
    /// forward if a resize replaces it while we are working.
    #[cfg_attr(test, mutants::skip)] // Mutated loop conditions spin forever.
    fn store(&self, operation: &OperationGuard<'_>, mut element: Box<E>) {
        let mut backoff = Backoff::new(self.spin_limit);

        'generation: loop {
            let slots = self.slots.load_full();

            loop {
                let start = match self.release_probe {
                    ReleaseProbe::Rotating => self.release_cursor.fetch_add(1, Ordering::Relaxed),
                    ReleaseProbe::FromStart => 0,
                };

                for offset in 0..slots.capacity() {
                    if operation.is_cancelled() {
                        self.dispose(element);
                        return;
                    }

                    if slots.barrier().has_fired() {
                        backoff.snooze();
                        continue 'generation;
                    }

                    let slot = slots.slot_at(start.wrapping_add(offset));

                    match slot.try_put(element) {
                        Ok(()) => {
                            // If the barrier has not fired yet, any resize that replaces this
                            // generation will sweep our slot after this point and carry the
                            // element forward.
                            if !slots.barrier().has_fired() {
                                return;
                            }

                            // Otherwise the sweep may already have passed our slot. If the
                            // element is still there, take it back and try the next generation.
                            // If it is gone, the sweep (or an acquirer) owns it now.
                            match slot.take() {
                                Some(reclaimed) => {
                                    trace!(
                                        pool_id = self.pool_id,
                                        epoch = slots.epoch(),
                                        "reclaimed element from retired slot array"
                                    );

                                    element = reclaimed;
                                    continue 'generation;
                                }
                                None => return,
                            }
                        }
                        Err(rejected) => element = rejected,
                    }
                }

                // A full pass found no vacant slot. That is either contention, in which case we
                // retry, or the pool holds more elements than it has slots.
                if self.counters.try_retire_surplus() {
                    trace!(
                        pool_id = self.pool_id,
                        capacity = slots.capacity(),
                        "pool is over capacity, disposing surplus element"
                    );

                    element.dispose();
                    return;
                }

                backoff.snooze();
            }
        }
    }

    fn resize(&self, plan: impl FnOnce(usize) -> Result<Resize>) -> Result<()> {
        let _resizing = self.resize_lock.lock();

        if self.lifecycle.is_shutting_down() {
            return Err(Error::ShutDown);
        }

        let current = self.slots.load_full();

        match plan(current.capacity())? {
            Resize::Grow(capacity) => self.grow(&current, capacity),
            Resize::Shrink(capacity) => self.shrink(&current, capacity),
            Resize::Unchanged => {
                debug!(
                    pool_id = self.pool_id,
                    capacity = current.capacity(),
                    "pool cannot shrink below one slot, leaving it unchanged"
                );
                Ok(())
            }
        }
    }

    // The caller holds the resize lock.
    fn grow(&self, current: &SlotArray<E>, capacity: usize) -> Result<()> {
        let previous_capacity = current.capacity();
        let additional = capacity.saturating_sub(previous_capacity);

        // The new elements count as live before the new slots are published. Raise the ceiling
        // first so concurrent releases do not mistake them for surplus.
        self.counters.set_ceiling(capacity);

        let fresh = match create_batch(&*self.factory, &self.counters, additional) {
            Ok(fresh) => fresh,
            Err(error) => {
                self.counters.set_ceiling(previous_capacity);
                return Err(error);
            }
        };

        let fired = current.barrier().fire();
        debug_assert!(fired, "resizes are serialized so each generation is retired once");

        let slots = current
            .slots()
            .iter()
            .map(|slot| slot.take().map_or_else(Slot::empty, Slot::occupied))
            .chain(fresh.into_iter().map(Slot::occupied))
            .collect();

        let epoch = current.epoch().wrapping_add(1);
        self.slots.store(Arc::new(SlotArray::new(epoch, slots)));

        debug!(
            pool_id = self.pool_id,
            from = previous_capacity,
            to = capacity,
            epoch,
            "pool grown"
        );

        Ok(())
    }

    fn shrink(&self, current: &SlotArray<E>, capacity: usize) -> Result<()> {
        let previous_capacity = current.capacity();

        let fired = current.barrier().fire();
        debug_assert!(fired, "resizes are serialized so each generation is retired once");

        let retained = current
            .slots()
            .iter()
            .take(capacity)
            .map(Slot::take)
            .collect::<Vec<_>>();

        let mut evicted = 0_usize;

        for slot in current.slots().iter().skip(capacity) {
            if let Some(element) = slot.take() {
                self.dispose(element);
                evicted = evicted.saturating_add(1);
            }
        }

        let mut refill_error = None;
        let mut refilled = 0_usize;

        let slots = retained
            .into_iter()
            .map(|content| match content {
                Some(element) => Slot::occupied(element),
                None if refill_error.is_some() => Slot::empty(),
                None => match self.create() {
                    Ok(element) => {
                        refilled = refilled.saturating_add(1);
                        Slot::occupied(element)
                    }
                    Err(error) => {
                        refill_error = Some(error);
                        Slot::empty()
                    }
                },
            })
            .collect();

        let epoch = current.epoch().wrapping_add(1);
        self.slots.store(Arc::new(SlotArray::new(epoch, slots)));
        self.counters.set_ceiling(capacity);

        debug!(
            pool_id = self.pool_id,
            from = previous_capacity,
            to = capacity,
            evicted,
            refilled,
            epoch,
            "pool shrunk"
        );

        refill_error.map_or(Ok(()), Err)
    }

    fn create(&self) -> Result<Box<E>> {
        create_element(&*self.factory, &self.counters)
    }

    fn dispose(&self, mut element: Box<E>) {
        element.dispose();
        self.counters.record_disposed();
    }
}

fn create_element<E: Element>(factory: &Factory<E>, counters: &Counters) -> Result<Box<E>> {
    let element = factory().map_err(Error::Factory)?;
    counters.record_created();

    Ok(Box::new(element))
}

/// Creates `count` elements, disposing the ones already created if the factory fails partway.
fn create_batch<E: Element>(
    factory: &Factory<E>,
    counters: &Counters,
    count: usize,
) -> Result<Vec<Box<E>>> {
    let mut elements = Vec::with_capacity(count);

    for _ in 0..count {
        match create_element(factory, counters) {
            Ok(element) => elements.push(element),
            Err(error) => {
                for mut element in elements {
                    element.dispose();
                    counters.record_disposed();
                }

                return Err(error);
            }
        }
    }

    Ok(elements)
}
