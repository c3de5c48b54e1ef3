use std::fmt;
use std::marker::PhantomData;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicPtr, Ordering};

use crate::{ChangeBarrier, Element};

/// An ownership cell that holds either nothing or exactly one boxed element.
///
/// The cell is only ever mutated by atomic exchange (to take the element out) and by
/// compare-and-swap from empty (to put an element in), so ownership of an element is always
/// held by exactly one party: the cell or whoever took the element out of it.
pub(crate) struct Slot<E> {
    element: AtomicPtr<E>,

    _owns: PhantomData<Box<E>>,
}

// SAFETY: The slot owns its element and hands it out only by value, so sharing a slot between
// threads moves elements between threads but never shares an element. That requires `E: Send`
// and nothing more, the same contract as `Mutex<T>`.
unsafe impl<E: Send> Sync for Slot<E> {}

impl<E> Slot<E> {
    pub(crate) const fn empty() -> Self {
        Self {
            element: AtomicPtr::new(ptr::null_mut()),
            _owns: PhantomData,
        }
    }

    pub(crate) fn occupied(element: Box<E>) -> Self {
        Self {
            element: AtomicPtr::new(Box::into_raw(element)),
            _owns: PhantomData,
        }
    }

    /// Takes the element out of the slot, leaving it empty.
    pub(crate) fn take(&self) -> Option<Box<E>> {
        let previous = self.element.swap(ptr::null_mut(), Ordering::SeqCst);

        NonNull::new(previous).map(|element| {
            // SAFETY: Every non-null pointer stored in the slot came from `Box::into_raw` and the
            // swap above transferred its ownership to us, no other party can observe it anymore.
            unsafe { Box::from_raw(element.as_ptr()) }
        })
    }

    /// Stores the element if the slot is empty, otherwise gives it back to the caller.
    pub(crate) fn try_put(&self, element: Box<E>) -> Result<(), Box<E>> {
        let raw = Box::into_raw(element);

        match self.element.compare_exchange(
            ptr::null_mut(),
            raw,
            Ordering::SeqCst,
            Ordering::SeqCst,
        ) {
            Ok(_) => Ok(()),
            Err(_) => {
                // SAFETY: The exchange failed so the slot never took ownership of `raw`,
                // which we created from a box just above.
                Err(unsafe { Box::from_raw(raw) })
            }
        }
    }

    pub(crate) fn is_occupied(&self) -> bool {
        !self.element.load(Ordering::SeqCst).is_null()
    }
}

impl<E> fmt::Debug for Slot<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Slot")
            .field("occupied", &self.is_occupied())
            .finish()
    }
}

impl<E> Drop for Slot<E> {
    fn drop(&mut self) {
        drop(self.take());
    }
}

/// One generation of the pool's storage: a fixed-length run of slots plus the change barrier
/// that is fired when this generation is about to be replaced by a resize.
///
/// The pool publishes generations through an `ArcSwap`, so the slots, the capacity (their
/// count) and the barrier are always observed together.
pub(crate) struct SlotArray<E: Element> {
    slots: Box<[Slot<E>]>,
    barrier: ChangeBarrier,
}

impl<E: Element> SlotArray<E> {
    /// # Panics
    ///
    /// Panics if `slots` is empty. A pool always has at least one slot.
    pub(crate) fn new(epoch: u64, slots: Vec<Slot<E>>) -> Self {
        assert!(!slots.is_empty(), "a slot array must have at least one slot");

        Self {
            slots: slots.into_boxed_slice(),
            barrier: ChangeBarrier::new(epoch),
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn epoch(&self) -> u64 {
        self.barrier.epoch()
    }

    pub(crate) fn barrier(&self) -> &ChangeBarrier {
        &self.barrier
    }

    /// Returns the slot at `position`, wrapping around the end of the array.
    pub(crate) fn slot_at(&self, position: usize) -> &Slot<E> {
        #[allow(
            clippy::arithmetic_side_effects,
            reason = "the array is never empty so the remainder cannot divide by zero"
        )]
        let index = position % self.slots.len();

        self.slots
            .get(index)
            .expect("index was reduced modulo the slot count so it is always in bounds")
    }

    pub(crate) fn slots(&self) -> &[Slot<E>] {
        &self.slots
    }

    pub(crate) fn resident_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_occupied()).count()
    }
}

impl<E: Element> fmt::Debug for SlotArray<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlotArray")
            .field("epoch", &self.epoch())
            .field("capacity", &self.capacity())
            .field("resident", &self.resident_count())
            .field("barrier_fired", &self.barrier.has_fired())
            .finish()
    }
}

impl<E: Element> Drop for SlotArray<E> {
    fn drop(&mut self) {
        // A generation is only dropped once nobody can reach it anymore. Resizes sweep every
        // element out of a generation before retiring it, so anything still here belongs to a
        // pool that is going away and has to be disposed like any other evicted element.
        for slot in &self.slots {
            if let Some(mut element) = slot.take() {
                element.dispose();
            }
        }
    }
}
