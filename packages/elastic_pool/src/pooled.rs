use std::fmt;
use std::ops::{Deref, DerefMut};

/// An element checked out of an [`ElasticPool`][crate::ElasticPool].
///
/// While a caller holds a `Pooled<E>`, the element is owned exclusively by that caller and the
/// pool has no access to it. Return it with [`ElasticPool::release()`][crate::ElasticPool::release]
/// so other callers can reuse it.
///
/// The handle keeps the element in the same heap allocation it occupied inside the pool, so a
/// release puts that allocation back into a slot and a steady acquire/release cycle does not
/// allocate.
///
/// Dropping the handle instead of releasing it drops the element without disposing it. The pool
/// keeps counting the element as checked out, so its slot stays vacant until something else is
/// released into it.
pub struct Pooled<E> {
    element: Box<E>,

    /// Identifies the pool the element was acquired from. Releasing into a different pool is a
    /// programming error.
    pool_id: u64,
}

impl<E> Pooled<E> {
    pub(crate) fn new(element: Box<E>, pool_id: u64) -> Self {
        Self { element, pool_id }
    }

    pub(crate) fn pool_id(&self) -> u64 {
        self.pool_id
    }

    pub(crate) fn into_box(self) -> Box<E> {
        self.element
    }
}

impl<E> Deref for Pooled<E> {
    type Target = E;

    fn deref(&self) -> &Self::Target {
        &self.element
    }
}

impl<E> DerefMut for Pooled<E> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.element
    }
}

impl<E: fmt::Debug> fmt::Debug for Pooled<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pooled")
            .field("element", &self.element)
            .field("pool_id", &self.pool_id)
            .finish()
    }
}
