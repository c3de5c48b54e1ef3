use std::any::type_name;
use std::fmt;
use std::num::NonZero;

use crate::{CancellationToken, Element, ElasticPool, Factory, FactoryError, Result};

/// Capacity of a pool whose builder was not given one.
pub const DEFAULT_CAPACITY: NonZero<usize> = NonZero::new(16).unwrap();

/// Spin rounds a retrying operation performs before it starts yielding its thread.
const DEFAULT_SPIN_LIMIT: u32 = 6;

/// Where a release starts looking for a vacant slot.
///
/// The choice only affects contention, never correctness: a release always scans the whole slot
/// array before concluding there is no vacant slot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ReleaseProbe {
    /// Every release starts one slot further than the previous release, spreading concurrent
    /// releases over the whole array.
    #[default]
    Rotating,

    /// Every release starts at slot 0. Under load this concentrates contention on the lowest
    /// slots but keeps resident elements packed at the front of the array.
    FromStart,
}

/// Builder for configuring an [`ElasticPool`].
///
/// Obtain one via [`ElasticPool::builder()`]. A factory is mandatory, everything else has a
/// default.
///
/// # Example
///
/// ```rust
/// use std::num::NonZero;
///
/// use elastic_pool::{CancellationToken, Element, ElasticPool, ReleaseProbe};
///
/// struct Buffer(Vec<u8>);
///
/// impl Element for Buffer {
///     fn validate(&self) -> bool {
///         self.0.capacity() >= 1024
///     }
///
///     fn dispose(&mut self) {}
/// }
///
/// let token = CancellationToken::new();
///
/// let pool = ElasticPool::builder()
///     .capacity(NonZero::new(8).unwrap())
///     .factory(|| Buffer(Vec::with_capacity(1024)))
///     .cancellation(token.clone())
///     .release_probe(ReleaseProbe::FromStart)
///     .build()
///     .unwrap();
///
/// assert_eq!(pool.capacity(), 8);
/// ```
#[must_use]
pub struct ElasticPoolBuilder<E: Element> {
    capacity: NonZero<usize>,
    factory: Option<Box<Factory<E>>>,
    cancellation: Option<CancellationToken>,
    release_probe: ReleaseProbe,
    spin_limit: u32,
}

impl<E: Element> ElasticPoolBuilder<E> {
    pub(crate) fn new() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            factory: None,
            cancellation: None,
            release_probe: ReleaseProbe::default(),
            spin_limit: DEFAULT_SPIN_LIMIT,
        }
    }

    /// Sets the initial number of slots. Every slot is filled with a fresh element when the pool
    /// is built.
    ///
    /// Default is [`DEFAULT_CAPACITY`].
    pub fn capacity(mut self, capacity: NonZero<usize>) -> Self {
        self.capacity = capacity;
        self
    }

    /// Sets an infallible factory used to construct elements.
    pub fn factory<F>(self, factory: F) -> Self
    where
        F: Fn() -> E + Send + Sync + 'static,
    {
        self.try_factory(move || Ok(factory()))
    }

    /// Sets a fallible factory used to construct elements.
    ///
    /// Factory failures are reported as [`Error::Factory`][crate::Error::Factory] by whichever
    /// operation needed the new element.
    pub fn try_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> std::result::Result<E, FactoryError> + Send + Sync + 'static,
    {
        self.factory = Some(Box::new(factory));
        self
    }

    /// Links the pool to a parent cancellation source.
    ///
    /// Cancelling the token stops the pool from handing out elements, just like
    /// [`ElasticPool::shutdown()`] does, without waiting for in-flight operations.
    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Sets where releases start scanning for a vacant slot.
    ///
    /// Default is [`ReleaseProbe::Rotating`].
    pub fn release_probe(mut self, probe: ReleaseProbe) -> Self {
        self.release_probe = probe;
        self
    }

    /// Sets how many exponentially growing spin rounds a contended operation performs before it
    /// starts yielding its thread between retries. Zero means yield from the first retry.
    ///
    /// Default is 6.
    pub fn spin_limit(mut self, rounds: u32) -> Self {
        self.spin_limit = rounds;
        self
    }

    /// Builds the pool, constructing one element per slot.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Factory`][crate::Error::Factory] if the factory fails. Elements already
    /// constructed for the pool are disposed before returning.
    ///
    /// # Panics
    ///
    /// Panics if no factory was set via [`factory()`][Self::factory] or
    /// [`try_factory()`][Self::try_factory].
    pub fn build(self) -> Result<ElasticPool<E>> {
        let factory = self
            .factory
            .expect("an element factory must be set before building an ElasticPool");

        ElasticPool::new_inner(
            self.capacity,
            factory,
            self.cancellation,
            self.release_probe,
            self.spin_limit,
        )
    }
}

impl<E: Element> fmt::Debug for ElasticPoolBuilder<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(type_name::<Self>())
            .field("capacity", &self.capacity)
            .field("has_factory", &self.factory.is_some())
            .field("cancellation", &self.cancellation)
            .field("release_probe", &self.release_probe)
            .field("spin_limit", &self.spin_limit)
            .finish()
    }
}
