use std::error::Error as StdError;

/// The error type returned by a fallible element factory.
pub type FactoryError = Box<dyn StdError + Send + Sync + 'static>;

/// Constructs fresh elements on behalf of the pool.
pub(crate) type Factory<E> = dyn Fn() -> Result<E, FactoryError> + Send + Sync;

/// An object that can be stored in an [`ElasticPool`][crate::ElasticPool].
///
/// The pool calls [`validate()`][Self::validate] whenever an element is released back into the
/// pool. An element that reports itself unhealthy is disposed via [`dispose()`][Self::dispose]
/// and the pool constructs a fresh replacement with its factory.
///
/// Elements are also disposed when they are evicted by a shrink, when they are released after
/// the pool has been cancelled and when the last handle to the pool is dropped while they are
/// still resident in it.
///
/// # Example
///
/// ```rust
/// use elastic_pool::Element;
///
/// struct Connection {
///     open: bool,
/// }
///
/// impl Element for Connection {
///     fn validate(&self) -> bool {
///         self.open
///     }
///
///     fn dispose(&mut self) {
///         self.open = false;
///     }
/// }
/// ```
pub trait Element: Send + 'static {
    /// Returns `true` if the element is healthy and may be handed out again.
    fn validate(&self) -> bool;

    /// Releases any resources held by the element.
    ///
    /// The pool calls this at most once per element and drops the element right after.
    fn dispose(&mut self);
}
