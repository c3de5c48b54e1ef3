use thiserror::Error;

use crate::FactoryError;

/// Errors that can occur when constructing or resizing an [`ElasticPool`][crate::ElasticPool].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The caller asked to shrink the pool by an amount that would leave it with no slots,
    /// or by zero. Shrinking requires `0 < requested < capacity`.
    #[error("cannot shrink pool by {requested}: the amount must be in 1..{capacity}")]
    OutOfRange {
        /// The number of slots the caller asked to remove.
        requested: usize,

        /// The capacity of the pool at the time of the request.
        capacity: usize,
    },

    /// The element factory failed to construct a new element.
    #[error("element factory failed: {0}")]
    Factory(#[source] FactoryError),

    /// The pool has started shutting down and no longer accepts structural changes.
    #[error("pool is shutting down")]
    ShutDown,

    /// Growing the pool by the requested amount would overflow the capacity counter.
    #[error("pool capacity overflow")]
    CapacityOverflow,
}

/// A specialized `Result` type for pool operations, returning the crate's
/// [`Error`] type as the error value.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::fmt::Debug;
    use std::io;

    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(Error: Send, Sync, Debug);

    #[test]
    fn out_of_range_names_bounds() {
        let error = Error::OutOfRange {
            requested: 5,
            capacity: 4,
        };

        assert_eq!(
            error.to_string(),
            "cannot shrink pool by 5: the amount must be in 1..4"
        );
    }

    #[test]
    fn factory_error_exposes_source() {
        let error = Error::Factory(Box::new(io::Error::other("connection refused")));

        let source = std::error::Error::source(&error).expect("factory error carries a source");
        assert_eq!(source.to_string(), "connection refused");
    }
}
