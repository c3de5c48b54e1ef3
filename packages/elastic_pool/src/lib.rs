#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! A thread-safe pool of reusable elements whose capacity can change while it is in use.
//!
//! This crate provides [`ElasticPool`], a fixed-size array of slots that each hold at most one
//! element. Threads acquire elements with an atomic exchange and release them with a
//! compare-and-swap, so the hot path never takes a lock. The pool can be grown and shrunk at any
//! time without waiting for elements that are checked out.
//!
//! # Quick start
//!
//! ```rust
//! use std::num::NonZero;
//!
//! use elastic_pool::{Element, ElasticPool};
//!
//! struct Scratch(Vec<u8>);
//!
//! impl Element for Scratch {
//!     fn validate(&self) -> bool {
//!         self.0.len() <= 4096
//!     }
//!
//!     fn dispose(&mut self) {
//!         self.0.clear();
//!     }
//! }
//!
//! let pool = ElasticPool::builder()
//!     .capacity(NonZero::new(4).unwrap())
//!     .factory(|| Scratch(Vec::new()))
//!     .build()
//!     .unwrap();
//!
//! let mut scratch = pool.acquire().unwrap();
//! scratch.0.extend_from_slice(b"hello");
//! pool.release(scratch).unwrap();
//!
//! pool.double().unwrap();
//! pool.shrink_by(6).unwrap();
//! assert_eq!(pool.capacity(), 2);
//!
//! pool.shutdown();
//! assert!(pool.completion().is_complete());
//! ```
//!
//! # Key features
//!
//! - **Lock-free hot path**: Acquire and release never block on a lock. A caller that finds the
//!   pool momentarily empty (or full) spins with exponential backoff and then yields.
//! - **Elastic capacity**: [`ElasticPool::grow_by()`], [`ElasticPool::double()`],
//!   [`ElasticPool::shrink_by()`] and [`ElasticPool::shrink_to_half()`] resize the pool while it is
//!   in use. In-flight operations are redirected to the new slots instead of being waited for.
//! - **Health checks**: Released elements are validated and unhealthy ones are replaced with
//!   fresh elements from the factory.
//! - **Graceful shutdown**: [`ElasticPool::shutdown()`] drains in-flight operations and fires a
//!   [`Completion`] signal. A shared [`CancellationToken`] can stop a group of pools at once.
//!
//! # Element ownership
//!
//! Every element is owned by exactly one party at a time: a slot or the caller holding the
//! [`Pooled`] handle. An element is never handed to two callers at once and is never lost by a
//! resize, even one that races with an in-flight release.

mod backoff;
mod barrier;
mod builder;
mod element;
mod error;
mod lifecycle;
mod pool;
mod pooled;
mod slot;
mod stats;

pub(crate) use backoff::Backoff;
pub(crate) use barrier::ChangeBarrier;
pub use builder::{DEFAULT_CAPACITY, ElasticPoolBuilder, ReleaseProbe};
pub(crate) use element::Factory;
pub use element::{Element, FactoryError};
pub use error::{Error, Result};
pub(crate) use lifecycle::{Lifecycle, OperationGuard};
pub use lifecycle::{CancellationToken, Completion, LifecycleState};
pub use pool::ElasticPool;
pub use pooled::Pooled;
pub(crate) use slot::{Slot, SlotArray};
pub(crate) use stats::Counters;
pub use stats::PoolStats;
