//! Integration tests for the single-threaded behavior of `elastic_pool`.
//!
//! These tests exercise the public API only: element identity, validation and replacement,
//! resize accounting, cancellation and shutdown.

use std::collections::HashSet;
use std::io;
use std::num::NonZero;

use elastic_pool::{
    CancellationToken, Element, ElasticPool, Error, FactoryError, LifecycleState, Pooled,
};
use testing::LifeCounters;

#[derive(Debug)]
struct Tracked {
    id: usize,
    counters: LifeCounters,
    disposed: bool,
}

impl Element for Tracked {
    fn validate(&self) -> bool {
        self.counters.record_validated()
    }

    fn dispose(&mut self) {
        assert!(!self.disposed, "element {} disposed twice", self.id);
        self.disposed = true;
        self.counters.record_disposed();
    }
}

fn tracked_pool(capacity: usize, counters: &LifeCounters) -> ElasticPool<Tracked> {
    let counters = counters.clone();

    ElasticPool::builder()
        .capacity(NonZero::new(capacity).unwrap())
        .factory(move || Tracked {
            id: counters.next_id(),
            counters: counters.clone(),
            disposed: false,
        })
        .build()
        .unwrap()
}

fn acquire_all(pool: &ElasticPool<Tracked>) -> Vec<Pooled<Tracked>> {
    let mut held = Vec::new();

    while let Some(element) = pool.try_acquire() {
        held.push(element);
    }

    held
}

fn ids(elements: &[Pooled<Tracked>]) -> HashSet<usize> {
    elements.iter().map(|element| element.id).collect()
}

fn release_all(pool: &ElasticPool<Tracked>, elements: Vec<Pooled<Tracked>>) {
    for element in elements {
        pool.release(element).unwrap();
    }
}

#[test]
fn capacity_four_scenario() {
    let counters = LifeCounters::new();
    let pool = tracked_pool(4, &counters);

    let first_round = acquire_all(&pool);
    assert_eq!(ids(&first_round), HashSet::from([0, 1, 2, 3]));
    release_all(&pool, first_round);

    let second_round = acquire_all(&pool);
    assert_eq!(ids(&second_round), HashSet::from([0, 1, 2, 3]));
    release_all(&pool, second_round);

    assert!(matches!(
        pool.shrink_by(5),
        Err(Error::OutOfRange {
            requested: 5,
            capacity: 4
        })
    ));
    assert_eq!(pool.capacity(), 4);

    pool.shrink_by(2).unwrap();
    assert_eq!(pool.capacity(), 2);

    let remaining = acquire_all(&pool);
    assert_eq!(remaining.len(), 2);
    release_all(&pool, remaining);

    // The two evicted elements were disposed, nothing was created to replace them.
    assert_eq!(counters.created(), 4);
    assert_eq!(counters.disposed(), 2);
}

#[test]
fn released_element_becomes_acquirable_again() {
    let counters = LifeCounters::new();
    let pool = tracked_pool(3, &counters);

    let element = pool.acquire().unwrap();
    let id = element.id;
    pool.release(element).unwrap();

    let held = acquire_all(&pool);
    assert!(ids(&held).contains(&id));
    release_all(&pool, held);

    assert_eq!(counters.created(), 3);
}

#[test]
fn unhealthy_element_is_replaced_with_fresh_one() {
    let counters = LifeCounters::new();
    let pool = tracked_pool(2, &counters);

    let element = pool.acquire().unwrap();
    let unhealthy_id = element.id;

    counters.set_fail_validation(true);
    pool.release(element).unwrap();
    counters.set_fail_validation(false);

    assert_eq!(counters.disposed(), 1);
    assert_eq!(counters.created(), 3);

    let held = acquire_all(&pool);
    let held_ids = ids(&held);
    assert!(!held_ids.contains(&unhealthy_id));
    assert!(held_ids.contains(&2));
    release_all(&pool, held);

    let stats = pool.stats();
    assert_eq!(stats.replacements, 1);
    assert_eq!(stats.live, 2);
}

#[test]
fn failed_replacement_is_reported() {
    let counters = LifeCounters::new();

    let pool = ElasticPool::builder()
        .capacity(NonZero::new(1).unwrap())
        .try_factory({
            let counters = counters.clone();
            move || -> Result<Tracked, FactoryError> {
                if counters.created() >= 1 {
                    return Err(Box::new(io::Error::other("backend unavailable")));
                }

                Ok(Tracked {
                    id: counters.next_id(),
                    counters: counters.clone(),
                    disposed: false,
                })
            }
        })
        .build()
        .unwrap();

    let element = pool.acquire().unwrap();

    counters.set_fail_validation(true);
    assert!(matches!(pool.release(element), Err(Error::Factory(_))));

    // The unhealthy element was still disposed, and the slot stays vacant.
    assert_eq!(counters.disposed(), 1);
    assert!(pool.try_acquire().is_none());
}

#[test]
fn grow_adds_fresh_elements_and_keeps_existing() {
    let counters = LifeCounters::new();
    let pool = tracked_pool(3, &counters);

    pool.grow_by(NonZero::new(2).unwrap()).unwrap();

    assert_eq!(pool.capacity(), 5);
    assert_eq!(counters.created(), 5);

    let held = acquire_all(&pool);
    assert_eq!(ids(&held), HashSet::from([0, 1, 2, 3, 4]));
    release_all(&pool, held);

    pool.double().unwrap();

    assert_eq!(pool.capacity(), 10);
    assert_eq!(counters.created(), 10);
    assert_eq!(pool.stats().resident, 10);
}

#[test]
fn grow_while_elements_are_checked_out() {
    let counters = LifeCounters::new();
    let pool = tracked_pool(2, &counters);

    let held = pool.acquire().unwrap();

    pool.grow_by(NonZero::new(2).unwrap()).unwrap();
    assert_eq!(pool.stats().resident, 3);

    pool.release(held).unwrap();

    let stats = pool.stats();
    assert_eq!(stats.resident, 4);
    assert_eq!(stats.live, 4);
    assert_eq!(counters.disposed(), 0);
}

#[test]
fn shrink_rejects_out_of_range_amounts() {
    let counters = LifeCounters::new();
    let pool = tracked_pool(3, &counters);

    for requested in [0, 3, 4, usize::MAX] {
        let error = pool.shrink_by(requested).unwrap_err();

        assert!(matches!(error, Error::OutOfRange { .. }));
        assert_eq!(pool.capacity(), 3);
    }

    assert_eq!(counters.disposed(), 0);
    assert_eq!(pool.stats().epoch, 0);
}

#[test]
fn shrink_refills_retained_slots_and_retires_surplus_on_release() {
    let counters = LifeCounters::new();
    let pool = tracked_pool(4, &counters);

    let held = acquire_all(&pool);
    assert_eq!(held.len(), 4);

    pool.shrink_by(1).unwrap();

    // Every retained slot was vacant, so all three were refilled.
    assert_eq!(pool.capacity(), 3);
    assert_eq!(pool.stats().resident, 3);
    assert_eq!(counters.created(), 7);

    // The four checked-out elements are now surplus.
    release_all(&pool, held);

    assert_eq!(counters.disposed(), 4);

    let stats = pool.stats();
    assert_eq!(stats.resident, 3);
    assert_eq!(stats.live, 3);
}

#[test]
fn shrink_to_half_on_single_slot_is_noop() {
    let counters = LifeCounters::new();
    let pool = tracked_pool(1, &counters);

    pool.shrink_to_half().unwrap();

    assert_eq!(pool.capacity(), 1);
    assert_eq!(pool.stats().epoch, 0);
    assert!(pool.try_acquire().is_some());
}

#[test]
fn shrink_to_half_halves() {
    let counters = LifeCounters::new();
    let pool = tracked_pool(8, &counters);

    pool.shrink_to_half().unwrap();

    assert_eq!(pool.capacity(), 4);
    assert_eq!(counters.disposed(), 4);
}

#[test]
fn shutdown_closes_pool_and_fires_completion() {
    let counters = LifeCounters::new();
    let pool = tracked_pool(2, &counters);

    let held = pool.acquire().unwrap();
    let completion = pool.completion();
    assert!(!completion.is_complete());

    pool.shutdown();

    assert!(completion.is_complete());
    assert_eq!(pool.state(), LifecycleState::Closed);
    assert!(pool.is_cancelled());
    assert!(pool.acquire().is_none());
    assert!(pool.try_acquire().is_none());

    // Released after shutdown, so the element is disposed instead of stored.
    pool.release(held).unwrap();
    assert_eq!(counters.disposed(), 1);

    // Repeated shutdown is harmless.
    pool.shutdown();
    assert_eq!(pool.state(), LifecycleState::Closed);
}

#[test]
fn cancellation_token_stops_pool_without_closing_it() {
    let counters = LifeCounters::new();
    let token = CancellationToken::new();

    let pool = ElasticPool::builder()
        .capacity(NonZero::new(2).unwrap())
        .factory({
            let counters = counters.clone();
            move || Tracked {
                id: counters.next_id(),
                counters: counters.clone(),
                disposed: false,
            }
        })
        .cancellation(token.clone())
        .build()
        .unwrap();

    token.cancel();

    assert!(pool.is_cancelled());
    assert!(pool.acquire().is_none());
    assert_eq!(pool.state(), LifecycleState::Running);
    assert!(!pool.completion().is_complete());

    // Resizes are still allowed until shutdown starts.
    pool.double().unwrap();
    assert_eq!(pool.capacity(), 4);

    pool.shutdown();
    assert!(matches!(pool.shrink_by(1), Err(Error::ShutDown)));
}

#[test]
fn dropping_pool_disposes_resident_elements() {
    let counters = LifeCounters::new();
    let pool = tracked_pool(3, &counters);

    let held = pool.acquire().unwrap();
    let clone = pool.clone();

    drop(pool);
    assert_eq!(counters.disposed(), 0);

    drop(clone);
    assert_eq!(counters.disposed(), 2);

    // Elements held outside the pool are the caller's business.
    assert!(!held.disposed);
}

#[test]
fn stats_track_operations() {
    let counters = LifeCounters::new();
    let pool = tracked_pool(2, &counters);

    for _ in 0..3 {
        let element = pool.acquire().unwrap();
        pool.release(element).unwrap();
    }

    let stats = pool.stats();
    assert_eq!(stats.capacity, 2);
    assert_eq!(stats.resident, 2);
    assert_eq!(stats.live, 2);
    assert_eq!(stats.created, 2);
    assert_eq!(stats.disposed, 0);
    assert_eq!(stats.acquisitions, 3);
    assert_eq!(stats.releases, 3);
    assert_eq!(stats.state, LifecycleState::Running);
    assert_eq!(counters.validated(), 3);
}
