//! Walks a pool of fake connections through its whole life: acquire and release, a health check
//! that fails, growing and shrinking under load, and shutdown.
//!
//! Run with: `cargo run --example elastic_pool_basic`.

use std::num::NonZero;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use elastic_pool::{Element, ElasticPool};

static NEXT_CONNECTION_ID: AtomicUsize = AtomicUsize::new(0);

#[derive(Debug)]
struct Connection {
    id: usize,
    requests_served: usize,
}

impl Connection {
    fn open() -> Self {
        let id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
        println!("  opened connection {id}");

        Self {
            id,
            requests_served: 0,
        }
    }

    fn serve(&mut self) {
        self.requests_served = self.requests_served.saturating_add(1);
    }
}

impl Element for Connection {
    fn validate(&self) -> bool {
        // Connections are recycled after a few requests.
        self.requests_served < 3
    }

    fn dispose(&mut self) {
        println!(
            "  closed connection {} after {} requests",
            self.id, self.requests_served
        );
    }
}

fn main() {
    println!("=== Building a pool of 2 connections ===");
    let pool = ElasticPool::builder()
        .capacity(NonZero::new(2).unwrap())
        .factory(Connection::open)
        .build()
        .unwrap();

    println!();
    println!("=== Serving requests ===");
    for _ in 0..6 {
        let mut connection = pool.acquire().unwrap();
        connection.serve();
        pool.release(connection).unwrap();
    }

    println!();
    println!("=== Growing to 4 connections while workers run ===");
    let workers = (0..4)
        .map(|_| {
            let pool = pool.clone();
            thread::spawn(move || {
                for _ in 0..10 {
                    let mut connection = pool.acquire().unwrap();
                    connection.serve();
                    pool.release(connection).unwrap();
                }
            })
        })
        .collect::<Vec<_>>();

    pool.double().unwrap();

    for worker in workers {
        worker.join().unwrap();
    }

    println!("  capacity is now {}", pool.capacity());

    println!();
    println!("=== Shrinking back to 1 connection ===");
    pool.shrink_by(3).unwrap();
    println!("  capacity is now {}", pool.capacity());

    println!();
    println!("=== Shutting down ===");
    let completion = pool.completion();
    pool.shutdown();
    println!("  shut down: {}", completion.is_complete());
    println!("  {:?}", pool.stats());

    drop(pool);
}
