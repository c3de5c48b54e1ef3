use std::hint;
use std::thread;

/// Longest busy-wait round is `2^MAX_SPIN_SHIFT` spin hints, no matter how high the limit.
const MAX_SPIN_SHIFT: u32 = 10;

/// Paces a retry loop: spins with exponentially growing busy-wait rounds until `spin_limit`
/// rounds have passed, then yields the thread on every further step.
///
/// The pool never blocks a caller while it is momentarily exhausted, but a caller that keeps
/// losing races should not monopolize a processor either.
#[derive(Debug)]
pub(crate) struct Backoff {
    step: u32,
    spin_limit: u32,
}

impl Backoff {
    pub(crate) const fn new(spin_limit: u32) -> Self {
        Self {
            step: 0,
            spin_limit,
        }
    }

    pub(crate) fn snooze(&mut self) {
        if self.is_yielding() {
            thread::yield_now();
            return;
        }

        let spins = 1_u32 << self.step.min(MAX_SPIN_SHIFT);

        for _ in 0..spins {
            hint::spin_loop();
        }

        self.step = self.step.saturating_add(1);
    }

    /// Whether the backoff has run out of spin rounds and now yields on every step.
    pub(crate) fn is_yielding(&self) -> bool {
        self.step >= self.spin_limit
    }

    pub(crate) fn reset(&mut self) {
        self.step = 0;
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn yields_after_spin_limit() {
        let mut backoff = Backoff::new(3);

        for _ in 0..3 {
            assert!(!backoff.is_yielding());
            backoff.snooze();
        }

        assert!(backoff.is_yielding());

        // Stays in the yielding phase.
        backoff.snooze();
        assert!(backoff.is_yielding());
    }

    #[test]
    fn zero_limit_yields_immediately() {
        let backoff = Backoff::new(0);

        assert!(backoff.is_yielding());
    }

    #[test]
    fn reset_returns_to_spinning() {
        let mut backoff = Backoff::new(1);

        backoff.snooze();
        assert!(backoff.is_yielding());

        backoff.reset();
        assert!(!backoff.is_yielding());
    }
}
