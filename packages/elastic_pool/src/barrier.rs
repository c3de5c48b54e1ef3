use std::sync::atomic::{AtomicBool, Ordering};

/// Single-fire broadcast signal telling in-flight operations that the slot array they are
/// looking at is being replaced.
///
/// Every generation of the slot array owns exactly one barrier, tagged with the epoch of that
/// generation. A resize fires the barrier of the outgoing generation before it touches any slot
/// and publishes the next generation with a fresh, unfired barrier. Operations never wait on a
/// barrier, they only poll it once per retry iteration.
///
/// All accesses are `SeqCst` because the release path relies on a single total order between
/// "element stored into slot", "barrier fired" and "slot swept by resize".
#[derive(Debug)]
pub(crate) struct ChangeBarrier {
    epoch: u64,
    fired: AtomicBool,
}

impl ChangeBarrier {
    pub(crate) const fn new(epoch: u64) -> Self {
        Self {
            epoch,
            fired: AtomicBool::new(false),
        }
    }

    /// The epoch of the slot array generation this barrier belongs to.
    pub(crate) fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Fires the barrier. Returns `true` if this call was the one that fired it.
    pub(crate) fn fire(&self) -> bool {
        !self.fired.swap(true, Ordering::SeqCst)
    }

    pub(crate) fn has_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }
}
