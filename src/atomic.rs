use std::sync::atomic::{AtomicU64, Ordering};

/// Lowers `target` to `candidate` if `candidate` is smaller.
///
/// Implemented as a compare-and-exchange loop, so it is safe under any number
/// of concurrent writers. The reduction is commutative, idempotent and
/// monotone: whatever the interleaving, the stored value ends at the minimum
/// of everything offered.
///
/// Returns `true` iff this call lowered the stored value.
#[inline]
pub fn atomic_min(target: &AtomicU64, candidate: u64) -> bool {
    let mut current = target.load(Ordering::Relaxed);
    while candidate < current {
        match target.compare_exchange_weak(current, candidate, Ordering::AcqRel, Ordering::Relaxed) {
            Ok(_) => return true,
            Err(actual) => current = actual,
        }
    }
    false
}
