//! Thread-safe generation counter for numbering lock epochs.
//!
//! # What is a lock generation? (for beginners)
//!
//! Every time somebody acquires the control lock a new *epoch* begins.  Each
//! epoch gets a number from this counter.  An expiry timer remembers the
//! number of the epoch it was started for, and when it fires it only acts if
//! that epoch is still the current one.  Without the number, a timer started
//! for Alice's first hold could release Alice's *second* hold, because both
//! holds have the same owner id.
//!
//! # Thread safety
//!
//! The counter uses `AtomicU64` internally.  An atomic operation is a CPU
//! instruction that reads, modifies, and writes a value *as a single
//! indivisible step*, so two threads can both call `next()` simultaneously
//! without producing the same value twice.

use std::sync::atomic::{AtomicU64, Ordering};

/// A thread-safe, monotonically increasing generation counter.
///
/// Generations start at 1 so that 0 can never name a real epoch.
///
/// # Examples
///
/// ```rust
/// use keylock_core::protocol::GenerationCounter;
///
/// let counter = GenerationCounter::new();
/// assert_eq!(counter.next(), 1);
/// assert_eq!(counter.next(), 2);
/// ```
#[derive(Debug)]
pub struct GenerationCounter {
    inner: AtomicU64,
}

impl GenerationCounter {
    /// Creates a new counter whose first value is 1.
    pub fn new() -> Self {
        Self {
            inner: AtomicU64::new(1),
        }
    }

    /// Returns the next generation number and atomically increments the counter.
    ///
    /// Uses `Relaxed` ordering: only uniqueness matters, and every consumer
    /// reads the value under the lock manager's mutex anyway.
    pub fn next(&self) -> u64 {
        self.inner.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for GenerationCounter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_counter_starts_at_one() {
        let counter = GenerationCounter::new();
        assert_eq!(counter.next(), 1);
    }

    #[test]
    fn test_counter_values_are_unique_across_threads() {
        // Arrange
        let counter = Arc::new(GenerationCounter::new());
        let threads = 8;
        let per_thread = 1000;

        // Act: each thread collects its own values
        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let c = Arc::clone(&counter);
                thread::spawn(move || (0..per_thread).map(|_| c.next()).collect::<Vec<_>>())
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for value in handle.join().unwrap() {
                // Assert: no value is ever handed out twice
                assert!(seen.insert(value), "duplicate generation {value}");
            }
        }
        assert_eq!(seen.len(), threads * per_thread);
    }
}
