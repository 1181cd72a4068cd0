//! This module provides the entry-id allocator shared by every audit writer.
use std::sync::atomic::{AtomicU64, Ordering};

/// Hands out unique, increasing entry ids.
///
/// Backed by a single atomic counter, so allocation is the only point where
/// concurrent writers synchronise. Ids are never reused for the lifetime of the
/// allocator; ids allocated for writes that never reached the store leave gaps.
#[derive(Debug)]
pub struct IdAllocator {
    next: AtomicU64,
}

impl IdAllocator {
    /// Creates an allocator whose first id is `last + 1`.
    ///
    /// `last` is normally the highest id already in the store, so a reopened
    /// store never sees an id twice.
    pub fn starting_after(last: u64) -> Self {
        Self {
            next: AtomicU64::new(last.saturating_add(1)),
        }
    }

    /// Allocates the next id.
    pub fn next(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }

    /// The id the next call to `next` will return.
    #[cfg(test)]
    pub fn peek(&self) -> u64 {
        self.next.load(Ordering::Relaxed)
    }
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::starting_after(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn starts_after_seed() {
        let ids = IdAllocator::starting_after(41);
        assert_eq!(ids.peek(), 42);
        assert_eq!(ids.next(), 42);
        assert_eq!(ids.next(), 43);
    }

    #[test]
    fn first_id_is_positive() {
        assert_eq!(IdAllocator::default().next(), 1);
    }

    #[test]
    fn concurrent_allocations_are_distinct() {
        let ids = Arc::new(IdAllocator::default());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ids = ids.clone();
                std::thread::spawn(move || (0..1_000).map(|_| ids.next()).collect::<Vec<_>>())
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(seen.insert(id), "id {} allocated twice", id);
            }
        }
        assert_eq!(seen.len(), 8_000);
        assert_eq!(ids.peek(), 8_001);
    }
}
