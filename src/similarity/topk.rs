//! Bounded per-subject match retention.
//!
//! Bulk scoring over n fingerprints evaluates O(n²) pairs but may only
//! keep K matches per subject. Collecting everything and sorting would
//! defeat that bound, so retention is a fixed-capacity min-heap: the
//! weakest retained match sits at the top and is evicted the moment a
//! better candidate arrives, keeping memory at O(n·K).
//!
//! Ranking is deterministic: higher score wins, and at equal score the
//! lexicographically smaller matched identifier wins. Partitioned scans
//! can keep independent heaps and [`TopK::merge`] them afterwards.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use super::SimilarityResult;

/// Heap ordering wrapper: greater means "better retained match".
#[derive(Debug, Clone)]
struct RankedMatch(SimilarityResult);

impl RankedMatch {
    fn cmp_key(&self, other: &Self) -> Ordering {
        self.0
            .overall_score
            .total_cmp(&other.0.overall_score)
            // At equal score the smaller matched id ranks higher.
            .then_with(|| other.0.matched_id.cmp(&self.0.matched_id))
    }
}

impl PartialEq for RankedMatch {
    fn eq(&self, other: &Self) -> bool {
        self.cmp_key(other) == Ordering::Equal
    }
}

impl Eq for RankedMatch {}

impl PartialOrd for RankedMatch {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RankedMatch {
    fn cmp(&self, other: &Self) -> Ordering {
        self.cmp_key(other)
    }
}

/// Fixed-capacity retention of the K best-scoring matches.
#[derive(Debug, Clone)]
pub struct TopK {
    capacity: usize,
    heap: BinaryHeap<Reverse<RankedMatch>>,
}

impl TopK {
    /// Create an empty structure retaining at most `capacity` matches.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            heap: BinaryHeap::with_capacity(capacity.saturating_add(1)),
        }
    }

    /// Number of currently retained matches.
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Whether nothing has been retained.
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Offer a candidate; it is kept only if it ranks above the current
    /// weakest retained match (or capacity is not yet reached).
    pub fn insert(&mut self, result: SimilarityResult) {
        if self.capacity == 0 {
            return;
        }
        let candidate = RankedMatch(result);
        if self.heap.len() < self.capacity {
            self.heap.push(Reverse(candidate));
            return;
        }
        if let Some(Reverse(weakest)) = self.heap.peek() {
            if candidate > *weakest {
                self.heap.pop();
                self.heap.push(Reverse(candidate));
            }
        }
    }

    /// Fold another retention structure into this one.
    pub fn merge(&mut self, other: TopK) {
        for Reverse(ranked) in other.heap {
            self.insert(ranked.0);
        }
    }

    /// Consume the structure, returning matches best-first.
    pub fn into_sorted(self) -> Vec<SimilarityResult> {
        let mut ranked: Vec<RankedMatch> = self.heap.into_iter().map(|r| r.0).collect();
        ranked.sort_by(|a, b| b.cmp(a));
        ranked.into_iter().map(|r| r.0).collect()
    }
}
