use std::sync::atomic::{AtomicU64, Ordering};

use rayon::prelude::*;

use crate::config::WORD_BITS;
use crate::fragment::{Vertex, VertexRange};

/// A dense, word-packed set of local vertex handles `0..capacity`.
///
/// Insertion is a single `fetch_or`, so any number of threads may insert
/// concurrently without losing updates. Inserting a vertex twice is harmless.
/// Clearing and swapping happen between parallel phases.
#[derive(Debug)]
pub struct DenseVertexSet {
    capacity: usize,
    words: Vec<AtomicU64>,
}

#[inline(always)]
fn word_mask(v: Vertex) -> (usize, u64) {
    let bit = v.index();
    (bit / WORD_BITS, 1u64 << (bit % WORD_BITS))
}

/// Mask selecting the bits of word `word` that fall inside `[begin, end)`.
/// Requires `begin < (word + 1) * WORD_BITS` and `end > word * WORD_BITS`.
#[inline]
fn range_mask(word: usize, begin: usize, end: usize) -> u64 {
    let base = word * WORD_BITS;
    let lo = begin.saturating_sub(base);
    let hi = (end - base).min(WORD_BITS);
    let upper = if hi == WORD_BITS { u64::MAX } else { (1u64 << hi) - 1 };
    let lower = (1u64 << lo) - 1;
    upper & !lower
}

impl DenseVertexSet {
    pub fn new(capacity: usize) -> Self {
        let words = (0..capacity.div_ceil(WORD_BITS))
            .map(|_| AtomicU64::new(0))
            .collect();
        Self { capacity, words }
    }

    /// `range` cut down to the handles this set can hold.
    fn clamp(&self, range: VertexRange) -> VertexRange {
        let end = (range.end as usize).min(self.capacity) as u32;
        VertexRange::new(range.begin, end)
    }

    /// Adds `v`, returning `true` iff it was not present before.
    ///
    /// # Panics
    /// Panics if `v` is outside the set's capacity.
    #[inline]
    pub fn insert(&self, v: Vertex) -> bool {
        assert!(v.index() < self.capacity, "vertex {} outside set of {}", v.0, self.capacity);
        let (word, mask) = word_mask(v);
        let prev = self.words[word].fetch_or(mask, Ordering::Relaxed);
        prev & mask == 0
    }

    #[inline]
    pub fn exists(&self, v: Vertex) -> bool {
        if v.index() >= self.capacity {
            return false;
        }
        let (word, mask) = word_mask(v);
        self.words[word].load(Ordering::Relaxed) & mask != 0
    }

    /// Whether no vertex in `[begin, end)` is present.
    pub fn partial_empty(&self, begin: u32, end: u32) -> bool {
        let range = self.clamp(VertexRange::new(begin, end));
        if range.is_empty() {
            return true;
        }
        let (begin, end) = (range.begin as usize, range.end as usize);
        let (first, last) = (begin / WORD_BITS, (end - 1) / WORD_BITS);
        (first..=last).all(|w| self.words[w].load(Ordering::Relaxed) & range_mask(w, begin, end) == 0)
    }

    pub fn empty(&self) -> bool {
        self.words.iter().all(|w| w.load(Ordering::Relaxed) == 0)
    }

    pub fn count(&self) -> usize {
        self.words
            .iter()
            .map(|w| w.load(Ordering::Relaxed).count_ones() as usize)
            .sum()
    }

    /// Clears every word in parallel on the current rayon pool.
    pub fn parallel_clear(&self) {
        self.words.par_iter().for_each(|w| w.store(0, Ordering::Relaxed));
    }

    /// Exchanges the contents of two sets without copying.
    pub fn swap(&mut self, other: &mut DenseVertexSet) {
        std::mem::swap(self, other);
    }

    /// Calls `f` on every member inside `range`, in parallel on the current
    /// rayon pool. Visiting order is unspecified.
    pub fn par_for_each_in<F>(&self, range: VertexRange, f: F)
    where
        F: Fn(Vertex) + Sync + Send,
    {
        let range = self.clamp(range);
        if range.is_empty() {
            return;
        }
        let (begin, end) = (range.begin as usize, range.end as usize);
        let (first, last) = (begin / WORD_BITS, (end - 1) / WORD_BITS);
        (first..=last).into_par_iter().for_each(|w| {
            let mut bits = self.words[w].load(Ordering::Relaxed) & range_mask(w, begin, end);
            while bits != 0 {
                let offset = bits.trailing_zeros() as usize;
                f(Vertex((w * WORD_BITS + offset) as u32));
                bits &= bits - 1;
            }
        });
    }

    /// Members in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = Vertex> + '_ {
        self.words.iter().enumerate().flat_map(|(w, word)| {
            let mut bits = word.load(Ordering::Relaxed);
            std::iter::from_fn(move || {
                if bits == 0 {
                    return None;
                }
                let offset = bits.trailing_zeros() as usize;
                bits &= bits - 1;
                Some(Vertex((w * WORD_BITS + offset) as u32))
            })
        })
    }
}
