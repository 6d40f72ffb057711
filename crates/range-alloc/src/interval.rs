//! Address-keyed index of the allocated intervals.
//!
//! Allocated intervals never overlap, so ordering them by start address also
//! orders them by end address. The first interval overlapping a query window
//! is therefore either the last one starting at or below the window start, or
//! the first one starting above it.

use alloc::collections::BTreeMap;
use core::ops::Bound;

#[derive(Debug, Default)]
pub(crate) struct IntervalTree {
    /// `start -> (end, slot)`
    by_start: BTreeMap<u64, (u64, usize)>,
}

impl IntervalTree {
    pub(crate) fn len(&self) -> usize {
        self.by_start.len()
    }

    pub(crate) fn insert(&mut self, start: u64, end: u64, index: usize) {
        let old = self.by_start.insert(start, (end, index));
        debug_assert!(old.is_none(), "interval {start:#x} inserted twice");
    }

    pub(crate) fn remove(&mut self, start: u64) -> Option<usize> {
        self.by_start.remove(&start).map(|(_, index)| index)
    }

    /// Returns the slot of the lowest interval intersecting `lo..hi`.
    pub(crate) fn first(&self, lo: u64, hi: u64) -> Option<usize> {
        if lo >= hi {
            return None;
        }
        if let Some((_, &(end, index))) = self.by_start.range(..=lo).next_back() {
            if end > lo {
                return Some(index);
            }
        }
        self.by_start
            .range((Bound::Excluded(lo), Bound::Excluded(hi)))
            .next()
            .map(|(_, &(_, index))| index)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (u64, u64, usize)> + '_ {
        self.by_start
            .iter()
            .map(|(&start, &(end, index))| (start, end, index))
    }
}
