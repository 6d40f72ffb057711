//! Hole indices and candidate hole iteration.
//!
//! A hole is identified by the slot of the node it follows. Every such slot
//! is kept in two ordered maps: one by `(size, start)` for best-fit searches
//! and one by `start` for lowest/highest-address searches. The third ordering,
//! most recently created first, is the hole stack in [`crate::list`].

use alloc::collections::{BTreeMap, btree_map};
use core::iter::Rev;

use crate::{
    list::{HoleStack, HoleStackIter},
    mode::Search,
    node::Entry,
};

#[derive(Debug, Default)]
pub(crate) struct HoleIndex {
    by_size: BTreeMap<(u64, u64), usize>,
    by_addr: BTreeMap<u64, usize>,
}

impl HoleIndex {
    pub(crate) fn insert(&mut self, start: u64, size: u64, index: usize) {
        debug_assert!(size > 0);
        let old_size = self.by_size.insert((size, start), index);
        let old_addr = self.by_addr.insert(start, index);
        debug_assert!(old_size.is_none() && old_addr.is_none());
    }

    pub(crate) fn remove(&mut self, start: u64, size: u64) {
        let by_size = self.by_size.remove(&(size, start));
        let by_addr = self.by_addr.remove(&start);
        debug_assert!(by_size.is_some() && by_size == by_addr);
    }

    pub(crate) fn len(&self) -> usize {
        debug_assert_eq!(self.by_size.len(), self.by_addr.len());
        self.by_addr.len()
    }

    /// Returns the size of the largest hole.
    pub(crate) fn largest(&self) -> u64 {
        self.by_size
            .last_key_value()
            .map_or(0, |(&(size, _), _)| size)
    }

    /// Returns the slot owning the hole that contains `addr`, if any.
    pub(crate) fn containing(&self, entries: &[Entry], addr: u64) -> Option<usize> {
        let (&start, &index) = self.by_addr.range(..=addr).next_back()?;
        (addr < start + entries[index].hole_size).then_some(index)
    }

    pub(crate) fn by_size(&self) -> impl Iterator<Item = (u64, u64, usize)> + '_ {
        self.by_size
            .iter()
            .map(|(&(size, start), &index)| (start, size, index))
    }

    pub(crate) fn by_addr(&self) -> impl Iterator<Item = (u64, usize)> + '_ {
        self.by_addr.iter().map(|(&start, &index)| (start, index))
    }

    /// Returns the holes of at least `size` bytes that may intersect `lo..hi`,
    /// in the order `search` visits them.
    pub(crate) fn candidates<'a>(
        &'a self,
        entries: &'a [Entry],
        stack: &HoleStack,
        search: Search,
        size: u64,
        lo: u64,
        hi: u64,
    ) -> Candidates<'a> {
        let kind = match search {
            Search::Best => CandidatesKind::Best(self.by_size.range((size, 0)..)),
            Search::Low => {
                let from = self
                    .by_addr
                    .range(..=lo)
                    .next_back()
                    .map_or(lo, |(&start, _)| start);
                CandidatesKind::Low(self.by_addr.range(from..))
            }
            Search::High => CandidatesKind::High(self.by_addr.range(..hi).rev()),
            Search::Evict => CandidatesKind::Evict(stack.iter(entries)),
        };
        Candidates {
            entries,
            kind,
            size,
            lo,
            hi,
        }
    }
}

/// Iterator over candidate holes, yielding the slot owning each hole.
pub(crate) struct Candidates<'a> {
    entries: &'a [Entry],
    kind: CandidatesKind<'a>,
    size: u64,
    lo: u64,
    hi: u64,
}

enum CandidatesKind<'a> {
    Best(btree_map::Range<'a, (u64, u64), usize>),
    Low(btree_map::Range<'a, u64, usize>),
    High(Rev<btree_map::Range<'a, u64, usize>>),
    Evict(HoleStackIter<'a>),
}

impl Iterator for Candidates<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<Self::Item> {
        let Self {
            entries,
            size,
            lo,
            hi,
            ..
        } = *self;
        match &mut self.kind {
            CandidatesKind::Best(iter) => iter.next().map(|(_, &index)| index),
            CandidatesKind::Low(iter) => loop {
                let (&start, &index) = iter.next()?;
                let hole_size = entries[index].hole_size;
                if start >= hi {
                    return None;
                }
                if start + hole_size > lo && hole_size >= size {
                    return Some(index);
                }
            },
            CandidatesKind::High(iter) => loop {
                let (&start, &index) = iter.next()?;
                let hole_size = entries[index].hole_size;
                if start + hole_size <= lo {
                    return None;
                }
                if hole_size >= size {
                    return Some(index);
                }
            },
            CandidatesKind::Evict(iter) => iter.find(|&index| entries[index].hole_size >= size),
        }
    }
}
