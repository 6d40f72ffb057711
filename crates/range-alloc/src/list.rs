//! Index-linked lists threaded through the node table.
//!
//! The address list is circular: slot [`Mm::HEAD`](crate::Mm::HEAD) is both
//! its head and its tail, so the neighbours of any node can be looked up
//! without special cases. The hole stack is a plain doubly linked list whose
//! first element is the most recently created hole.

use crate::node::Entry;

/// Inserts `index` into the address list right after `at`.
pub(crate) fn link_after(entries: &mut [Entry], at: usize, index: usize) {
    let next = entries[at].next;
    entries[index].prev = at;
    entries[index].next = next;
    entries[next].prev = index;
    entries[at].next = index;
}

/// Removes `index` from the address list.
pub(crate) fn unlink(entries: &mut [Entry], index: usize) {
    let Entry { prev, next, .. } = entries[index];
    entries[prev].next = next;
    entries[next].prev = prev;
    entries[index].prev = index;
    entries[index].next = index;
}

/// Nodes followed by a non-empty hole, most recent first.
#[derive(Debug, Default)]
pub(crate) struct HoleStack {
    first: Option<usize>,
}

impl HoleStack {
    pub(crate) fn push(&mut self, entries: &mut [Entry], index: usize) {
        debug_assert!(entries[index].hole_prev.is_none() && entries[index].hole_next.is_none());
        if let Some(first) = self.first {
            entries[first].hole_prev = Some(index);
        }
        entries[index].hole_next = self.first;
        self.first = Some(index);
    }

    pub(crate) fn remove(&mut self, entries: &mut [Entry], index: usize) {
        let prev = entries[index].hole_prev.take();
        let next = entries[index].hole_next.take();
        match prev {
            Some(prev) => entries[prev].hole_next = next,
            None => {
                debug_assert_eq!(self.first, Some(index));
                self.first = next;
            }
        }
        if let Some(next) = next {
            entries[next].hole_prev = prev;
        }
    }

    pub(crate) fn iter<'a>(&self, entries: &'a [Entry]) -> HoleStackIter<'a> {
        HoleStackIter {
            entries,
            cursor: self.first,
        }
    }
}

/// Iterator over the slots on the hole stack.
#[derive(Debug, Clone)]
pub(crate) struct HoleStackIter<'a> {
    entries: &'a [Entry],
    cursor: Option<usize>,
}

impl Iterator for HoleStackIter<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<Self::Item> {
        let index = self.cursor?;
        self.cursor = self.entries[index].hole_next;
        Some(index)
    }
}
