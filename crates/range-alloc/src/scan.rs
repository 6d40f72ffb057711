//! Eviction scanning.
//!
//! A scan answers the question "which nodes do I have to evict to make room
//! for this request?". The caller adds candidate nodes in its eviction order
//! (typically least recently used first) until [`Scan::add_block`] reports a
//! hit, then removes every added node again, in any order, evicting
//! exactly those for which [`Scan::remove_block`] returns `true`.
//!
//! While nodes are added, the allocator treats them as already gone: the hole
//! a node would leave behind is merged with its neighbours' holes, and the
//! request is fitted into the merged hole with the same clipping, coloring
//! and alignment rules an insertion uses.
//!
//! The scan borrows the allocator mutably, so it cannot be modified until the
//! scan is finished or dropped.

use core::ops::Range;

use snafu::ensure;

use crate::{
    Mm, NodeId, NodeRef,
    error::{InvalidSnafu, MmError},
    mode::InsertMode,
    node::Node,
    placement::Request,
};

impl Mm {
    /// Starts an eviction scan over the whole managed range.
    ///
    /// The [`ONCE`](InsertMode::ONCE) bit of `mode` is ignored.
    ///
    /// # Panics
    ///
    /// Panics if another scan is active.
    pub fn scan(
        &mut self,
        size: u64,
        alignment: u64,
        color: usize,
        mode: InsertMode,
    ) -> Result<Scan<'_>, MmError> {
        let (base, end) = (self.base(), self.end());
        self.scan_with_range(size, alignment, color, base, end, mode)
    }

    /// Starts an eviction scan restricted to `range_start..range_end`.
    ///
    /// # Panics
    ///
    /// Panics if another scan is active.
    pub fn scan_with_range(
        &mut self,
        size: u64,
        alignment: u64,
        color: usize,
        range_start: u64,
        range_end: u64,
        mode: InsertMode,
    ) -> Result<Scan<'_>, MmError> {
        self.assert_no_scan();
        self.check_request(size, range_start, range_end)?;
        ensure!(
            size <= range_end - range_start,
            InvalidSnafu {
                reason: "size exceeds the search window"
            }
        );
        let req = Request::new(
            size,
            alignment,
            color,
            range_start,
            range_end,
            mode.without_once(),
        );
        log::debug!(
            "scan for {size:#x} bytes (align {alignment:#x}, color {color}) in {range_start:#x}..{range_end:#x}"
        );
        Ok(Scan {
            mm: self,
            req,
            hit: None,
            blocks: 0,
        })
    }
}

/// An eviction scan in progress.
///
/// Created by [`Mm::scan`] and [`Mm::scan_with_range`].
///
/// Every block added with [`add_block`](Self::add_block) must be removed with
/// [`remove_block`](Self::remove_block), in any order, before the scan is
/// [finished](Self::finish). A scan dropped with blocks still added only
/// clears the scan marks.
#[derive(Debug)]
pub struct Scan<'mm> {
    mm: &'mm mut Mm,
    req: Request,
    hit: Option<(u64, u64)>,
    blocks: usize,
}

impl Scan<'_> {
    /// Adds `node` to the set of eviction candidates.
    ///
    /// Returns `true` once enough contiguous space has been found. Further
    /// calls keep returning `true` and do not move the hit.
    ///
    /// # Panics
    ///
    /// Panics if `node` is not allocated in the scanned allocator, or if it
    /// has already been added.
    pub fn add_block(&mut self, node: &Node) -> bool {
        let index = self.mm.scan_mark(node);
        self.blocks += 1;
        if self.hit.is_some() {
            return true;
        }

        let mm = &*self.mm;
        let mut prev = mm.entry(index).prev;
        while prev != Mm::HEAD && mm.entry(prev).scanned() {
            prev = mm.entry(prev).prev;
        }
        let mut next = mm.entry(index).next;
        while next != Mm::HEAD && mm.entry(next).scanned() {
            next = mm.entry(next).next;
        }

        let hole_start = mm.hole_start(prev);
        let hole_end = mm.entry(next).start;
        let Some(start) = mm.fit(prev, hole_start, hole_end, &self.req) else {
            return false;
        };
        let end = start + self.req.size;
        log::debug!(
            "scan hit {start:#x}..{end:#x} after {} blocks",
            self.blocks
        );
        self.hit = Some((start, end));
        true
    }

    /// Removes `node` from the set of eviction candidates.
    ///
    /// Returns `true` if the node overlaps the hit and must be evicted.
    ///
    /// # Panics
    ///
    /// Panics if `node` has not been added to this scan.
    pub fn remove_block(&mut self, node: &Node) -> bool {
        assert!(self.blocks > 0, "no block left to remove");
        let index = self.mm.scan_unmark(node);
        self.blocks -= 1;
        let entry = self.mm.entry(index);
        self.hit
            .is_some_and(|(start, end)| entry.start < end && start < entry.end())
    }

    /// Returns the range the request would occupy, once found.
    #[must_use]
    pub fn hit(&self) -> Option<Range<u64>> {
        self.hit.map(|(start, end)| start..end)
    }

    /// Returns the number of blocks currently added.
    #[must_use]
    pub fn blocks(&self) -> usize {
        self.blocks
    }

    /// Returns a view of the scanned allocator.
    #[must_use]
    pub fn mm(&self) -> &Mm {
        self.mm
    }

    /// Ends the scan, releasing the allocator.
    ///
    /// # Panics
    ///
    /// Panics if blocks are still added.
    pub fn finish(self) -> ScanHit {
        assert_eq!(
            self.blocks, 0,
            "scan finished with blocks still added"
        );
        ScanHit {
            hit: self.hit,
            color: self.req.color,
        }
    }
}

impl Drop for Scan<'_> {
    fn drop(&mut self) {
        if self.blocks == 0 {
            return;
        }
        log::warn!(
            "eviction scan dropped with {} blocks still added",
            self.blocks
        );
        self.mm.scan_reset();
    }
}

/// The outcome of a finished [`Scan`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanHit {
    hit: Option<(u64, u64)>,
    color: usize,
}

impl ScanHit {
    /// Returns the range found by the scan, if any.
    #[must_use]
    pub fn hit(&self) -> Option<Range<u64>> {
        self.hit.map(|(start, end)| start..end)
    }

    /// Returns a neighbour that still has to be evicted because of color
    /// restrictions.
    ///
    /// After the nodes selected by the scan have been removed, the color
    /// callback may still shrink the freed hole below the hit, e.g. because a
    /// neighbour needs a guard gap. This returns that neighbour, if any.
    /// Call it repeatedly, evicting the returned node each time, until it
    /// returns `None`.
    #[must_use]
    pub fn color_evict(&self, mm: &Mm) -> Option<NodeId> {
        let (hit_start, hit_end) = self.hit?;
        let adjust = mm.color_adjust()?;

        let hole = mm.hole_slots().find(|&index| {
            let start = mm.hole_start(index);
            start <= hit_start && hit_end <= start + mm.entry(index).hole_size
        })?;
        let next = mm.entry(hole).next;
        let mut start = mm.hole_start(hole);
        let mut end = mm.entry(next).start;
        adjust(NodeRef::new(mm, hole), self.color, &mut start, &mut end);

        if start > hit_start {
            return NodeRef::new(mm, hole).id();
        }
        if end < hit_end {
            return NodeRef::new(mm, next).id();
        }
        None
    }
}
