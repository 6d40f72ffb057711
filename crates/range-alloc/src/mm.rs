//! The range allocator.

use alloc::{boxed::Box, vec, vec::Vec};
use core::{
    fmt,
    ops::Range,
    sync::atomic::{AtomicU32, Ordering},
};

use snafu::{OptionExt as _, ensure};

use crate::{
    error::{InUseSnafu, InvalidSnafu, MmError, NoSpaceSnafu},
    holes::HoleIndex,
    interval::IntervalTree,
    list::{self, HoleStack, HoleStackIter},
    mode::InsertMode,
    node::{Entry, Node, NodeFlags, NodeId, NodeRef},
    placement::{self, Request},
};

/// Callback restricting the usable part of a hole for a given color.
///
/// It receives the node owning the hole (possibly the head sentinel), the
/// color of the node about to be placed, and the hole bounds, which it may
/// shrink, e.g. to keep guard pages between differently colored neighbours.
pub type ColorAdjustFn = dyn Fn(NodeRef<'_>, usize, &mut u64, &mut u64) + Send + Sync;

/// Source of allocator ids stamped into every [`NodeId`].
static NEXT_ID: AtomicU32 = AtomicU32::new(0);

/// A range allocator over `base..base + range`.
///
/// The allocator keeps the allocated nodes in an address-ordered list and
/// tracks the hole after each node in three orders: by size, by address and
/// by recency. It does not own the node storage; see [`Node`].
///
/// # Thread Safety
///
/// The allocator has no internal synchronization. All mutating operations
/// take `&mut self`; wrap it in a lock to share it.
///
/// # Examples
///
/// ```
/// use range_alloc::{InsertMode, Mm, Node};
///
/// let mut mm = Mm::new(0, 1024);
///
/// let mut fixed = Node::with_range(100, 100, 0);
/// mm.reserve_node(&mut fixed).unwrap();
///
/// let mut node = Node::new();
/// mm.insert_node_in_range(&mut node, 50, 16, 0, 0, 1024, InsertMode::HIGH)
///     .unwrap();
/// assert_eq!(node.start(), 960);
///
/// mm.remove_node(&mut node);
/// mm.remove_node(&mut fixed);
/// mm.takedown();
/// ```
pub struct Mm {
    id: u32,
    entries: Vec<Entry>,
    vacant: Vec<usize>,
    base: u64,
    end: u64,
    hole_stack: HoleStack,
    holes: HoleIndex,
    interval: IntervalTree,
    scan_active: usize,
    color_adjust: Option<Box<ColorAdjustFn>>,
}

impl Mm {
    /// Slot of the head sentinel.
    ///
    /// Its `start` is the end of the managed range, so the hole of the last
    /// node ends there, and its own hole starts at the base.
    pub(crate) const HEAD: usize = 0;

    /// Creates an allocator managing `base..base + range`.
    ///
    /// # Panics
    ///
    /// Panics if `base + range` overflows.
    #[must_use]
    pub fn new(base: u64, range: u64) -> Self {
        let Some(end) = base.checked_add(range) else {
            panic!("range {base:#x}+{range:#x} overflows");
        };
        let mut head = Entry::vacant(0);
        head.start = end;
        let mut mm = Self {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            entries: vec![head],
            vacant: Vec::new(),
            base,
            end,
            hole_stack: HoleStack::default(),
            holes: HoleIndex::default(),
            interval: IntervalTree::default(),
            scan_active: 0,
            color_adjust: None,
        };
        mm.add_hole(Self::HEAD);
        mm
    }

    /// Installs a color adjustment callback, see [`ColorAdjustFn`].
    #[must_use]
    pub fn with_color_adjust<F>(mut self, f: F) -> Self
    where
        F: Fn(NodeRef<'_>, usize, &mut u64, &mut u64) + Send + Sync + 'static,
    {
        self.set_color_adjust(Some(Box::new(f)));
        self
    }

    /// Replaces the color adjustment callback.
    pub fn set_color_adjust(&mut self, f: Option<Box<ColorAdjustFn>>) {
        self.color_adjust = f;
    }

    /// Tears the allocator down.
    ///
    /// # Panics
    ///
    /// Panics if any node is still allocated. Each leaked node is logged
    /// before.
    pub fn takedown(self) {
        for node in self.nodes() {
            log::error!(
                "node {:#x}..{:#x} (color {}) still allocated at takedown",
                node.start(),
                node.end(),
                node.color()
            );
        }
        assert!(
            self.clean(),
            "{} nodes still allocated at takedown",
            self.len()
        );
    }

    /// Returns the managed address range.
    #[must_use]
    pub fn range(&self) -> Range<u64> {
        self.base..self.end
    }

    /// Returns `true` if no node is allocated.
    #[must_use]
    pub fn clean(&self) -> bool {
        self.entries[Self::HEAD].next == Self::HEAD
    }

    /// Returns `true` if no node is allocated.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clean()
    }

    /// Returns the number of allocated nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.interval.len()
    }

    /// Returns a view of the allocated node `id`, or `None` if the handle is
    /// stale.
    #[must_use]
    pub fn get(&self, id: NodeId) -> Option<NodeRef<'_>> {
        if id.mm() != self.id {
            return None;
        }
        let index = id.index();
        let entry = self.entries.get(index)?;
        (index != Self::HEAD && entry.allocated() && entry.generation == id.generation())
            .then(|| NodeRef::new(self, index))
    }

    /// Returns `true` if a non-empty hole follows `node`.
    ///
    /// # Panics
    ///
    /// Panics if `node` is not allocated in this allocator.
    #[must_use]
    pub fn hole_follows(&self, node: &Node) -> bool {
        self.entries[self.slot_of(node)].hole_size > 0
    }

    /// Iterates over all allocated nodes in address order.
    #[must_use]
    pub fn nodes(&self) -> Nodes<'_> {
        Nodes {
            mm: self,
            cursor: self.entries[Self::HEAD].next,
            limit: u64::MAX,
        }
    }

    /// Iterates, in address order, over the allocated nodes intersecting
    /// `start..end`.
    #[must_use]
    pub fn nodes_in_range(&self, start: u64, end: u64) -> Nodes<'_> {
        Nodes {
            mm: self,
            cursor: self.interval.first(start, end).unwrap_or(Self::HEAD),
            limit: end,
        }
    }

    /// Iterates over all holes, most recently created first.
    #[must_use]
    pub fn holes(&self) -> Holes<'_> {
        Holes {
            mm: self,
            iter: self.hole_stack.iter(&self.entries),
        }
    }

    /// Inserts `node` at the fixed interval it describes.
    ///
    /// # Panics
    ///
    /// Panics if `node` is already allocated, or if a scan is active.
    pub fn reserve_node(&mut self, node: &mut Node) -> Result<(), MmError> {
        assert!(!node.allocated(), "node is already allocated");
        self.assert_no_scan();

        let (start, size, color) = (node.start(), node.size(), node.color());
        ensure!(size > 0, InvalidSnafu { reason: "size must be non-zero" });
        let end = start
            .checked_add(size)
            .context(InvalidSnafu { reason: "node range overflows" })?;

        let hole = self
            .holes
            .containing(&self.entries, start)
            .context(InUseSnafu { start, end })?;
        let hole_start = self.hole_start(hole);
        let hole_end = hole_start + self.entries[hole].hole_size;
        let (mut adj_start, mut adj_end) = (hole_start, hole_end);
        if let Some(adjust) = &self.color_adjust {
            adjust(NodeRef::new(self, hole), color, &mut adj_start, &mut adj_end);
            adj_start = adj_start.max(hole_start);
            adj_end = adj_end.min(hole_end);
        }
        ensure!(
            adj_start <= start && end <= adj_end,
            InUseSnafu { start, end }
        );

        let index = self.link_node(hole, start, size, color);
        node.attach(self.id_of(index), start, size, color);
        log::trace!("reserved {start:#x}..{end:#x} (color {color})");
        Ok(())
    }

    /// Searches for a place for a node of `size` bytes inside
    /// `range_start..range_end` and inserts `node` there.
    ///
    /// An `alignment` of 0 or 1 means unaligned. `mode` selects the order in
    /// which holes are tried and whether the node goes to the bottom or the
    /// top of the chosen hole.
    ///
    /// # Panics
    ///
    /// Panics if `node` is already allocated, or if a scan is active.
    #[expect(clippy::too_many_arguments)]
    pub fn insert_node_in_range(
        &mut self,
        node: &mut Node,
        size: u64,
        alignment: u64,
        color: usize,
        range_start: u64,
        range_end: u64,
        mode: InsertMode,
    ) -> Result<(), MmError> {
        assert!(!node.allocated(), "node is already allocated");
        self.assert_no_scan();
        self.check_request(size, range_start, range_end)?;

        ensure!(
            size <= range_end - range_start && size <= self.holes.largest(),
            NoSpaceSnafu {
                size,
                alignment,
                range_start,
                range_end,
            }
        );
        let req = Request::new(size, alignment, color, range_start, range_end, mode);
        let (hole, start) = self.find_placement(&req).context(NoSpaceSnafu {
            size,
            alignment,
            range_start,
            range_end,
        })?;

        let index = self.link_node(hole, start, size, color);
        node.attach(self.id_of(index), start, size, color);
        log::trace!(
            "inserted {start:#x}..{:#x} (color {color}, {mode:?})",
            start + size
        );
        Ok(())
    }

    /// Inserts `node` anywhere in the managed range.
    ///
    /// # Panics
    ///
    /// Panics if `node` is already allocated, or if a scan is active.
    pub fn insert_node_generic(
        &mut self,
        node: &mut Node,
        size: u64,
        alignment: u64,
        color: usize,
        mode: InsertMode,
    ) -> Result<(), MmError> {
        let (base, end) = (self.base, self.end);
        self.insert_node_in_range(node, size, alignment, color, base, end, mode)
    }

    /// Inserts an unaligned, uncolored `node` into the smallest hole that
    /// fits.
    ///
    /// # Panics
    ///
    /// Panics if `node` is already allocated, or if a scan is active.
    pub fn insert_node(&mut self, node: &mut Node, size: u64) -> Result<(), MmError> {
        self.insert_node_generic(node, size, 0, 0, InsertMode::BEST)
    }

    /// Removes `node` from the allocator, merging the holes around it.
    ///
    /// # Panics
    ///
    /// Panics if `node` is not allocated in this allocator, if it is part of
    /// an eviction scan, or if a scan is active.
    pub fn remove_node(&mut self, node: &mut Node) {
        self.assert_no_scan();
        let index = self.slot_of(node);
        assert!(
            !self.entries[index].scanned(),
            "cannot remove a node added to an eviction scan"
        );

        let Entry {
            prev, start, size, ..
        } = self.entries[index];
        self.rm_hole(index);
        self.interval.remove(start);
        list::unlink(&mut self.entries, index);
        self.rm_hole(prev);
        self.add_hole(prev);
        self.free_slot(index);
        node.detach();
        log::trace!("removed {start:#x}..{:#x}", start + size);
    }

    /// Moves the placement of `old` to `new`.
    ///
    /// `new` takes over the interval, color and handle of `old`, and `old` is
    /// left cleared.
    ///
    /// # Panics
    ///
    /// Panics if `old` is not allocated in this allocator, if `new` is
    /// allocated, or if a scan is active.
    pub fn replace_node(&mut self, old: &mut Node, new: &mut Node) {
        assert!(!new.allocated(), "replacement node is already allocated");
        self.assert_no_scan();
        let index = self.slot_of(old);
        let id = self.id_of(index);
        let Entry {
            start, size, color, ..
        } = self.entries[index];
        old.detach();
        new.attach(id, start, size, color);
        log::trace!("replaced node {id} at {start:#x}..{:#x}", start + size);
    }

    pub(crate) fn id(&self) -> u32 {
        self.id
    }

    pub(crate) fn entry(&self, index: usize) -> &Entry {
        &self.entries[index]
    }

    pub(crate) fn hole_slots(&self) -> HoleStackIter<'_> {
        self.hole_stack.iter(&self.entries)
    }

    pub(crate) fn color_adjust(&self) -> Option<&ColorAdjustFn> {
        self.color_adjust.as_deref()
    }

    pub(crate) fn base(&self) -> u64 {
        self.base
    }

    pub(crate) fn end(&self) -> u64 {
        self.end
    }

    pub(crate) fn holes_index(&self) -> &HoleIndex {
        &self.holes
    }

    pub(crate) fn interval(&self) -> &IntervalTree {
        &self.interval
    }

    /// Start of the hole following slot `index`.
    pub(crate) fn hole_start(&self, index: usize) -> u64 {
        if index == Self::HEAD {
            self.base
        } else {
            self.entries[index].end()
        }
    }

    /// Returns the slot of an allocated node.
    ///
    /// # Panics
    ///
    /// Panics if the node is not allocated in this allocator.
    pub(crate) fn slot_of(&self, node: &Node) -> usize {
        let Some(id) = node.id() else {
            panic!("node is not allocated");
        };
        assert!(
            self.get(id).is_some(),
            "node {id} is not allocated in this allocator"
        );
        id.index()
    }

    pub(crate) fn assert_no_scan(&self) {
        assert_eq!(
            self.scan_active, 0,
            "allocator is locked by an eviction scan"
        );
    }

    pub(crate) fn check_request(
        &self,
        size: u64,
        range_start: u64,
        range_end: u64,
    ) -> Result<(), MmError> {
        ensure!(size > 0, InvalidSnafu { reason: "size must be non-zero" });
        ensure!(
            range_start < range_end,
            InvalidSnafu {
                reason: "search window is empty"
            }
        );
        ensure!(
            range_end <= self.end,
            InvalidSnafu {
                reason: "search window ends beyond the managed range"
            }
        );
        Ok(())
    }

    /// Finds the address at which `req` would be placed inside the hole
    /// `hole_start..hole_end` following slot `hole`.
    ///
    /// The hole is clipped to the request window first, then handed to the
    /// color callback, then aligned.
    pub(crate) fn fit(
        &self,
        hole: usize,
        hole_start: u64,
        hole_end: u64,
        req: &Request,
    ) -> Option<u64> {
        let mut start = hole_start.max(req.range_start);
        let mut end = hole_end.min(req.range_end);
        if end <= start {
            return None;
        }
        if let Some(adjust) = &self.color_adjust {
            let (clip_start, clip_end) = (start, end);
            adjust(NodeRef::new(self, hole), req.color, &mut start, &mut end);
            // the callback may only shrink the hole
            start = start.max(clip_start);
            end = end.min(clip_end);
        }
        placement::place(start, end, req)
    }

    /// Returns the slot owning the chosen hole and the placement address.
    fn find_placement(&self, req: &Request) -> Option<(usize, u64)> {
        let limit = if req.once { 1 } else { usize::MAX };
        self.holes
            .candidates(
                &self.entries,
                &self.hole_stack,
                req.search,
                req.size,
                req.range_start,
                req.range_end,
            )
            .take(limit)
            .find_map(|hole| {
                let hole_start = self.hole_start(hole);
                let hole_end = hole_start + self.entries[hole].hole_size;
                self.fit(hole, hole_start, hole_end, req)
                    .map(|start| (hole, start))
            })
    }

    /// Places a new node at `start..start + size` inside the hole following
    /// `hole`, splitting that hole.
    fn link_node(&mut self, hole: usize, start: u64, size: u64, color: usize) -> usize {
        let hole_start = self.hole_start(hole);
        let hole_end = hole_start + self.entries[hole].hole_size;
        debug_assert!(hole_start <= start && start + size <= hole_end);

        let index = self.alloc_slot();
        let entry = &mut self.entries[index];
        entry.start = start;
        entry.size = size;
        entry.color = color;
        entry.flags = NodeFlags::ALLOCATED;

        list::link_after(&mut self.entries, hole, index);
        self.interval.insert(start, start + size, index);

        self.rm_hole(hole);
        if start > hole_start {
            self.add_hole(hole);
        }
        if start + size < hole_end {
            self.add_hole(index);
        }
        index
    }

    fn add_hole(&mut self, index: usize) {
        let start = self.hole_start(index);
        let end = self.entries[self.entries[index].next].start;
        let size = end - start;
        self.entries[index].hole_size = size;
        if size == 0 {
            return;
        }
        self.holes.insert(start, size, index);
        self.hole_stack.push(&mut self.entries, index);
    }

    fn rm_hole(&mut self, index: usize) {
        let size = self.entries[index].hole_size;
        if size == 0 {
            return;
        }
        let start = self.hole_start(index);
        self.holes.remove(start, size);
        self.hole_stack.remove(&mut self.entries, index);
        self.entries[index].hole_size = 0;
    }

    fn alloc_slot(&mut self) -> usize {
        if let Some(index) = self.vacant.pop() {
            return index;
        }
        self.entries.push(Entry::vacant(0));
        self.entries.len() - 1
    }

    fn free_slot(&mut self, index: usize) {
        let generation = self.entries[index].generation.wrapping_add(1);
        self.entries[index] = Entry::vacant(generation);
        self.vacant.push(index);
    }

    fn id_of(&self, index: usize) -> NodeId {
        NodeId::new(self.id, index, self.entries[index].generation)
    }

    pub(crate) fn scan_mark(&mut self, node: &Node) -> usize {
        let index = self.slot_of(node);
        let entry = &mut self.entries[index];
        assert!(!entry.scanned(), "node is already added to the scan");
        entry.flags.insert(NodeFlags::SCANNED);
        self.scan_active += 1;
        index
    }

    pub(crate) fn scan_unmark(&mut self, node: &Node) -> usize {
        let index = self.slot_of(node);
        let entry = &mut self.entries[index];
        assert!(entry.scanned(), "node was not added to the scan");
        entry.flags.remove(NodeFlags::SCANNED);
        self.scan_active -= 1;
        index
    }

    /// Clears every scan mark left behind by an abandoned scan.
    pub(crate) fn scan_reset(&mut self) {
        for entry in &mut self.entries {
            entry.flags.remove(NodeFlags::SCANNED);
        }
        self.scan_active = 0;
    }
}

impl fmt::Debug for Mm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mm")
            .field("range", &self.range())
            .field("nodes", &self.len())
            .field("holes", &self.holes.len())
            .field("scan_active", &self.scan_active)
            .field("color_adjust", &self.color_adjust.is_some())
            .finish()
    }
}

/// Iterator over allocated nodes in address order.
///
/// Created by [`Mm::nodes`] and [`Mm::nodes_in_range`].
#[derive(Clone)]
pub struct Nodes<'a> {
    mm: &'a Mm,
    cursor: usize,
    limit: u64,
}

impl<'a> Iterator for Nodes<'a> {
    type Item = NodeRef<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor == Mm::HEAD {
            return None;
        }
        let entry = self.mm.entry(self.cursor);
        if entry.start >= self.limit {
            self.cursor = Mm::HEAD;
            return None;
        }
        let node = NodeRef::new(self.mm, self.cursor);
        self.cursor = entry.next;
        Some(node)
    }
}

/// Iterator over the holes of an allocator, most recently created first.
///
/// Created by [`Mm::holes`].
#[derive(Clone)]
pub struct Holes<'a> {
    mm: &'a Mm,
    iter: HoleStackIter<'a>,
}

impl Iterator for Holes<'_> {
    type Item = Range<u64>;

    fn next(&mut self) -> Option<Self::Item> {
        let index = self.iter.next()?;
        let start = self.mm.hole_start(index);
        Some(start..start + self.mm.entry(index).hole_size)
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use super::*;

    fn reserve(mm: &mut Mm, start: u64, size: u64) -> Node {
        let mut node = Node::with_range(start, size, 0);
        mm.reserve_node(&mut node).unwrap();
        mm.check_invariants();
        node
    }

    fn insert(mm: &mut Mm, size: u64, alignment: u64, mode: InsertMode) -> Node {
        let mut node = Node::new();
        mm.insert_node_generic(&mut node, size, alignment, 0, mode)
            .unwrap();
        mm.check_invariants();
        node
    }

    fn holes(mm: &Mm) -> Vec<Range<u64>> {
        let mut holes: Vec<_> = mm.holes().collect();
        holes.sort_by_key(|hole| hole.start);
        holes
    }

    fn layout(mm: &Mm) -> Vec<(u64, u64)> {
        mm.nodes().map(|n| (n.start(), n.size())).collect()
    }

    /// The allocator of the reference scenario: `[100, 200)` and `[300, 350)`
    /// reserved in `[0, 1024)`.
    fn two_reserved() -> (Mm, Node, Node) {
        let mut mm = Mm::new(0, 1024);
        let a = reserve(&mut mm, 100, 100);
        let b = reserve(&mut mm, 300, 50);
        (mm, a, b)
    }

    #[test]
    fn test_new_is_one_hole() {
        let mm = Mm::new(0x1000, 0x2000);
        mm.check_invariants();
        assert!(mm.clean());
        assert_eq!(mm.range(), 0x1000..0x3000);
        assert_eq!(mm.holes().collect::<Vec<_>>(), vec![0x1000..0x3000]);
        mm.takedown();
    }

    #[test]
    fn test_empty_range() {
        let mut mm = Mm::new(10, 0);
        mm.check_invariants();
        assert_eq!(mm.holes().count(), 0);
        let mut node = Node::new();
        let err = mm.insert_node(&mut node, 1).unwrap_err();
        assert!(err.is_invalid());
    }

    #[test]
    #[should_panic(expected = "overflows")]
    fn test_new_overflow() {
        let _ = Mm::new(u64::MAX, 1);
    }

    #[test]
    fn test_reserve_splits_holes() {
        let (mm, a, b) = two_reserved();
        assert_eq!(
            holes(&mm),
            vec![0..100, 200..300, 350..1024]
        );
        assert!(mm.hole_follows(&a));
        assert!(mm.hole_follows(&b));
        assert_eq!(layout(&mm), vec![(100, 100), (300, 50)]);
    }

    #[test]
    fn test_reserve_collision() {
        let (mut mm, _a, _b) = two_reserved();
        for (start, size) in [(100, 1), (150, 100), (50, 51), (299, 2), (1000, 25)] {
            let mut node = Node::with_range(start, size, 0);
            let err = mm.reserve_node(&mut node).unwrap_err();
            assert!(err.is_in_use(), "{start}+{size}: {err}");
            assert!(!node.allocated());
        }
        mm.check_invariants();
    }

    #[test]
    fn test_reserve_invalid() {
        let mut mm = Mm::new(0, 1024);
        let mut node = Node::with_range(10, 0, 0);
        assert!(mm.reserve_node(&mut node).unwrap_err().is_invalid());
        let mut node = Node::with_range(u64::MAX, 2, 0);
        assert!(mm.reserve_node(&mut node).unwrap_err().is_invalid());
    }

    #[test]
    fn test_reserve_exact_fill() {
        let (mut mm, _a, _b) = two_reserved();
        let c = reserve(&mut mm, 200, 100);
        assert!(!mm.hole_follows(&c));
        assert_eq!(holes(&mm), vec![0..100, 350..1024]);
    }

    #[test]
    fn test_insert_search_modes() {
        let (mut mm, _a, _b) = two_reserved();

        let low = insert(&mut mm, 50, 16, InsertMode::LOW);
        assert_eq!(low.start(), 0);
        assert_eq!(holes(&mm), vec![50..100, 200..300, 350..1024]);

        // the node start is aligned, so the top 14 bytes stay free
        let high = insert(&mut mm, 50, 16, InsertMode::HIGH);
        assert_eq!(high.start(), 960);
        assert_eq!(
            holes(&mm),
            vec![50..100, 200..300, 350..960, 1010..1024]
        );

        let best = insert(&mut mm, 80, 1, InsertMode::BEST);
        assert_eq!(best.start(), 200);
        assert_eq!(
            holes(&mm),
            vec![50..100, 280..300, 350..960, 1010..1024]
        );
    }

    #[test]
    fn test_insert_best_tie_breaks_by_address() {
        let mut mm = Mm::new(0, 1000);
        let _a = reserve(&mut mm, 100, 100);
        let _b = reserve(&mut mm, 300, 500);
        // holes: [0,100) [200,300) [800,1000)
        let node = insert(&mut mm, 100, 1, InsertMode::BEST);
        assert_eq!(node.start(), 0);
        let node = insert(&mut mm, 100, 1, InsertMode::BEST);
        assert_eq!(node.start(), 200);
    }

    #[test]
    fn test_insert_evict_prefers_latest_hole() {
        let mut mm = Mm::new(0, 400);
        let mut nodes: Vec<_> = (0..4).map(|i| reserve(&mut mm, i * 100, 100)).collect();
        mm.remove_node(&mut nodes[1]);
        mm.remove_node(&mut nodes[3]);
        mm.check_invariants();

        let node = insert(&mut mm, 50, 1, InsertMode::EVICT);
        assert_eq!(node.start(), 300);
        let node = insert(&mut mm, 50, 1, InsertMode::EVICT);
        // the tail of [300, 400) is now the most recent hole
        assert_eq!(node.start(), 350);
        let node = insert(&mut mm, 50, 1, InsertMode::LOW);
        assert_eq!(node.start(), 100);
    }

    #[test]
    fn test_insert_once() {
        let mut mm = Mm::new(0, 1000);
        let _a = reserve(&mut mm, 10, 983);
        // holes: [0,10) [993,1000), the highest one cannot take an aligned node
        let mut node = Node::new();
        let err = mm
            .insert_node_generic(&mut node, 6, 4, 0, InsertMode::HIGHEST)
            .unwrap_err();
        assert!(err.is_no_space());
        let node = insert(&mut mm, 6, 4, InsertMode::HIGH);
        assert_eq!(node.start(), 4);

        let mut mm = Mm::new(0, 1000);
        let _a = reserve(&mut mm, 0, 2);
        let _b = reserve(&mut mm, 8, 982);
        // holes: [2,8) [990,1000), the lowest one cannot take an aligned node
        let mut node = Node::new();
        let err = mm
            .insert_node_generic(&mut node, 5, 4, 0, InsertMode::LOWEST)
            .unwrap_err();
        assert!(err.is_no_space());
        let node = insert(&mut mm, 5, 4, InsertMode::LOW);
        assert_eq!(node.start(), 992);
    }

    #[test]
    fn test_insert_in_window() {
        let mut mm = Mm::new(0, 1024);
        let mut node = Node::new();
        mm.insert_node_in_range(&mut node, 64, 64, 0, 100, 300, InsertMode::LOW)
            .unwrap();
        assert_eq!(node.start(), 128);
        let mut high = Node::new();
        mm.insert_node_in_range(&mut high, 64, 64, 0, 100, 300, InsertMode::HIGH)
            .unwrap();
        assert_eq!(high.start(), 192);
        let mut third = Node::new();
        let err = mm
            .insert_node_in_range(&mut third, 64, 64, 0, 100, 300, InsertMode::BEST)
            .unwrap_err();
        assert!(err.is_no_space());
        mm.check_invariants();
    }

    #[test]
    fn test_insert_invalid() {
        let mut mm = Mm::new(0, 1024);
        let mut node = Node::new();
        let cases = [(0, 0, 1024), (1, 10, 10), (1, 20, 10), (1, 0, 1025)];
        for (size, lo, hi) in cases {
            let err = mm
                .insert_node_in_range(&mut node, size, 0, 0, lo, hi, InsertMode::BEST)
                .unwrap_err();
            assert!(err.is_invalid(), "{size} {lo}..{hi}: {err}");
        }
    }

    #[test]
    fn test_insert_no_space() {
        let mut mm = Mm::new(0, 100);
        let _a = insert(&mut mm, 60, 1, InsertMode::BEST);
        let mut node = Node::new();
        let err = mm.insert_node(&mut node, 41).unwrap_err();
        assert!(err.is_no_space());
        assert!(!node.allocated());
        mm.insert_node(&mut node, 40).unwrap();
        assert!(!mm.hole_follows(&node));
        assert_eq!(mm.holes().count(), 0);
    }

    #[test]
    fn test_remove_coalesces() {
        let mut mm = Mm::new(0, 300);
        let mut a = reserve(&mut mm, 0, 100);
        let mut b = reserve(&mut mm, 100, 100);
        let mut c = reserve(&mut mm, 200, 100);
        assert_eq!(mm.holes().count(), 0);

        mm.remove_node(&mut b);
        mm.check_invariants();
        assert_eq!(holes(&mm), vec![100..200]);
        assert!(!b.allocated());

        mm.remove_node(&mut a);
        mm.check_invariants();
        assert_eq!(holes(&mm), vec![0..200]);

        mm.remove_node(&mut c);
        mm.check_invariants();
        assert_eq!(holes(&mm), vec![0..300]);
        mm.takedown();
    }

    #[test]
    fn test_remove_then_reuse_node() {
        let mut mm = Mm::new(0, 100);
        let mut node = insert(&mut mm, 10, 1, InsertMode::BEST);
        let id = node.id().unwrap();
        mm.remove_node(&mut node);
        assert!(mm.get(id).is_none());
        mm.insert_node(&mut node, 20).unwrap();
        assert_ne!(node.id(), Some(id));
        assert_eq!(node.size(), 20);
        mm.remove_node(&mut node);
        mm.takedown();
    }

    #[test]
    #[should_panic(expected = "not allocated")]
    fn test_remove_unallocated() {
        let mut mm = Mm::new(0, 100);
        let mut node = Node::new();
        mm.remove_node(&mut node);
    }

    #[test]
    #[should_panic(expected = "not allocated in this allocator")]
    fn test_remove_stale_handle() {
        let mut mm = Mm::new(0, 100);
        let mut other = Mm::new(0, 100);
        let _a = insert(&mut mm, 10, 1, InsertMode::BEST);
        let mut b = insert(&mut other, 10, 1, InsertMode::LOW);
        let _c = insert(&mut other, 10, 1, InsertMode::LOW);
        other.remove_node(&mut b);
        let mut c = Node::new();
        other.insert_node(&mut c, 10).unwrap();
        // `c` reuses the slot of `b` with a new generation
        mm.remove_node(&mut c);
    }

    #[test]
    fn test_foreign_handle_is_rejected() {
        let mut a = Mm::new(0, 100);
        let mut b = Mm::new(0, 100);
        let na = insert(&mut a, 10, 1, InsertMode::LOW);
        let mut nb = insert(&mut b, 10, 1, InsertMode::LOW);
        // same slot and generation in both allocators
        assert_eq!(na.id().unwrap().index(), nb.id().unwrap().index());
        assert!(a.get(nb.id().unwrap()).is_none());
        assert!(b.get(na.id().unwrap()).is_none());

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            a.remove_node(&mut nb);
        }));
        assert!(result.is_err());
        assert!(nb.allocated());
        assert!(na.allocated());
        assert_eq!(a.len(), 1);
        assert_eq!(b.len(), 1);
        b.check_invariants();
    }

    #[test]
    #[should_panic(expected = "not allocated in this allocator")]
    fn test_replace_foreign_node() {
        let mut a = Mm::new(0, 100);
        let mut b = Mm::new(0, 100);
        let _na = insert(&mut a, 10, 1, InsertMode::LOW);
        let mut nb = insert(&mut b, 10, 1, InsertMode::LOW);
        let mut new = Node::new();
        a.replace_node(&mut nb, &mut new);
    }

    #[test]
    #[should_panic(expected = "already allocated")]
    fn test_double_insert() {
        let mut mm = Mm::new(0, 100);
        let mut node = insert(&mut mm, 10, 1, InsertMode::BEST);
        let _ = mm.insert_node(&mut node, 10);
    }

    #[test]
    #[should_panic(expected = "still allocated at takedown")]
    fn test_takedown_with_nodes() {
        let mut mm = Mm::new(0, 100);
        let _node = insert(&mut mm, 10, 1, InsertMode::BEST);
        mm.takedown();
    }

    #[test]
    fn test_replace() {
        let (mut mm, mut a, _b) = two_reserved();
        let id = a.id().unwrap();
        let mut moved = Node::new();
        mm.replace_node(&mut a, &mut moved);
        mm.check_invariants();
        assert!(!a.allocated());
        assert!(moved.allocated());
        assert_eq!((moved.start(), moved.size()), (100, 100));
        assert_eq!(moved.id(), Some(id));
        assert_eq!(mm.get(id).unwrap().start(), 100);

        mm.replace_node(&mut moved, &mut a);
        assert_eq!(a.id(), Some(id));
        assert_eq!(layout(&mm), vec![(100, 100), (300, 50)]);
        mm.check_invariants();
    }

    #[test]
    fn test_nodes_in_range() {
        let mut mm = Mm::new(0, 1000);
        let _nodes: Vec<_> = [(0, 100), (100, 50), (300, 100), (700, 300)]
            .into_iter()
            .map(|(start, size)| reserve(&mut mm, start, size))
            .collect();
        let starts = |lo, hi| -> Vec<u64> { mm.nodes_in_range(lo, hi).map(|n| n.start()).collect() };
        assert_eq!(starts(0, 1000), vec![0, 100, 300, 700]);
        assert_eq!(starts(99, 101), vec![0, 100]);
        assert_eq!(starts(150, 300), Vec::<u64>::new());
        assert_eq!(starts(150, 301), vec![300]);
        assert_eq!(starts(399, 999), vec![300, 700]);
        assert_eq!(starts(500, 600), Vec::<u64>::new());
        assert_eq!(starts(999, 1000), vec![700]);
    }

    #[test]
    fn test_color_adjust_guard() {
        const A: usize = 1;
        const B: usize = 2;
        let mut mm = Mm::new(0, 100).with_color_adjust(|node, color, start, end| {
            if !node.is_head() && node.color() != color {
                *start += 1;
                *end -= 1;
            }
        });

        let mut a = Node::new();
        mm.insert_node_generic(&mut a, 50, 0, A, InsertMode::LOW)
            .unwrap();
        assert_eq!(a.start(), 0);

        let mut b = Node::new();
        let err = mm
            .insert_node_generic(&mut b, 50, 0, B, InsertMode::LOW)
            .unwrap_err();
        assert!(err.is_no_space());

        mm.insert_node_generic(&mut b, 48, 0, B, InsertMode::LOW)
            .unwrap();
        assert_eq!(b.start(), 51);
        mm.check_invariants();
    }

    #[test]
    fn test_color_adjust_cannot_grow_reservation() {
        let mut mm = Mm::new(0, 200).with_color_adjust(|_node, _color, _start, end| {
            *end += 10;
        });
        let mut a = Node::with_range(50, 50, 0);
        mm.reserve_node(&mut a).unwrap();
        let mut b = Node::with_range(45, 10, 0);
        assert!(mm.reserve_node(&mut b).unwrap_err().is_in_use());
        assert!(!b.allocated());
        mm.check_invariants();
    }

    #[test]
    fn test_color_adjust_reserve() {
        let mut mm = Mm::new(0, 100).with_color_adjust(|node, color, start, _end| {
            if !node.is_head() && node.color() != color {
                *start += 10;
            }
        });
        let _a = {
            let mut node = Node::with_range(0, 10, 1);
            mm.reserve_node(&mut node).unwrap();
            node
        };
        let mut b = Node::with_range(15, 10, 2);
        assert!(mm.reserve_node(&mut b).unwrap_err().is_in_use());
        b.set_range(20, 10);
        mm.reserve_node(&mut b).unwrap();
        let mut c = Node::with_range(30, 10, 2);
        mm.reserve_node(&mut c).unwrap();
        mm.check_invariants();
    }

    #[test]
    fn test_color_adjust_sees_neighbours() {
        let mut mm = Mm::new(0, 300).with_color_adjust(|node, color, _start, end| {
            if node.next().is_some_and(|next| next.color() != color) {
                *end -= 10;
            }
        });
        let mut a = Node::with_range(200, 100, 7);
        mm.reserve_node(&mut a).unwrap();
        let mut b = Node::new();
        mm.insert_node_generic(&mut b, 10, 0, 3, InsertMode::HIGH)
            .unwrap();
        assert_eq!(b.start(), 180);
        // same color as `a`, so the gap in front of it is usable
        let mut c = Node::new();
        mm.insert_node_generic(&mut c, 10, 0, 7, InsertMode::HIGH)
            .unwrap();
        assert_eq!(c.start(), 190);
    }

    #[test]
    fn test_hole_accessors() {
        let (mm, a, b) = two_reserved();
        let a = mm.get(a.id().unwrap()).unwrap();
        assert_eq!(a.hole_start(), 200);
        assert_eq!(a.hole_end(), 300);
        assert!(a.prev().is_none());
        assert_eq!(a.next().map(|n| n.start()), Some(300));
        let b = mm.get(b.id().unwrap()).unwrap();
        assert_eq!(b.hole_end(), 1024);
        assert_eq!(b.next().map(|n| n.start()), None);
    }
}
