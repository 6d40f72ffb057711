//! Nodes and node handles.
//!
//! A [`Node`] is owned by the caller and may be embedded in any larger
//! structure. While it is allocated it holds a [`NodeId`] that refers to the
//! bookkeeping entry the [`Mm`] keeps for it: the address list links, the
//! hole stack links, the trailing hole size and the flag bits.

use bitflags::bitflags;
use derive_more::Display;

use crate::Mm;

bitflags! {
    /// State bits of an allocated node.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct NodeFlags: u32 {
        /// The node is placed in an allocator.
        const ALLOCATED = 1 << 0;

        /// The node has been added to an eviction scan.
        const SCANNED = 1 << 1;
    }
}

/// Handle to a node tracked by an [`Mm`].
///
/// Handles are only valid while the node stays allocated in the allocator
/// that issued them. The generation counter makes a stale handle detectable
/// after its slot has been reused, and the allocator id makes a handle from
/// another allocator detectable.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[display("#{mm}:{index}.{generation}")]
pub struct NodeId {
    mm: u32,
    index: u32,
    generation: u32,
}

impl NodeId {
    pub(crate) fn new(mm: u32, index: usize, generation: u32) -> Self {
        let Ok(index) = u32::try_from(index) else {
            panic!("node table index {index} overflows the handle");
        };
        Self {
            mm,
            index,
            generation,
        }
    }

    pub(crate) fn mm(self) -> u32 {
        self.mm
    }

    pub(crate) fn index(self) -> usize {
        self.index as usize
    }

    pub(crate) fn generation(self) -> u32 {
        self.generation
    }
}

/// An interval placed by an [`Mm`].
///
/// The caller owns the node. A cleared node is created with [`Node::new`] (or
/// [`Node::with_range`] for fixed-address reservation) and becomes allocated
/// through [`Mm::reserve_node`] or [`Mm::insert_node_in_range`]. It goes back
/// to the cleared state through [`Mm::remove_node`] or [`Mm::replace_node`],
/// after which it can be reused.
///
/// Nodes are not `Clone`: a node stands for exactly one placed
/// interval.
#[derive(Debug, Default)]
pub struct Node {
    id: Option<NodeId>,
    start: u64,
    size: u64,
    color: usize,
}

impl Node {
    /// Creates a cleared node.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            id: None,
            start: 0,
            size: 0,
            color: 0,
        }
    }

    /// Creates a cleared node describing the fixed interval
    /// `start..start + size`, ready for [`Mm::reserve_node`].
    #[must_use]
    pub const fn with_range(start: u64, size: u64, color: usize) -> Self {
        Self {
            id: None,
            start,
            size,
            color,
        }
    }

    /// Sets the interval used by [`Mm::reserve_node`].
    ///
    /// # Panics
    ///
    /// Panics if the node is allocated.
    pub fn set_range(&mut self, start: u64, size: u64) {
        assert!(!self.allocated(), "cannot move an allocated node");
        self.start = start;
        self.size = size;
    }

    /// Sets the color used by [`Mm::reserve_node`].
    ///
    /// # Panics
    ///
    /// Panics if the node is allocated.
    pub fn set_color(&mut self, color: usize) {
        assert!(!self.allocated(), "cannot recolor an allocated node");
        self.color = color;
    }

    /// Returns the start address of the node.
    #[must_use]
    pub fn start(&self) -> u64 {
        self.start
    }

    /// Returns the size of the node.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Returns the exclusive end address of the node.
    #[must_use]
    pub fn end(&self) -> u64 {
        self.start + self.size
    }

    /// Returns the opaque color tag of the node.
    #[must_use]
    pub fn color(&self) -> usize {
        self.color
    }

    /// Returns `true` if the node is placed in an allocator.
    #[must_use]
    pub fn allocated(&self) -> bool {
        self.id.is_some()
    }

    /// Returns the handle of an allocated node.
    #[must_use]
    pub fn id(&self) -> Option<NodeId> {
        self.id
    }

    pub(crate) fn attach(&mut self, id: NodeId, start: u64, size: u64, color: usize) {
        debug_assert!(self.id.is_none());
        self.id = Some(id);
        self.start = start;
        self.size = size;
        self.color = color;
    }

    pub(crate) fn detach(&mut self) -> Option<NodeId> {
        self.id.take()
    }
}

/// Bookkeeping record of one node in the node table.
#[derive(Debug, Clone)]
pub(crate) struct Entry {
    pub(crate) start: u64,
    pub(crate) size: u64,
    pub(crate) color: usize,
    /// Size of the hole following this node.
    pub(crate) hole_size: u64,
    pub(crate) flags: NodeFlags,
    pub(crate) generation: u32,
    /// Address-ordered list, circular through the head sentinel.
    pub(crate) prev: usize,
    pub(crate) next: usize,
    /// Hole stack, most recently created hole first.
    pub(crate) hole_prev: Option<usize>,
    pub(crate) hole_next: Option<usize>,
}

impl Entry {
    pub(crate) fn vacant(generation: u32) -> Self {
        Self {
            start: 0,
            size: 0,
            color: 0,
            hole_size: 0,
            flags: NodeFlags::empty(),
            generation,
            prev: 0,
            next: 0,
            hole_prev: None,
            hole_next: None,
        }
    }

    pub(crate) fn end(&self) -> u64 {
        self.start + self.size
    }

    pub(crate) fn allocated(&self) -> bool {
        self.flags.contains(NodeFlags::ALLOCATED)
    }

    pub(crate) fn scanned(&self) -> bool {
        self.flags.contains(NodeFlags::SCANNED)
    }
}

/// A read-only view of a node inside an [`Mm`].
///
/// The view may also refer to the head sentinel, which owns the hole in front
/// of the first node (see [`NodeRef::is_head`]). This is what the color
/// adjustment callback receives for the hole it is asked to restrict.
///
/// Nodes that are currently added to an eviction scan are treated as already
/// evicted by [`NodeRef::prev`] and [`NodeRef::next`].
#[derive(Clone, Copy)]
pub struct NodeRef<'a> {
    mm: &'a Mm,
    index: usize,
}

impl<'a> NodeRef<'a> {
    pub(crate) fn new(mm: &'a Mm, index: usize) -> Self {
        Self { mm, index }
    }

    pub(crate) fn index(&self) -> usize {
        self.index
    }

    fn entry(&self) -> &'a Entry {
        self.mm.entry(self.index)
    }

    /// Returns the handle of the node, or `None` for the head sentinel.
    #[must_use]
    pub fn id(&self) -> Option<NodeId> {
        (!self.is_head()).then(|| NodeId::new(self.mm.id(), self.index, self.entry().generation))
    }

    /// Returns `true` if this is the head sentinel rather than a real node.
    #[must_use]
    pub fn is_head(&self) -> bool {
        self.index == Mm::HEAD
    }

    /// Returns the start address of the node.
    #[must_use]
    pub fn start(&self) -> u64 {
        self.entry().start
    }

    /// Returns the size of the node.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.entry().size
    }

    /// Returns the exclusive end address of the node.
    #[must_use]
    pub fn end(&self) -> u64 {
        self.entry().end()
    }

    /// Returns the opaque color tag of the node.
    #[must_use]
    pub fn color(&self) -> usize {
        self.entry().color
    }

    /// Returns the flag bits of the node.
    #[must_use]
    pub fn flags(&self) -> NodeFlags {
        self.entry().flags
    }

    /// Returns `true` if a non-empty hole follows this node.
    #[must_use]
    pub fn hole_follows(&self) -> bool {
        self.entry().hole_size > 0
    }

    /// Returns the size of the hole following this node.
    #[must_use]
    pub fn hole_size(&self) -> u64 {
        self.entry().hole_size
    }

    /// Returns the start of the hole following this node.
    #[must_use]
    pub fn hole_start(&self) -> u64 {
        self.mm.hole_start(self.index)
    }

    /// Returns the end of the hole following this node.
    #[must_use]
    pub fn hole_end(&self) -> u64 {
        self.hole_start() + self.entry().hole_size
    }

    /// Returns the preceding node in address order, if any.
    #[must_use]
    pub fn prev(&self) -> Option<Self> {
        let mut index = self.entry().prev;
        while index != Mm::HEAD && self.mm.entry(index).scanned() {
            index = self.mm.entry(index).prev;
        }
        (index != Mm::HEAD).then(|| Self::new(self.mm, index))
    }

    /// Returns the following node in address order, if any.
    #[must_use]
    pub fn next(&self) -> Option<Self> {
        let mut index = self.entry().next;
        while index != Mm::HEAD && self.mm.entry(index).scanned() {
            index = self.mm.entry(index).next;
        }
        (index != Mm::HEAD).then(|| Self::new(self.mm, index))
    }
}

impl core::fmt::Debug for NodeRef<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        if self.is_head() {
            return f
                .debug_struct("Head")
                .field("hole_size", &self.hole_size())
                .finish();
        }
        f.debug_struct("NodeRef")
            .field("start", &self.start())
            .field("size", &self.size())
            .field("color", &self.color())
            .field("hole_size", &self.hole_size())
            .field("flags", &self.flags())
            .finish()
    }
}
