//! Placement of a request inside a hole.
//!
//! Insertion and eviction scanning both go through [`Mm::fit`](crate::Mm),
//! which clips the hole to the request window, lets the color callback shrink
//! it and then calls [`place`]. Sharing this path is what makes a scan pick
//! the same address a later insertion will.

use crate::mode::{InsertMode, Search};

/// A placement request.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Request {
    pub(crate) size: u64,
    /// Always at least 1.
    pub(crate) alignment: u64,
    pub(crate) color: usize,
    pub(crate) range_start: u64,
    pub(crate) range_end: u64,
    pub(crate) search: Search,
    pub(crate) once: bool,
}

impl Request {
    pub(crate) fn new(
        size: u64,
        alignment: u64,
        color: usize,
        range_start: u64,
        range_end: u64,
        mode: InsertMode,
    ) -> Self {
        Self {
            size,
            alignment: alignment.max(1),
            color,
            range_start,
            range_end,
            search: mode.search(),
            once: mode.is_once(),
        }
    }
}

/// Rounds `addr` up to a multiple of `alignment`.
pub(crate) fn align_up(addr: u64, alignment: u64) -> Option<u64> {
    match addr % alignment {
        0 => Some(addr),
        rem => addr.checked_add(alignment - rem),
    }
}

/// Rounds `addr` down to a multiple of `alignment`.
pub(crate) fn align_down(addr: u64, alignment: u64) -> u64 {
    addr - addr % alignment
}

/// Returns the start address of `req` inside the (already clipped and color
/// adjusted) hole `start..end`, or `None` if it does not fit.
pub(crate) fn place(start: u64, end: u64, req: &Request) -> Option<u64> {
    if end <= start || end - start < req.size {
        return None;
    }
    let addr = if req.search.is_top_down() {
        align_down(end - req.size, req.alignment)
    } else {
        align_up(start, req.alignment)?
    };
    (addr >= start && addr <= end && end - addr >= req.size).then_some(addr)
}
