//! Debug dump and consistency checking.

use core::fmt;

use crate::Mm;

/// Textual dump of an allocator, created by [`Mm::dump`].
///
/// Each hole and node is printed on its own line in address order, followed
/// by a line with the totals:
///
/// ```text
/// 0x0000000000000000-0x0000000000000064: 100: free
/// 0x0000000000000064-0x00000000000000c8: 100: used
/// 0x00000000000000c8-0x0000000000000400: 824: free
/// total: 1024, used 100 free 924
/// ```
#[derive(Debug, Clone, Copy)]
pub struct Dump<'a> {
    mm: &'a Mm,
}

impl Dump<'_> {
    fn hole(&self, f: &mut fmt::Formatter<'_>, index: usize) -> Result<u64, fmt::Error> {
        let size = self.mm.entry(index).hole_size;
        if size > 0 {
            let start = self.mm.hole_start(index);
            writeln!(f, "{start:#018x}-{:#018x}: {size}: free", start + size)?;
        }
        Ok(size)
    }
}

impl fmt::Display for Dump<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut used = 0;
        let mut free = self.hole(f, Mm::HEAD)?;
        for node in self.mm.nodes() {
            writeln!(
                f,
                "{:#018x}-{:#018x}: {}: used",
                node.start(),
                node.end(),
                node.size()
            )?;
            used += node.size();
            free += self.hole(f, node.index())?;
        }
        writeln!(f, "total: {}, used {used} free {free}", used + free)
    }
}

impl Mm {
    /// Returns a displayable dump of all holes and nodes.
    #[must_use]
    pub fn dump(&self) -> Dump<'_> {
        Dump { mm: self }
    }

    /// Checks the internal consistency of the allocator.
    ///
    /// # Panics
    ///
    /// Panics if any structural invariant is violated.
    pub fn check_invariants(&self) {
        let (base, end) = (self.base(), self.end());
        let mut used = 0;
        let mut free = 0;
        let mut nodes = 0;
        let mut holes = 0;

        let mut index = Self::HEAD;
        loop {
            let entry = self.entry(index);
            let next = entry.next;
            assert_eq!(self.entry(next).prev, index, "broken link after slot {index}");

            let hole_start = self.hole_start(index);
            let hole_end = self.entry(next).start;
            assert!(
                hole_start <= hole_end,
                "slot {index} overlaps its successor: {hole_start:#x} > {hole_end:#x}"
            );
            assert_eq!(
                entry.hole_size,
                hole_end - hole_start,
                "stale hole size after slot {index}"
            );
            free += entry.hole_size;
            if entry.hole_size > 0 {
                holes += 1;
            }

            if next == Self::HEAD {
                break;
            }
            let node = self.entry(next);
            assert!(node.allocated(), "slot {next} is linked but not allocated");
            assert!(node.size > 0, "slot {next} is empty");
            assert!(
                base <= node.start && node.end() <= end,
                "slot {next} lies outside {base:#x}..{end:#x}"
            );
            used += node.size;
            nodes += 1;
            index = next;
        }
        assert_eq!(used + free, end - base, "sizes do not add up to the range");

        assert_eq!(self.interval().len(), nodes, "interval index is out of sync");
        for (start, stop, slot) in self.interval().iter() {
            let entry = self.entry(slot);
            assert!(entry.allocated(), "interval {start:#x} refers to a free slot");
            assert_eq!((entry.start, entry.end()), (start, stop));
        }

        let hole_index = self.holes_index();
        assert_eq!(hole_index.len(), holes, "hole index is out of sync");
        for (start, size, slot) in hole_index.by_size() {
            assert_eq!(self.hole_start(slot), start, "hole {start:#x} moved");
            assert_eq!(self.entry(slot).hole_size, size, "hole {start:#x} resized");
        }
        for (start, slot) in hole_index.by_addr() {
            assert_eq!(self.hole_start(slot), start, "hole {start:#x} moved");
        }

        let mut stacked = 0;
        for slot in self.hole_slots() {
            let entry = self.entry(slot);
            assert!(entry.hole_size > 0, "slot {slot} is stacked without a hole");
            assert!(
                slot == Self::HEAD || entry.allocated(),
                "slot {slot} is stacked but not allocated"
            );
            stacked += 1;
        }
        assert_eq!(stacked, holes, "hole stack is out of sync");
    }
}
