use core::{fmt, ops::BitOr};

use derive_more::IsVariant;

/// Controls which hole is searched first and where the node is placed inside
/// it.
///
/// The low bits select one of the four search strategies, and
/// [`ONCE`](Self::ONCE) may be or-ed in to restrict the search to the first
/// candidate hole.
///
/// # Examples
///
/// ```
/// use range_alloc::InsertMode;
///
/// assert_eq!(InsertMode::HIGH | InsertMode::ONCE, InsertMode::HIGHEST);
/// assert!(InsertMode::LOWEST.is_once());
/// assert_eq!(InsertMode::LOWEST.bits(), 0x8000_0001);
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct InsertMode(u32);

impl InsertMode {
    /// Search for the smallest hole that fits, allocating from its bottom.
    pub const BEST: Self = Self(0);

    /// Search for the lowest-address hole that fits, allocating from its
    /// bottom.
    pub const LOW: Self = Self(1);

    /// Search for the highest-address hole that fits, allocating from its
    /// top.
    ///
    /// Alignment is applied to the start of the node.
    pub const HIGH: Self = Self(2);

    /// Search for the most recently created hole that fits, allocating from
    /// its bottom.
    ///
    /// This is meant to be used right after an eviction scan has emptied a
    /// hole.
    pub const EVICT: Self = Self(3);

    /// Only check the first candidate hole.
    pub const ONCE: Self = Self(1 << 31);

    /// Only check the highest hole.
    pub const HIGHEST: Self = Self(Self::HIGH.0 | Self::ONCE.0);

    /// Only check the lowest hole.
    pub const LOWEST: Self = Self(Self::LOW.0 | Self::ONCE.0);

    const SEARCH_MASK: u32 = 0b11;

    /// Builds a mode from its raw bit representation.
    ///
    /// Returns `None` if reserved bits are set.
    #[must_use]
    pub const fn from_bits(bits: u32) -> Option<Self> {
        if bits & !(Self::SEARCH_MASK | Self::ONCE.0) != 0 {
            return None;
        }
        Some(Self(bits))
    }

    /// Returns the raw bit representation.
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Returns `true` if only the first candidate hole is checked.
    #[must_use]
    pub const fn is_once(self) -> bool {
        self.0 & Self::ONCE.0 != 0
    }

    /// Returns the mode without the [`ONCE`](Self::ONCE) bit.
    #[must_use]
    pub const fn without_once(self) -> Self {
        Self(self.0 & !Self::ONCE.0)
    }

    pub(crate) const fn search(self) -> Search {
        match self.0 & Self::SEARCH_MASK {
            0 => Search::Best,
            1 => Search::Low,
            2 => Search::High,
            _ => Search::Evict,
        }
    }
}

impl BitOr for InsertMode {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Debug for InsertMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self.search() {
            Search::Best => "BEST",
            Search::Low => "LOW",
            Search::High => "HIGH",
            Search::Evict => "EVICT",
        };
        if self.is_once() {
            write!(f, "InsertMode({name} | ONCE)")
        } else {
            write!(f, "InsertMode({name})")
        }
    }
}

/// The hole ordering selected by an [`InsertMode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, IsVariant)]
pub(crate) enum Search {
    Best,
    Low,
    High,
    Evict,
}

impl Search {
    /// Placement is at the top of the hole.
    pub(crate) fn is_top_down(self) -> bool {
        self.is_high()
    }
}
