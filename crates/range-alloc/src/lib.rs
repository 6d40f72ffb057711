//! A range allocator for address spaces such as GPU virtual memory.
//!
//! [`Mm`] manages a contiguous range of `u64` addresses and hands out
//! non-overlapping sub-ranges ("nodes") of it. Nodes can be placed at a fixed
//! address or searched for with size, alignment, color and window
//! constraints, and an eviction [`Scan`] finds which existing nodes to evict
//! to make room for a request that does not fit.
//!
//! # Features
//!
//! - **Caller-owned nodes**: [`Node`] can be embedded in any caller structure
//! - **Four search orders**: best fit, lowest address, highest address and
//!   most recently freed (see [`InsertMode`])
//! - **Coloring**: a callback can shrink holes next to incompatible neighbours
//! - **Eviction scanning**: LRU-driven search for a contiguous range
//! - **No-std support**: only needs `alloc`
//!
//! # Examples
//!
//! ```
//! use range_alloc::{InsertMode, Mm, Node};
//!
//! let mut mm = Mm::new(0, 256);
//! let mut nodes: Vec<Node> = (0..4).map(|_| Node::new()).collect();
//! for node in &mut nodes {
//!     mm.insert_node_generic(node, 64, 0, 0, InsertMode::LOW).unwrap();
//! }
//!
//! // The allocator is full; find what to evict for 128 bytes.
//! let mut node = Node::new();
//! assert!(mm.insert_node(&mut node, 128).unwrap_err().is_no_space());
//!
//! let mut scan = mm.scan(128, 0, 0, InsertMode::EVICT).unwrap();
//! let mut added = vec![];
//! for (i, node) in nodes.iter().enumerate().skip(1) {
//!     added.push(i);
//!     if scan.add_block(node) {
//!         break;
//!     }
//! }
//! let mut evict = vec![];
//! for &i in added.iter().rev() {
//!     if scan.remove_block(&nodes[i]) {
//!         evict.push(i);
//!     }
//! }
//! let hit = scan.finish();
//! assert_eq!(hit.hit(), Some(64..192));
//!
//! for i in evict {
//!     mm.remove_node(&mut nodes[i]);
//! }
//! mm.insert_node_generic(&mut node, 128, 0, 0, InsertMode::EVICT)
//!     .unwrap();
//! assert_eq!(node.start(), 64);
//! ```

#![cfg_attr(not(test), no_std)]
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

extern crate alloc;

pub use self::{
    dump::Dump,
    error::MmError,
    mm::{ColorAdjustFn, Holes, Mm, Nodes},
    mode::InsertMode,
    node::{Node, NodeFlags, NodeId, NodeRef},
    scan::{Scan, ScanHit},
};

mod dump;
mod error;
mod holes;
mod interval;
mod list;
mod mm;
mod mode;
mod node;
mod placement;
mod scan;
