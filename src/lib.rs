//! An augmented-tree EEVDF scheduler run queue.
//!
//! One red-black tree keyed by virtual deadline, each subtree augmented with
//! its minimum virtual runtime, selecting the eligible node with the
//! earliest deadline in `O(log N)`. Nodes are addressed through an opaque,
//! generation-checked [`NodeId`] handle rather than raw intrusive pointers,
//! so moving a node in memory while it's enqueued simply can't be expressed.
//!
//! `no_std` outside test builds: the crate needs `alloc` for the timeline
//! arena but has no use for `std` itself, so a kernel caller can embed it
//! directly.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

mod error;
mod node;
mod percpu;
mod queue;
mod tree;
mod weight;

pub use error::ContractViolation;
pub use node::NodeId;
pub use percpu::PerCpuQueues;
pub use queue::{Queue, Scheduled};
pub use weight::Weight;
