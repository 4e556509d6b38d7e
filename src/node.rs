//! The scheduling entity carried inside the timeline tree.
//!
//! Every enqueued thread is represented by an [`Entry`]: the scheduler-visible
//! fields (`weight`, `time_slice`, `vruntime`, `vdeadline`, `min_vruntime`)
//! plus the tree linkage and the caller's own payload `T`. Callers never see
//! `Entry` directly — they address it through a [`NodeId`] handed back by
//! [`crate::Queue::add`].

use core::cmp::Ordering;

/// Color of a node in the augmented red-black timeline tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Color {
    Red,
    Black,
}

/// Where a node currently sits in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NodeState {
    /// In the timeline tree, not running.
    Queued,
    /// Selected by the last `schedule` call; outside the tree.
    Current,
}

/// A slot index into a [`crate::tree::Timeline`] arena.
pub(crate) type SlotIndex = u32;

/// Opaque handle to a node enqueued in a particular [`crate::Queue`].
///
/// A `NodeId` is only meaningful for the `Queue` that produced it. It carries
/// a `queue_tag` (unique per queue instance) and a `generation` counter (bumped
/// every time a slot is reused) so that passing a stale or foreign id back
/// into a queue is a detectable contract violation rather than silently
/// operating on the wrong node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeId {
    pub(crate) slot: SlotIndex,
    pub(crate) generation: u32,
    pub(crate) queue_tag: u64,
}

/// An entry in the timeline arena: the scheduling fields plus tree linkage
/// and the caller's payload.
pub(crate) struct Entry<T> {
    pub weight: u32,
    pub time_slice: u32,
    pub vruntime: i64,
    pub vdeadline: i64,
    pub min_vruntime: i64,

    pub parent: Option<SlotIndex>,
    pub left: Option<SlotIndex>,
    pub right: Option<SlotIndex>,
    pub color: Color,

    pub state: NodeState,
    pub payload: T,
}

impl<T> Entry<T> {
    pub fn new(weight: u32, time_slice: u32, vruntime: i64, payload: T) -> Self {
        let vdeadline = deadline_of(vruntime, time_slice, weight);
        Entry {
            weight,
            time_slice,
            vruntime,
            vdeadline,
            min_vruntime: vruntime,
            parent: None,
            left: None,
            right: None,
            color: Color::Red,
            state: NodeState::Queued,
            payload,
        }
    }

    /// Recompute `vdeadline` from the current `vruntime`/`time_slice`/`weight`.
    pub fn refresh_deadline(&mut self) {
        self.vdeadline = deadline_of(self.vruntime, self.time_slice, self.weight);
    }

    #[inline]
    pub fn is_eligible(&self, vtime: i64) -> bool {
        self.vruntime <= vtime
    }
}

/// `vdeadline = vruntime + time_slice / weight`. Truncating integer division
/// toward zero.
#[inline]
pub(crate) fn deadline_of(vruntime: i64, time_slice: u32, weight: u32) -> i64 {
    vruntime + (time_slice as i64) / (weight as i64)
}

/// Ordering used to place nodes in the timeline: primarily by `vdeadline`,
/// with ties broken by slot index. Tie-breaking among equal deadlines is
/// arbitrary and the queue never relies on it.
#[inline]
pub(crate) fn deadline_order(lhs_deadline: i64, lhs_slot: SlotIndex, rhs_deadline: i64, rhs_slot: SlotIndex) -> Ordering {
    lhs_deadline
        .cmp(&rhs_deadline)
        .then_with(|| lhs_slot.cmp(&rhs_slot))
}
