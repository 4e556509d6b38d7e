//! Contract violations: the only failure mode this core has.
//!
//! Hand-rolled rather than built on `thiserror` — this crate is `no_std`
//! outside test builds, and small no_std helper libraries typically hand-roll
//! their error enums the same way rather than pull in a derive-macro crate.

use core::fmt;

/// A programmer error: double-use of a stale handle, a handle from a
/// different queue, or a node constructed with an invalid weight/slice.
///
/// The arena-backed node handle makes "double-add" and "remove of a detached
/// node" structurally impossible to express — `add` always allocates a fresh
/// slot, and any handle into a freed slot is rejected as
/// [`ContractViolation::StaleHandle`] before it can touch tree state.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContractViolation {
    /// `weight` was zero; every accepted node needs a positive weight.
    ZeroWeight,
    /// `time_slice` was zero.
    ZeroTimeSlice,
    /// The `NodeId` names a different `Queue` instance than the one it was
    /// handed to.
    ForeignQueue,
    /// The `NodeId`'s generation no longer matches its slot: the node it
    /// once named has since been detached (and the slot possibly reused).
    StaleHandle,
}

impl fmt::Display for ContractViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            ContractViolation::ZeroWeight => "node weight must be positive",
            ContractViolation::ZeroTimeSlice => "node time_slice must be positive",
            ContractViolation::ForeignQueue => "NodeId belongs to a different queue",
            ContractViolation::StaleHandle => "NodeId refers to a detached or reused slot",
        };
        f.write_str(msg)
    }
}
