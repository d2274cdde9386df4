//! Scalar types and small newtype indices shared across the engine.
//!
//! Every cross-module reference in this crate (entry -> belief, state-info ->
//! entries, action-node -> observation children, ...) is one of the index
//! types below: a `Copy` integer handle into an arena owned by exactly one
//! component. None of them are smart pointers, so there is nothing to leak
//! and nothing to deadlock on.

use std::fmt;

/// Discounted return / immediate reward. ABT and its descendants use `f64`
/// throughout since Q-value drift compounds over long trajectories.
pub type Reward = f64;
/// A discount factor or a power of one (`gamma^depth`).
pub type Discount = f64;
/// A distance or acceptance-threshold scalar, kept distinct from `Reward`
/// for readability even though both are `f64`.
pub type Distance = f64;

/// Index into [`crate::state_pool::StatePool`]'s arena. Dense and
/// contiguous: IDs are handed out in insertion order starting at zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StateId(pub u32);

impl fmt::Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Index into [`crate::belief_tree::BeliefTree`]'s node arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BeliefId(pub u32);

impl fmt::Display for BeliefId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Index into [`crate::belief_tree::BeliefTree`]'s action-node arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ActionNodeId(pub u32);

/// Index into [`crate::history::HistoryStore`]'s sequence arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SequenceId(pub u32);

/// A `(sequence, index-within-sequence)` pair: the stable address of one
/// `HistoryEntry`, and exactly the pair the persisted-tree format (SPEC_FULL
/// §6.2) uses to name a particle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntryId {
    pub sequence: SequenceId,
    pub index: u32,
}

impl EntryId {
    pub fn new(sequence: SequenceId, index: u32) -> Self {
        Self { sequence, index }
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.sequence.0, self.index)
    }
}

/// Discretized action bin number (SPEC_FULL §9, `DiscretizedPoint`).
pub type BinNumber = usize;
