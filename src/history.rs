//! History store (C2, SPEC_FULL §4.2).
//!
//! Grounded on `examples/original_source/src/solver/HistoryEntry.hpp` (not
//! retrieved directly, but named throughout `Solver.hpp`/`BeliefNode.cpp`),
//! which walks a sequence of game states the same way a `HistorySequence`
//! walks a trajectory. Here that history is flattened into an arena of
//! sequences, each an append-only (until truncated) `Vec<HistoryEntry>`,
//! because a POMCP trajectory is linear, not branching -- the branching
//! lives in the belief tree, not in the history store.

use log::trace;

use crate::types::{BeliefId, Discount, EntryId, Reward, SequenceId, StateId};

/// One step of one trajectory (SPEC_FULL §3).
#[derive(Debug, Clone)]
pub struct HistoryEntry<A, O> {
    sequence: SequenceId,
    index: u32,
    state: StateId,
    action: A,
    observation: O,
    reward: Reward,
    discount: Discount,
    /// The belief node this entry's particle belongs to -- i.e. the belief
    /// reached *after* taking `action` and observing `observation`.
    belief: BeliefId,
    /// Set by the rollout strategy on the final entry of a sequence; `None`
    /// on every other entry.
    bootstrap_value: Option<Reward>,
}

impl<A, O> HistoryEntry<A, O> {
    pub fn id(&self) -> EntryId {
        EntryId::new(self.sequence, self.index)
    }

    pub fn state(&self) -> StateId {
        self.state
    }

    pub fn action(&self) -> &A {
        &self.action
    }

    pub fn observation(&self) -> &O {
        &self.observation
    }

    pub fn reward(&self) -> Reward {
        self.reward
    }

    pub fn discount(&self) -> Discount {
        self.discount
    }

    pub fn belief(&self) -> BeliefId {
        self.belief
    }

    pub fn set_belief(&mut self, belief: BeliefId) {
        self.belief = belief;
    }

    pub fn bootstrap_value(&self) -> Option<Reward> {
        self.bootstrap_value
    }

    pub fn set_bootstrap_value(&mut self, value: Reward) {
        self.bootstrap_value = Some(value);
    }

    pub fn set_reward(&mut self, reward: Reward) {
        self.reward = reward;
    }
}

/// Ordered, non-empty list of [`HistoryEntry`] (SPEC_FULL §3).
///
/// Invariant: entries at indices `0..n-2` have a non-terminal state; entry
/// `n-1` is either terminal or truncated by the depth threshold. The engine
/// does not check this invariant directly (it has no notion of "terminal"
/// without the model); the search driver is responsible for only ever
/// appending a final entry once it has confirmed termination or cutoff.
#[derive(Debug, Clone)]
pub struct HistorySequence<A, O> {
    id: SequenceId,
    entries: Vec<HistoryEntry<A, O>>,
}

impl<A, O> HistorySequence<A, O> {
    pub fn id(&self) -> SequenceId {
        self.id
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entry(&self, index: usize) -> &HistoryEntry<A, O> {
        &self.entries[index]
    }

    pub fn entry_mut(&mut self, index: usize) -> &mut HistoryEntry<A, O> {
        &mut self.entries[index]
    }

    pub fn entries(&self) -> &[HistoryEntry<A, O>] {
        &self.entries
    }

    pub fn last(&self) -> Option<&HistoryEntry<A, O>> {
        self.entries.last()
    }

    pub fn last_mut(&mut self) -> Option<&mut HistoryEntry<A, O>> {
        self.entries.last_mut()
    }

    /// Index of the first entry in this sequence whose state is `state`, if
    /// any. Used by the change engine to find the earliest affected index.
    pub fn first_index_of_state(&self, state: StateId) -> Option<usize> {
        self.entries.iter().position(|e| e.state == state)
    }

    /// Index of the last entry in this sequence whose state is in
    /// `states`, if any. Used by the change engine to find the latest
    /// affected index.
    pub fn last_index_of_states(&self, states: &std::collections::HashSet<StateId>) -> Option<usize> {
        self.entries.iter().rposition(|e| states.contains(&e.state))
    }
}

/// Owns all [`HistorySequence`]s and (transitively) all [`HistoryEntry`]s
/// (C2).
#[derive(Debug)]
pub struct HistoryStore<A, O> {
    sequences: Vec<HistorySequence<A, O>>,
}

impl<A, O> HistoryStore<A, O> {
    pub fn new() -> Self {
        Self { sequences: Vec::new() }
    }

    /// Creates a new, empty sequence and returns its ID.
    pub fn create_sequence(&mut self) -> SequenceId {
        let id = SequenceId(self.sequences.len() as u32);
        self.sequences.push(HistorySequence { id, entries: Vec::new() });
        id
    }

    pub fn sequence(&self, id: SequenceId) -> &HistorySequence<A, O> {
        &self.sequences[id.0 as usize]
    }

    pub fn sequence_mut(&mut self, id: SequenceId) -> &mut HistorySequence<A, O> {
        &mut self.sequences[id.0 as usize]
    }

    pub fn sequences(&self) -> impl Iterator<Item = &HistorySequence<A, O>> {
        self.sequences.iter()
    }

    pub fn len(&self) -> usize {
        self.sequences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sequences.is_empty()
    }

    /// Appends a new entry to `sequence`, returning its `EntryId`. The
    /// caller (the search driver) is responsible for registering the
    /// returned ID as a back-reference on the relevant `StateInfo`.
    #[allow(clippy::too_many_arguments)]
    pub fn append_entry(
        &mut self,
        sequence: SequenceId,
        state: StateId,
        action: A,
        observation: O,
        reward: Reward,
        discount: Discount,
        belief: BeliefId,
    ) -> EntryId {
        let seq = self.sequence_mut(sequence);
        let index = seq.entries.len() as u32;
        seq.entries.push(HistoryEntry {
            sequence,
            index,
            state,
            action,
            observation,
            reward,
            discount,
            belief,
            bootstrap_value: None,
        });
        trace!("history store: appended entry {sequence:?}[{index}]");
        EntryId::new(sequence, index)
    }

    /// Deletes every entry from `index` onward, shrinking the sequence.
    /// Returns the removed entries so the caller can invert their
    /// contributions (backup) and release their state back-references.
    pub fn truncate_from(&mut self, sequence: SequenceId, index: usize) -> Vec<HistoryEntry<A, O>> {
        let seq = self.sequence_mut(sequence);
        seq.entries.split_off(index)
    }
}

impl<A, O> Default for HistoryStore<A, O> {
    fn default() -> Self {
        Self::new()
    }
}
