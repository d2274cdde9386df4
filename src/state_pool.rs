//! State Pool / State Index (C1, SPEC_FULL §4.1).
//!
//! Grounded on `examples/original_source/src/solver/StatePool.hpp`: a
//! canonicalizing map keyed by state equality/hash (there, a
//! `std::unordered_map` with custom hash/equality functors over
//! `State const *`; here, a plain `HashMap<M::State, StateId>` since our
//! `State` values are owned, not behind a serializer-managed pointer) plus
//! a dense `Vec` indexed by ID, and a side-set of "changed" IDs for the
//! change engine to sweep.

use std::collections::{HashMap, HashSet};

use log::{error, trace};

use crate::model::{ChangeFlags, StateLike};
use crate::types::{EntryId, StateId};

/// Wraps a problem `State` with engine bookkeeping: a stable ID, the
/// change-flag bitmask from the most recent model update, and every
/// history-entry address that currently references this state (SPEC_FULL
/// §3, `StateInfo`).
///
/// The back-reference set is a non-owning index list, rebuilt from scratch
/// whenever a tree is loaded from persistence (Design Notes §9).
#[derive(Debug, Clone)]
pub struct StateInfo<S> {
    id: StateId,
    state: S,
    flags: ChangeFlags,
    referencing_entries: HashSet<EntryId>,
}

impl<S> StateInfo<S> {
    pub fn id(&self) -> StateId {
        self.id
    }

    pub fn state(&self) -> &S {
        &self.state
    }

    pub fn flags(&self) -> ChangeFlags {
        self.flags
    }

    pub fn referencing_entries(&self) -> impl Iterator<Item = EntryId> + '_ {
        self.referencing_entries.iter().copied()
    }

    /// Records that `entry` now points at this state. Called by the
    /// history store whenever an entry is appended or its state info is
    /// rebuilt on load.
    pub fn add_reference(&mut self, entry: EntryId) {
        self.referencing_entries.insert(entry);
    }

    pub fn remove_reference(&mut self, entry: EntryId) {
        self.referencing_entries.remove(&entry);
    }
}

/// Canonicalizing pool of problem states (C1).
///
/// Invariant (SPEC_FULL §3): for states `s1 == s2`,
/// `create_or_get_info(s1)` and `create_or_get_info(s2)` return the same
/// [`StateId`]. IDs are dense and contiguous starting at zero.
#[derive(Debug)]
pub struct StatePool<S> {
    by_value: HashMap<S, StateId>,
    infos: Vec<StateInfo<S>>,
    affected: HashSet<StateId>,
}

impl<S: StateLike> StatePool<S> {
    pub fn new() -> Self {
        Self {
            by_value: HashMap::new(),
            infos: Vec::new(),
            affected: HashSet::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.infos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }

    /// Canonicalizing insert: returns the incumbent `StateId` if an equal
    /// state already exists, otherwise takes ownership of `state`, assigns
    /// the next dense ID, and indexes it.
    pub fn create_or_get_info(&mut self, state: S) -> StateId {
        if let Some(&id) = self.by_value.get(&state) {
            return id;
        }
        let id = StateId(self.infos.len() as u32);
        self.by_value.insert(state.clone(), id);
        self.infos.push(StateInfo {
            id,
            state,
            flags: ChangeFlags::NONE,
            referencing_entries: HashSet::new(),
        });
        trace!("state pool: inserted new state {id}");
        id
    }

    /// Look up the ID of an already-inserted state without inserting.
    pub fn get_id(&self, state: &S) -> Option<StateId> {
        self.by_value.get(state).copied()
    }

    pub fn get_info(&self, id: StateId) -> &StateInfo<S> {
        self.infos.get(id.0 as usize).unwrap_or_else(|| {
            error!("state pool: out-of-range state id {id}");
            panic!("StatePool::get_info: out-of-range state id {id}: this is an engine bug, not a recoverable error");
        })
    }

    pub fn get_info_mut(&mut self, id: StateId) -> &mut StateInfo<S> {
        let infos_len = self.infos.len();
        self.infos.get_mut(id.0 as usize).unwrap_or_else(|| {
            error!("state pool: out-of-range state id {id} (pool has {infos_len} states)");
            panic!("StatePool::get_info_mut: out-of-range state id {id}: this is an engine bug, not a recoverable error");
        })
    }

    /// OR `flags` into `id`'s change mask and record `id` in the affected
    /// set for the change engine to sweep.
    pub fn set_change_flags(&mut self, id: StateId, flags: ChangeFlags) {
        let info = self.get_info_mut(id);
        info.flags.insert(flags);
        self.affected.insert(id);
    }

    pub fn affected_states(&self) -> impl Iterator<Item = StateId> + '_ {
        self.affected.iter().copied()
    }

    pub fn has_affected_states(&self) -> bool {
        !self.affected.is_empty()
    }

    /// Clears the flag set on every affected state and empties the
    /// affected set. Must run exactly once per change cycle, after repair
    /// has consumed the flags (SPEC_FULL §4.1, §4.8 step 7).
    pub fn reset_affected_states(&mut self) {
        for id in self.affected.drain() {
            if let Some(info) = self.infos.get_mut(id.0 as usize) {
                info.flags.clear();
            }
        }
    }
}

impl<S: StateLike> Default for StatePool<S> {
    fn default() -> Self {
        Self::new()
    }
}
