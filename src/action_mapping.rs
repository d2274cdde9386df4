//! Action Mapping (C3, SPEC_FULL §4.3).
//!
//! Grounded on
//! `examples/original_source/src/solver/mappings/actions/discretized_actions.cpp`:
//! a fixed-size array of entries keyed by bin number, a random-access
//! "untried legal bins" set that an entry leaves the moment its visit count
//! first becomes nonzero and re-enters the moment it falls back to zero,
//! and a running best-mean-Q cache recomputed by `update()`.
//!
//! Design Notes' REDESIGN FLAGS call out the source's "deep virtual
//! hierarchy" over discretized vs. continuous action pools and suggest
//! collapsing it to "a vtable or tagged variants" -- here, a plain enum:
//! [`ActionMapping`] dispatches between [`DiscretizedActionMap`] and
//! [`ContinuousActionMap`] without any dynamic dispatch.

use std::collections::VecDeque;

use log::warn;
use rand::seq::SliceRandom;
use rand::RngCore;

use crate::collections::RandomAccessSet;
use crate::model::ActionLike;
use crate::types::{ActionNodeId, BinNumber, Reward};

/// One action slot's bookkeeping: the action itself, its running visit
/// count and total/mean return, legality, and (once first visited) the
/// child [`ActionNodeId`] it leads to.
#[derive(Debug, Clone)]
pub struct ActionMappingEntry<A> {
    action: A,
    visit_count: i64,
    total_q: Reward,
    mean_q: Reward,
    legal: bool,
    child: Option<ActionNodeId>,
}

impl<A> ActionMappingEntry<A> {
    fn new(action: A, legal: bool) -> Self {
        Self {
            action,
            visit_count: 0,
            total_q: 0.0,
            mean_q: Reward::NEG_INFINITY,
            legal,
            child: None,
        }
    }

    pub fn action(&self) -> &A {
        &self.action
    }

    pub fn visit_count(&self) -> i64 {
        self.visit_count
    }

    pub fn mean_q(&self) -> Reward {
        self.mean_q
    }

    pub fn total_q(&self) -> Reward {
        self.total_q
    }

    pub fn is_legal(&self) -> bool {
        self.legal
    }

    pub fn child(&self) -> Option<ActionNodeId> {
        self.child
    }
}

/// Outcome of [`DiscretizedActionMap::update_value`] /
/// [`ContinuousActionMap::update_value`]: whether the refusal path or the
/// normal path was taken, and (on the normal path) whether the entry's
/// mean Q actually changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Applied { mean_changed: bool },
    RefusedNonFinite,
}

impl UpdateOutcome {
    pub fn mean_changed(self) -> bool {
        matches!(self, UpdateOutcome::Applied { mean_changed: true })
    }
}

/// Enumerated/discretized action mapping: one entry per bin, a fixed-size
/// array sized at construction from every bin the model defines.
#[derive(Debug, Clone)]
pub struct DiscretizedActionMap<A> {
    entries: Vec<ActionMappingEntry<A>>,
    /// Bins not yet visited, in the shuffled try order fixed at
    /// construction. Acts as the authoritative "is this bin untried"
    /// membership test; `try_queue` may hold stale entries that no longer
    /// appear here and are discarded on pop.
    untried: RandomAccessSet<BinNumber>,
    try_queue: VecDeque<BinNumber>,
    number_of_visited_entries: usize,
    total_visit_count: i64,
    best_mean_q: Reward,
    best_bin: Option<BinNumber>,
}

impl<A: ActionLike> DiscretizedActionMap<A> {
    /// Builds one entry per action in `all_actions`, indexed by
    /// `action.bin_number()`. `is_legal` marks each bin's initial legality
    /// (illegal bins never enter the untried set). The try order is
    /// shuffled once at construction, matching the reference
    /// implementation's "randomly shuffled bin sequence".
    pub fn new(
        all_actions: Vec<A>,
        is_legal: impl Fn(&A) -> bool,
        rng: &mut dyn RngCore,
    ) -> Self {
        let mut entries: Vec<Option<ActionMappingEntry<A>>> =
            (0..all_actions.len()).map(|_| None).collect();
        let mut bin_order: Vec<BinNumber> = Vec::with_capacity(all_actions.len());
        let mut untried = RandomAccessSet::new();

        for action in all_actions {
            let bin = action.bin_number();
            let legal = is_legal(&action);
            if legal {
                untried.add(bin);
            }
            bin_order.push(bin);
            if bin >= entries.len() {
                entries.resize_with(bin + 1, || None);
            }
            entries[bin] = Some(ActionMappingEntry::new(action, legal));
        }

        bin_order.shuffle(rng);
        let try_queue = bin_order.into_iter().collect();

        Self {
            entries: entries.into_iter().map(|e| e.expect("every bin filled")).collect(),
            untried,
            try_queue,
            number_of_visited_entries: 0,
            total_visit_count: 0,
            best_mean_q: Reward::NEG_INFINITY,
            best_bin: None,
        }
    }

    pub fn get_entry(&self, action: &A) -> Option<&ActionMappingEntry<A>> {
        self.entries.get(action.bin_number())
    }

    pub fn get_entry_by_bin(&self, bin: BinNumber) -> Option<&ActionMappingEntry<A>> {
        self.entries.get(bin)
    }

    pub fn entries(&self) -> impl Iterator<Item = &ActionMappingEntry<A>> {
        self.entries.iter()
    }

    pub fn get_action_node(&self, action: &A) -> Option<ActionNodeId> {
        self.get_entry(action).and_then(|e| e.child)
    }

    /// Installs a new child if the entry has none yet, calling `allocate`
    /// exactly once in that case; idempotent otherwise. `allocate` is
    /// supplied by the belief tree, which owns the actual `ActionNode`
    /// arena.
    pub fn create_action_node<F: FnOnce() -> ActionNodeId>(
        &mut self,
        action: &A,
        allocate: F,
    ) -> ActionNodeId {
        let bin = action.bin_number();
        let entry = &mut self.entries[bin];
        match entry.child {
            Some(id) => id,
            None => {
                let id = allocate();
                entry.child = Some(id);
                id
            }
        }
    }

    /// An untried legal action in the prescribed try order, or `None` if
    /// every legal bin has been visited at least once. Removes the
    /// returned bin from the untried set.
    pub fn get_next_action_to_try(&mut self) -> Option<&A> {
        while let Some(bin) = self.try_queue.pop_front() {
            if self.untried.remove(&bin) {
                return Some(self.entries[bin].action());
            }
        }
        None
    }

    /// Recomputes the best mean-Q entry over all visited legal entries.
    /// O(entries); call whenever a child Q-value changes.
    pub fn update(&mut self) {
        self.best_mean_q = Reward::NEG_INFINITY;
        self.best_bin = None;
        for (bin, entry) in self.entries.iter().enumerate() {
            if entry.legal && entry.visit_count > 0 && entry.mean_q > self.best_mean_q {
                self.best_mean_q = entry.mean_q;
                self.best_bin = Some(bin);
            }
        }
    }

    pub fn best_mean_q(&self) -> Option<Reward> {
        self.best_bin.map(|_| self.best_mean_q)
    }

    pub fn best_action(&self) -> Option<&A> {
        self.best_bin.map(|bin| self.entries[bin].action())
    }

    pub fn number_of_visited_entries(&self) -> usize {
        self.number_of_visited_entries
    }

    pub fn total_visit_count(&self) -> i64 {
        self.total_visit_count
    }

    /// Entries eligible for UCB1 selection: legal and already visited at
    /// least once (SPEC_FULL §4.3, §4.6).
    pub fn visited_legal_entries(&self) -> impl Iterator<Item = &ActionMappingEntry<A>> {
        self.entries.iter().filter(|e| e.legal && e.visit_count > 0)
    }

    pub fn has_any_selectable_action(&self) -> bool {
        !self.untried.is_empty() || self.entries.iter().any(|e| e.legal && e.visit_count > 0)
    }

    /// Transactional update of one entry's visit count and total return.
    /// Refuses (logging, leaving all state untouched) if the resulting
    /// total or mean would be non-finite.
    pub fn update_value(&mut self, action: &A, delta_visit_count: i64, delta_total_q: Reward) -> UpdateOutcome {
        if !delta_total_q.is_finite() {
            warn!("action mapping: refusing non-finite delta_total_q={delta_total_q} for bin {}", action.bin_number());
            return UpdateOutcome::RefusedNonFinite;
        }
        let bin = action.bin_number();
        let entry = &mut self.entries[bin];
        let old_visit = entry.visit_count;
        let new_visit = old_visit + delta_visit_count;
        let new_total = entry.total_q + delta_total_q;
        if !new_total.is_finite() {
            warn!("action mapping: refusing update that would make total_q non-finite for bin {bin}");
            return UpdateOutcome::RefusedNonFinite;
        }

        let old_mean = entry.mean_q;
        let new_mean = if new_visit > 0 { new_total / new_visit as f64 } else { Reward::NEG_INFINITY };

        entry.visit_count = new_visit;
        entry.total_q = new_total;
        entry.mean_q = new_mean;
        let legal = entry.legal;

        self.total_visit_count += delta_visit_count;

        if old_visit == 0 && new_visit != 0 {
            self.number_of_visited_entries += 1;
            if legal {
                self.untried.remove(&bin);
            }
        } else if old_visit != 0 && new_visit == 0 {
            self.number_of_visited_entries -= 1;
            if legal && self.untried.add(bin) {
                self.try_queue.push_back(bin);
            }
        }

        UpdateOutcome::Applied { mean_changed: old_mean != new_mean }
    }

    /// legal -> illegal removes the bin from the untried set; illegal ->
    /// legal with a still-zero visit count re-enters it.
    pub fn set_legal(&mut self, action: &A, legal: bool) {
        let bin = action.bin_number();
        let entry = &mut self.entries[bin];
        entry.legal = legal;
        if !legal {
            self.untried.remove(&bin);
        } else if entry.visit_count == 0 && self.untried.add(bin) {
            self.try_queue.push_back(bin);
        }
    }
}

/// Continuous action mapping: a dynamic collection of sampled action
/// points rather than a fixed bin array. `bin_number` is never consulted;
/// entries are addressed by insertion-order index instead.
#[derive(Debug, Clone, Default)]
pub struct ContinuousActionMap<A> {
    entries: Vec<ActionMappingEntry<A>>,
    untried: RandomAccessSet<usize>,
    try_queue: VecDeque<usize>,
    number_of_visited_entries: usize,
    total_visit_count: i64,
}

impl<A: ActionLike> ContinuousActionMap<A> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            untried: RandomAccessSet::new(),
            try_queue: VecDeque::new(),
            number_of_visited_entries: 0,
            total_visit_count: 0,
        }
    }

    /// Adds a freshly sampled action point, legal by construction (a
    /// continuous pool only ever samples legal actions).
    pub fn add_action_point(&mut self, action: A) -> usize {
        let idx = self.entries.len();
        self.entries.push(ActionMappingEntry::new(action, true));
        self.untried.add(idx);
        self.try_queue.push_back(idx);
        idx
    }

    pub fn entries(&self) -> impl Iterator<Item = &ActionMappingEntry<A>> {
        self.entries.iter()
    }

    pub fn get_next_action_to_try(&mut self) -> Option<&A> {
        while let Some(idx) = self.try_queue.pop_front() {
            if self.untried.remove(&idx) {
                return Some(self.entries[idx].action());
            }
        }
        None
    }

    pub fn visited_legal_entries(&self) -> impl Iterator<Item = &ActionMappingEntry<A>> {
        self.entries.iter().filter(|e| e.legal && e.visit_count > 0)
    }

    pub fn has_any_selectable_action(&self) -> bool {
        !self.untried.is_empty() || self.entries.iter().any(|e| e.legal && e.visit_count > 0)
    }

    pub fn number_of_visited_entries(&self) -> usize {
        self.number_of_visited_entries
    }

    pub fn total_visit_count(&self) -> i64 {
        self.total_visit_count
    }

    /// Installs a new child for an already-sampled action point if it has
    /// none yet; idempotent otherwise. The action must already have an
    /// entry (added via [`Self::add_action_point`]).
    pub fn create_action_node<F: FnOnce() -> ActionNodeId>(&mut self, action: &A, allocate: F) -> ActionNodeId {
        let idx = self
            .entries
            .iter()
            .position(|e| e.action() == action)
            .expect("action must have been added via add_action_point first");
        let entry = &mut self.entries[idx];
        match entry.child {
            Some(id) => id,
            None => {
                let id = allocate();
                entry.child = Some(id);
                id
            }
        }
    }
}

impl<A: ActionLike> Default for ContinuousActionMap<A> {
    fn default() -> Self {
        Self::new()
    }
}

/// Polymorphic over the two variants SPEC_FULL §3 names, dispatched by a
/// tagged enum rather than a trait object (REDESIGN FLAGS).
#[derive(Debug, Clone)]
pub enum ActionMapping<A> {
    Discretized(DiscretizedActionMap<A>),
    Continuous(ContinuousActionMap<A>),
}

impl<A: ActionLike> ActionMapping<A> {
    pub fn get_action_node(&self, action: &A) -> Option<ActionNodeId> {
        match self {
            ActionMapping::Discretized(m) => m.get_action_node(action),
            ActionMapping::Continuous(m) => m.entries.iter().find(|e| e.action == *action).and_then(|e| e.child),
        }
    }

    pub fn has_any_selectable_action(&self) -> bool {
        match self {
            ActionMapping::Discretized(m) => m.has_any_selectable_action(),
            ActionMapping::Continuous(m) => m.has_any_selectable_action(),
        }
    }

    pub fn total_visit_count(&self) -> i64 {
        match self {
            ActionMapping::Discretized(m) => m.total_visit_count(),
            ActionMapping::Continuous(m) => m.total_visit_count(),
        }
    }

    pub fn visited_legal_entries(&self) -> Box<dyn Iterator<Item = &ActionMappingEntry<A>> + '_> {
        match self {
            ActionMapping::Discretized(m) => Box::new(m.visited_legal_entries()),
            ActionMapping::Continuous(m) => Box::new(m.visited_legal_entries()),
        }
    }

    /// Installs a new child `ActionNode` for `action` if absent; idempotent
    /// otherwise (SPEC_FULL §4.3 `createActionNode`).
    pub fn create_action_node<F: FnOnce() -> ActionNodeId>(&mut self, action: &A, allocate: F) -> ActionNodeId {
        match self {
            ActionMapping::Discretized(m) => m.create_action_node(action, allocate),
            ActionMapping::Continuous(m) => m.create_action_node(action, allocate),
        }
    }

    pub fn get_entry(&self, action: &A) -> Option<&ActionMappingEntry<A>> {
        match self {
            ActionMapping::Discretized(m) => m.get_entry(action),
            ActionMapping::Continuous(m) => m.entries.iter().find(|e| e.action == *action),
        }
    }

    /// Every entry, visited or not -- used by `persist::write_tree`, which
    /// (per SPEC_FULL §6.2) saves an entry if it has a nonzero visit count
    /// or an existing child, not just the visited-legal subset used for
    /// search.
    pub fn entries(&self) -> Box<dyn Iterator<Item = &ActionMappingEntry<A>> + '_> {
        match self {
            ActionMapping::Discretized(m) => Box::new(m.entries()),
            ActionMapping::Continuous(m) => Box::new(m.entries()),
        }
    }

    pub fn update_value(&mut self, action: &A, delta_visit_count: i64, delta_total_q: Reward) -> UpdateOutcome {
        match self {
            ActionMapping::Discretized(m) => m.update_value(action, delta_visit_count, delta_total_q),
            ActionMapping::Continuous(m) => {
                if !delta_total_q.is_finite() {
                    warn!("action mapping: refusing non-finite delta_total_q={delta_total_q}");
                    return UpdateOutcome::RefusedNonFinite;
                }
                let idx = m
                    .entries
                    .iter()
                    .position(|e| e.action == *action)
                    .expect("action must have an entry");
                let entry = &mut m.entries[idx];
                let old_visit = entry.visit_count;
                let new_visit = old_visit + delta_visit_count;
                let new_total = entry.total_q + delta_total_q;
                if !new_total.is_finite() {
                    warn!("action mapping: refusing update that would make total_q non-finite");
                    return UpdateOutcome::RefusedNonFinite;
                }
                let old_mean = entry.mean_q;
                entry.mean_q = if new_visit > 0 { new_total / new_visit as f64 } else { Reward::NEG_INFINITY };
                entry.visit_count = new_visit;
                entry.total_q = new_total;
                m.total_visit_count += delta_visit_count;
                if old_visit == 0 && new_visit != 0 {
                    m.number_of_visited_entries += 1;
                    m.untried.remove(&idx);
                } else if old_visit != 0 && new_visit == 0 {
                    m.number_of_visited_entries -= 1;
                    if m.untried.add(idx) {
                        m.try_queue.push_back(idx);
                    }
                }
                UpdateOutcome::Applied { mean_changed: old_mean != entry.mean_q }
            }
        }
    }

    pub fn update(&mut self) {
        if let ActionMapping::Discretized(m) = self {
            m.update();
        }
    }

    pub fn get_next_action_to_try(&mut self) -> Option<&A> {
        match self {
            ActionMapping::Discretized(m) => m.get_next_action_to_try(),
            ActionMapping::Continuous(m) => m.get_next_action_to_try(),
        }
    }

    /// The entry with the highest mean Q among visited legal entries, if
    /// any. Discretized mappings serve this from the cache `update()`
    /// maintains; continuous mappings recompute it on the spot since they
    /// have no fixed bin array to cache against.
    pub fn best_action(&self) -> Option<&A> {
        match self {
            ActionMapping::Discretized(m) => m.best_action(),
            ActionMapping::Continuous(m) => m
                .visited_legal_entries()
                .max_by(|a, b| a.mean_q().partial_cmp(&b.mean_q()).unwrap())
                .map(|e| e.action()),
        }
    }
}
