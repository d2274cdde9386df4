//! Observation Mapping (C4, SPEC_FULL §4.4) and [`ActionNode`].
//!
//! Grounded on `examples/original_source/src/solver/BeliefNode.hpp`'s
//! sibling mapping classes: a discrete hash map keyed by observation value,
//! and -- for continuous observation spaces -- an approximate
//! nearest-neighbor structure using the model's distance function and a
//! fixed acceptance threshold. As with [`crate::action_mapping`], the two
//! variants are collapsed into one tagged enum rather than a trait object.

use std::collections::HashMap;

use crate::model::ObservationLike;
use crate::types::{ActionNodeId, BeliefId};

/// Owns an [`ObservationMapping`] and a back-pointer to its entry in the
/// parent belief's `ActionMapping` (SPEC_FULL §3). The back-pointer is the
/// action itself rather than a raw entry index, since entries are
/// addressed by action/bin, not by a separate handle.
#[derive(Debug, Clone)]
pub struct ActionNode<O> {
    parent_belief: BeliefId,
    mapping: ObservationMapping<O>,
}

impl<O: ObservationLike> ActionNode<O> {
    pub fn new(parent_belief: BeliefId) -> Self {
        Self {
            parent_belief,
            mapping: ObservationMapping::new(),
        }
    }

    pub fn parent_belief(&self) -> BeliefId {
        self.parent_belief
    }

    pub fn mapping(&self) -> &ObservationMapping<O> {
        &self.mapping
    }

    pub fn mapping_mut(&mut self) -> &mut ObservationMapping<O> {
        &mut self.mapping
    }
}

/// Discrete observation mapping: an exact hash map. Continuous spaces use
/// [`ObservationMapping::with_threshold`] instead, which accepts a
/// nearest-neighbor match within `threshold` as identical.
#[derive(Debug, Clone)]
pub struct ObservationMapping<O> {
    children: HashMap<ObsKey<O>, BeliefId>,
    threshold: Option<f64>,
}

/// Wraps `O` so it can key a `HashMap` even when it only implements
/// `PartialEq`/non-exact `Eq` semantics through [`ObservationLike`]; the
/// discrete path relies on `O: Eq + Hash` directly, so this is a thin
/// newtype rather than a custom hasher.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ObsKey<O>(O);

impl<O: ObservationLike> ObservationMapping<O> {
    pub fn new() -> Self {
        Self {
            children: HashMap::new(),
            threshold: None,
        }
    }

    /// Continuous variant: observations within `threshold` (per
    /// `O::distance_to`) of an existing key map to the same child.
    pub fn with_threshold(threshold: f64) -> Self {
        Self {
            children: HashMap::new(),
            threshold: Some(threshold),
        }
    }

    fn resolve_key(&self, obs: &O) -> Option<O> {
        match self.threshold {
            None => self.children.contains_key(&ObsKey(obs.clone())).then(|| obs.clone()),
            Some(threshold) => self
                .children
                .keys()
                .map(|k| &k.0)
                .find(|candidate| candidate.distance_to(obs) <= threshold)
                .cloned(),
        }
    }

    pub fn get_child(&self, obs: &O) -> Option<BeliefId> {
        let key = self.resolve_key(obs)?;
        self.children.get(&ObsKey(key)).copied()
    }

    /// Installs a new child belief for `obs` if none exists yet (exact
    /// match, or nearest-neighbor within threshold for continuous
    /// mappings); returns the child along with whether it was just
    /// created. `allocate` is called at most once and produces the fresh
    /// `BeliefId` from the belief tree's arena.
    pub fn create_or_get_child<F: FnOnce() -> BeliefId>(&mut self, obs: &O, allocate: F) -> (BeliefId, bool) {
        if let Some(id) = self.get_child(obs) {
            return (id, false);
        }
        let id = allocate();
        self.children.insert(ObsKey(obs.clone()), id);
        (id, true)
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    pub fn children(&self) -> impl Iterator<Item = (&O, BeliefId)> {
        self.children.iter().map(|(k, &v)| (&k.0, v))
    }
}

impl<O: ObservationLike> Default for ObservationMapping<O> {
    fn default() -> Self {
        Self::new()
    }
}
