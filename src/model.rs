//! The `Model` interface (SPEC_FULL §6.1) and the supporting capability
//! traits Design Notes §9 calls for: a small `{clone, equals, hash,
//! distanceTo}` contract on `State`/`Observation`, plus `bin_number` on
//! `Action` for the discretized action mapping.
//!
//! The engine is generic over one `M: Model` type parameter everywhere it
//! needs to touch problem-specific values; it never inspects them beyond
//! this trait's methods.

use std::fmt::Debug;
use std::hash::Hash;

use rand::RngCore;

use crate::types::{BinNumber, Reward};

/// Capability set every problem `State` must provide. `distance_to` backs
/// the belief-tree nearest-neighbor search (`distL1Independent`); it need
/// not be a metric, only a nonnegative dissimilarity score.
pub trait StateLike: Clone + PartialEq + Eq + Hash + Debug {
    fn distance_to(&self, other: &Self) -> f64;
}

/// Capability set every problem `Action` must provide. `bin_number` is only
/// consulted by the discretized action mapping; continuous action pools
/// ignore it.
pub trait ActionLike: Clone + PartialEq + Debug {
    fn bin_number(&self) -> BinNumber;
}

/// Capability set every problem `Observation` must provide.
pub trait ObservationLike: Clone + PartialEq + Eq + Hash + Debug {
    /// Used by the continuous observation mapping's nearest-neighbor
    /// acceptance test; discrete mappings never call this.
    fn distance_to(&self, other: &Self) -> f64 {
        if self == other {
            0.0
        } else {
            f64::INFINITY
        }
    }
}

/// Outcome of stepping the model forward by one action.
#[derive(Debug, Clone)]
pub struct StepResult<M: Model> {
    pub next_state: M::State,
    pub observation: M::Observation,
    pub reward: Reward,
    /// `false` means the action was illegal at `state`; `reward` is then
    /// the model's illegal-action penalty and `next_state` is a self-loop
    /// back to the originating state, per SPEC_FULL §6.1.
    pub legal: bool,
}

/// A region of changed states together with the kind of change, as
/// returned by [`Model::apply_change`]. `ADDED`/`DELETED`/`OBSTACLE`/
/// `TRANSITION` all invalidate any history suffix touching the region;
/// `REWARD` alone permits a cheaper in-place repair (SPEC_FULL §4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChangeFlags(u8);

impl ChangeFlags {
    pub const NONE: ChangeFlags = ChangeFlags(0);
    pub const TRANSITION: ChangeFlags = ChangeFlags(1 << 0);
    pub const REWARD: ChangeFlags = ChangeFlags(1 << 1);
    pub const ADDED: ChangeFlags = ChangeFlags(1 << 2);
    pub const DELETED: ChangeFlags = ChangeFlags(1 << 3);
    pub const OBSERVATION: ChangeFlags = ChangeFlags(1 << 4);
    pub const OBSTACLE: ChangeFlags = ChangeFlags(1 << 5);

    pub fn contains(self, other: ChangeFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn intersects(self, other: ChangeFlags) -> bool {
        self.0 & other.0 != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn insert(&mut self, other: ChangeFlags) {
        self.0 |= other.0;
    }

    pub fn clear(&mut self) {
        self.0 = 0;
    }

    /// `true` for any flag that invalidates a history suffix touching the
    /// affected state, per the classification rule in SPEC_FULL §4.8 step 4.
    pub fn invalidates_suffix(self) -> bool {
        self.intersects(
            ChangeFlags::TRANSITION | ChangeFlags::ADDED | ChangeFlags::DELETED | ChangeFlags::OBSTACLE,
        )
    }
}

impl std::ops::BitOr for ChangeFlags {
    type Output = ChangeFlags;
    fn bitor(self, rhs: ChangeFlags) -> ChangeFlags {
        ChangeFlags(self.0 | rhs.0)
    }
}

/// One scheduled change: the simulated time it fires at, the states it
/// covers, and its kind.
#[derive(Debug, Clone)]
pub struct ChangeRecord<M: Model> {
    pub time: u64,
    pub affected_region: Vec<M::State>,
    pub kind: ChangeFlags,
}

/// The external collaborator this engine drives. A concrete problem
/// (RockSample, Tag, an underwater nav grid, ...) implements this once; the
/// engine never depends on anything more specific.
pub trait Model: Sized {
    type State: StateLike;
    type Action: ActionLike;
    type Observation: ObservationLike;

    /// Draws a state from the initial belief.
    fn sample_initial_state(&self, rng: &mut dyn RngCore) -> Self::State;

    /// Pure: is this state terminal?
    fn is_terminal(&self, state: &Self::State) -> bool;

    /// Stochastic transition. Illegal actions self-loop with the
    /// configured illegal-action penalty; see [`StepResult`].
    fn step(&self, state: &Self::State, action: &Self::Action, rng: &mut dyn RngCore) -> StepResult<Self>;

    /// Pure: the reward for being at `state`, optionally having arrived via
    /// `action`.
    fn reward(&self, state: &Self::State, action: Option<&Self::Action>) -> Reward;

    /// Upper-bound or admissible value estimate, used by the
    /// RANDHEURISTIC rollout strategy.
    fn solve_heuristic(&self, state: &Self::State) -> Reward;

    /// Fallback Q-value when a belief has no legal actions at all.
    fn default_value(&self) -> Reward;

    /// Terminal reward when a trajectory ends in a terminal state (as
    /// opposed to being cut off by the depth threshold).
    fn final_reward(&self, state: &Self::State) -> Reward {
        self.reward(state, None)
    }

    /// The full set of actions legal at `state`. For discretized problems
    /// this is the bin sequence fed into the action mapping at
    /// construction time (SPEC_FULL §4.3).
    fn legal_actions(&self, state: &Self::State) -> Vec<Self::Action>;

    /// Every action bin the problem defines, legal or not, keyed by bin
    /// number. Used to size a `DiscretizedActionMap`'s entry array.
    fn all_actions(&self) -> Vec<Self::Action>;

    /// For particle replenishment: states consistent with having taken
    /// `action` and observed `obs`, optionally biased by a `hint` state
    /// (e.g. a parent particle) when the model can use one.
    fn states_from_observation(
        &self,
        action: &Self::Action,
        obs: &Self::Observation,
        hint: Option<&Self::State>,
        rng: &mut dyn RngCore,
    ) -> Vec<Self::State>;

    /// The discount factor, constant for the lifetime of a model instance.
    fn discount(&self) -> f64;

    /// Mutates the model in place to reflect change `kind` over
    /// `affected_region`, returning the set of states actually touched so
    /// the caller can flag them in the state pool. The host is responsible
    /// for deciding *when* a change fires (SPEC_FULL treats
    /// `loadChanges`/schedule ownership as the host's concern); this method
    /// is the apply step alone.
    fn apply_change(
        &mut self,
        affected_region: &[Self::State],
        kind: ChangeFlags,
    ) -> Vec<Self::State>;
}
