//! Backup (C7, SPEC_FULL §4.7).
//!
//! Grounded on `examples/original_source/src/solver/Solver.hpp`'s
//! backpropagation pass (`backup`) and its documented inverse used during
//! change repair. Computes discounted returns from the tail of a completed
//! sequence and folds them into each visited entry's action mapping,
//! lazily materializing the action/observation children a first-visited
//! entry needs.

use std::collections::HashSet;

use rand::RngCore;

use crate::belief_tree::{ActionPool, BeliefTree};
use crate::history::{HistoryEntry, HistoryStore};
use crate::model::Model;
use crate::state_pool::StatePool;
use crate::types::{BeliefId, Reward, SequenceId};

/// `G_L = bootstrap`; `G_i = h_i.reward + gamma * G_{i+1}` for `i` from
/// `L-1` down to `0`. Takes a plain entry slice rather than a
/// `HistorySequence` so the same function serves both a whole sequence and
/// a truncated suffix already popped out of the history store.
pub(crate) fn discounted_returns<A, O>(entries: &[HistoryEntry<A, O>], discount_factor: f64) -> Vec<Reward> {
    let len = entries.len();
    let mut g = vec![0.0; len + 1];
    g[len] = entries.last().and_then(|e| e.bootstrap_value()).unwrap_or(0.0);
    for i in (0..len).rev() {
        g[i] = entries[i].reward() + discount_factor * g[i + 1];
    }
    g
}

/// Applies the backup pass to `sequence` from `from_index` to the end: for
/// each entry from the last down to `from_index`, credits `+G_i` to its
/// action mapping entry, and on a first visit, materializes the action
/// node and observation child so the next episode down this path has
/// somewhere to land. `from_index` is `0` for a freshly completed episode
/// and the resumption point for a change-repair resimulation that only
/// extended a previously backed-up prefix.
#[allow(clippy::too_many_arguments)]
pub fn backup<M: Model, P: ActionPool<M>>(
    model: &M,
    pool: &P,
    rng: &mut dyn RngCore,
    states: &StatePool<M::State>,
    histories: &mut HistoryStore<M::Action, M::Observation>,
    tree: &mut BeliefTree<M>,
    sequence: SequenceId,
    from_index: usize,
) {
    let discount_factor = model.discount();
    let len = histories.sequence(sequence).len();
    if from_index >= len {
        return;
    }
    let g = discounted_returns(histories.sequence(sequence).entries(), discount_factor);

    let mut touched: HashSet<BeliefId> = HashSet::new();
    for i in (from_index..len).rev() {
        let belief = histories.sequence(sequence).entry(i).belief();
        let action = histories.sequence(sequence).entry(i).action().clone();
        let observation = histories.sequence(sequence).entry(i).observation().clone();

        let first_visit = tree
            .node(belief)
            .mapping()
            .get_entry(&action)
            .map(|e| e.visit_count() == 0)
            .unwrap_or(true);

        tree.node_mut(belief).mapping_mut().update_value(&action, 1, g[i]);
        touched.insert(belief);

        if first_visit {
            let action_node = tree.create_action_node(belief, &action);
            let hint_state = if i + 1 < len {
                let next_state_id = histories.sequence(sequence).entry(i + 1).state();
                Some(states.get_info(next_state_id).state().clone())
            } else {
                None
            };
            let (child, _created) = tree.create_or_get_child(action_node, &observation, model, pool, hint_state.as_ref(), rng);
            if i + 1 < len {
                histories.sequence_mut(sequence).entry_mut(i + 1).set_belief(child);
            }
        }
    }

    for belief in touched {
        tree.node_mut(belief).mapping_mut().update();
    }
}

/// The exact inverse of [`backup`] over an arbitrary entry slice: replays
/// the same pass with `(-1, -G_i)` deltas, detaches each entry's particle
/// from the belief node it was added to, and releases each entry's
/// back-reference on the state it pointed at (SPEC_FULL §3's `StateInfo`
/// back-references are only ever added by the search driver; this is their
/// other half). Takes entries directly (rather than a `SequenceId`) so the
/// change engine can invert a suffix it has already popped out of the
/// history store via `truncate_from`.
pub fn remove_path_entries<M: Model>(
    model: &M,
    states: &mut StatePool<M::State>,
    tree: &mut BeliefTree<M>,
    entries: &[HistoryEntry<M::Action, M::Observation>],
) {
    if entries.is_empty() {
        return;
    }
    let discount_factor = model.discount();
    let g = discounted_returns(entries, discount_factor);

    let mut touched: HashSet<BeliefId> = HashSet::new();
    for i in (0..entries.len()).rev() {
        let entry = &entries[i];
        let belief = entry.belief();
        let action = entry.action().clone();
        let entry_id = entry.id();

        tree.node_mut(belief).mapping_mut().update_value(&action, -1, -g[i]);
        tree.remove_particle(belief, entry_id);
        states.get_info_mut(entry.state()).remove_reference(entry_id);
        touched.insert(belief);
    }

    for belief in touched {
        tree.node_mut(belief).mapping_mut().update();
    }
}

/// Inverts a whole sequence still resident in the history store (the
/// common case: backing out an unrepaired trial).
pub fn remove_path_from_belief_node<M: Model>(
    model: &M,
    states: &mut StatePool<M::State>,
    histories: &HistoryStore<M::Action, M::Observation>,
    tree: &mut BeliefTree<M>,
    sequence: SequenceId,
) {
    remove_path_entries(model, states, tree, histories.sequence(sequence).entries());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::belief_tree::DiscretizedActionPool;
    use crate::model::{ActionLike, ChangeFlags, ObservationLike, StateLike, StepResult};
    use crate::search::single_search;
    use crate::rollout::StrategyBandit;
    use crate::config::SolverConfig;
    use crate::types::BinNumber;
    use rand::SeedableRng;

    #[derive(Debug, Clone, PartialEq, Eq, Hash)]
    struct S(i32);
    impl StateLike for S {
        fn distance_to(&self, other: &Self) -> f64 {
            (self.0 - other.0).abs() as f64
        }
    }
    #[derive(Debug, Clone, PartialEq)]
    struct A(usize);
    impl ActionLike for A {
        fn bin_number(&self) -> BinNumber {
            self.0
        }
    }
    #[derive(Debug, Clone, PartialEq, Eq, Hash)]
    struct O(i32);
    impl ObservationLike for O {}

    struct Toy;
    impl Model for Toy {
        type State = S;
        type Action = A;
        type Observation = O;
        fn sample_initial_state(&self, _rng: &mut dyn RngCore) -> S {
            S(0)
        }
        fn is_terminal(&self, state: &S) -> bool {
            state.0 >= 3
        }
        fn step(&self, state: &S, action: &A, _rng: &mut dyn RngCore) -> StepResult<Self> {
            let next = S(state.0 + if action.0 == 0 { 1 } else { 0 });
            StepResult { next_state: next.clone(), observation: O(next.0), reward: -1.0, legal: true }
        }
        fn reward(&self, _state: &S, _action: Option<&A>) -> Reward {
            -1.0
        }
        fn solve_heuristic(&self, _state: &S) -> Reward {
            -1.0
        }
        fn default_value(&self) -> Reward {
            -10.0
        }
        fn legal_actions(&self, _state: &S) -> Vec<A> {
            vec![A(0), A(1)]
        }
        fn all_actions(&self) -> Vec<A> {
            vec![A(0), A(1)]
        }
        fn states_from_observation(&self, _action: &A, _obs: &O, _hint: Option<&S>, _rng: &mut dyn RngCore) -> Vec<S> {
            vec![]
        }
        fn discount(&self) -> f64 {
            0.9
        }
        fn apply_change(&mut self, region: &[S], _kind: ChangeFlags) -> Vec<S> {
            region.to_vec()
        }
    }

    #[test]
    fn backup_credits_the_first_action_entry_and_creates_its_child() {
        let model = Toy;
        let mut rng = rand::rngs::StdRng::seed_from_u64(5);
        let mut tree = BeliefTree::new(&model, &DiscretizedActionPool, Some(&S(0)), &mut rng);
        let mut states = StatePool::new();
        let mut histories = HistoryStore::new();
        let mut bandit = StrategyBandit::default();
        let config = SolverConfig::default();
        let sequence = histories.create_sequence();
        let root = tree.root();

        single_search(&model, &DiscretizedActionPool, &config, &mut rng, &mut bandit, &mut states, &mut histories, &mut tree, sequence, root, S(0), 0);

        let first_action = histories.sequence(sequence).entry(0).action().clone();
        assert_eq!(tree.node(root).mapping().get_entry(&first_action).unwrap().visit_count(), 0);

        backup(&model, &DiscretizedActionPool, &mut rng, &states, &mut histories, &mut tree, sequence, 0);

        let entry = tree.node(root).mapping().get_entry(&first_action).unwrap();
        assert_eq!(entry.visit_count(), 1);
        assert!(entry.child().is_some());
    }

    #[test]
    fn remove_path_is_exact_inverse_of_backup() {
        let model = Toy;
        let mut rng = rand::rngs::StdRng::seed_from_u64(6);
        let mut tree = BeliefTree::new(&model, &DiscretizedActionPool, Some(&S(0)), &mut rng);
        let mut states = StatePool::new();
        let mut histories = HistoryStore::new();
        let mut bandit = StrategyBandit::default();
        let config = SolverConfig::default();
        let sequence = histories.create_sequence();
        let root = tree.root();

        single_search(&model, &DiscretizedActionPool, &config, &mut rng, &mut bandit, &mut states, &mut histories, &mut tree, sequence, root, S(0), 0);
        backup(&model, &DiscretizedActionPool, &mut rng, &states, &mut histories, &mut tree, sequence, 0);

        let first_action = histories.sequence(sequence).entry(0).action().clone();
        let visits_after_backup = tree.node(root).mapping().get_entry(&first_action).unwrap().visit_count();
        assert_eq!(visits_after_backup, 1);

        remove_path_from_belief_node(&model, &mut states, &histories, &mut tree, sequence);
        let entry = tree.node(root).mapping().get_entry(&first_action).unwrap();
        assert_eq!(entry.visit_count(), 0);
        assert_eq!(tree.node(root).particle_count(), 0);
    }
}
