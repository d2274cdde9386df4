//! Change Engine (C8, SPEC_FULL §4.8).
//!
//! Grounded on `examples/original_source/src/solver/Solver.hpp`'s change
//! handling (`applyChanges`): flag every touched state, find every
//! sequence that passed through one, and either cheaply patch rewards in
//! place or throw away and re-simulate the invalidated suffix.

use std::collections::HashSet;

use rand::RngCore;

use crate::backup::{backup, discounted_returns, remove_path_entries};
use crate::belief_tree::{ActionPool, BeliefTree};
use crate::config::SolverConfig;
use crate::history::HistoryStore;
use crate::model::{ChangeFlags, Model};
use crate::rollout::StrategyBandit;
use crate::search::single_search;
use crate::state_pool::StatePool;
use crate::types::{SequenceId, StateId};

/// Applies one time step's change to `model`, flags every touched state in
/// `states`, and repairs every history sequence that passed through one of
/// them -- either a cheap reward-only delta backup or a full invalidate +
/// resimulate, per SPEC_FULL §4.8 step 4's classification rule.
#[allow(clippy::too_many_arguments)]
pub fn apply_change<M: Model, P: ActionPool<M>>(
    model: &mut M,
    pool: &P,
    config: &SolverConfig,
    rng: &mut dyn RngCore,
    bandit: &mut StrategyBandit,
    states: &mut StatePool<M::State>,
    histories: &mut HistoryStore<M::Action, M::Observation>,
    tree: &mut BeliefTree<M>,
    affected_region: &[M::State],
    kind: ChangeFlags,
) {
    let touched = model.apply_change(affected_region, kind);

    let mut flagged: HashSet<StateId> = HashSet::new();
    for state in &touched {
        if let Some(id) = states.get_id(state) {
            states.set_change_flags(id, kind);
            flagged.insert(id);
        }
    }
    if flagged.is_empty() {
        states.reset_affected_states();
        return;
    }

    // Walk the back-references on the flagged StateInfo's rather than
    // scanning every sequence (SPEC_FULL §4.8 step 3).
    let mut affected_sequences: HashSet<SequenceId> = HashSet::new();
    for &id in &flagged {
        for entry_id in states.get_info(id).referencing_entries() {
            affected_sequences.insert(entry_id.sequence);
        }
    }
    let affected_sequences: Vec<_> = affected_sequences.into_iter().collect();

    for sequence in affected_sequences {
        let Some(s_idx) = histories.sequence(sequence).entries().iter().position(|e| flagged.contains(&e.state())) else {
            continue;
        };

        if kind.invalidates_suffix() {
            let removed = histories.truncate_from(sequence, s_idx);
            remove_path_entries(model, states, tree, &removed);

            let resume_belief = removed[0].belief();
            let resume_state_id = removed[0].state();
            let resume_state = states.get_info(resume_state_id).state().clone();
            let resume_depth = s_idx as u32;

            if model.is_terminal(&resume_state) {
                // The edge the sequence re-entered from no longer leads
                // anywhere simulatable (SPEC_FULL §4.8 Failure clause):
                // detach the sequence entirely, inverting its surviving
                // prefix too.
                let prefix = histories.truncate_from(sequence, 0);
                remove_path_entries(model, states, tree, &prefix);
                continue;
            }

            single_search(model, pool, config, rng, bandit, states, histories, tree, sequence, resume_belief, resume_state, resume_depth);
            backup(model, pool, rng, states, histories, tree, sequence, s_idx);
        } else {
            let discount_factor = model.discount();
            let old_g = discounted_returns(histories.sequence(sequence).entries(), discount_factor);
            let len = histories.sequence(sequence).len();

            for i in s_idx..len {
                let state_id = histories.sequence(sequence).entry(i).state();
                let state = states.get_info(state_id).state().clone();
                let action = histories.sequence(sequence).entry(i).action().clone();
                let refreshed = model.reward(&state, Some(&action));
                histories.sequence_mut(sequence).entry_mut(i).set_reward(refreshed);
            }

            // old_g[i]/new_g[i] differ for every i, not just i >= s_idx: the
            // backward recursion in discounted_returns means an ancestor
            // entry's return shifts by the same delta as every descendant
            // whose reward just changed (SPEC_FULL §4.8 step 6 / testable
            // property S4).
            let new_g = discounted_returns(histories.sequence(sequence).entries(), discount_factor);
            let mut touched_beliefs = HashSet::new();
            for i in 0..len {
                let belief = histories.sequence(sequence).entry(i).belief();
                let action = histories.sequence(sequence).entry(i).action().clone();
                tree.node_mut(belief).mapping_mut().update_value(&action, 0, new_g[i] - old_g[i]);
                touched_beliefs.insert(belief);
            }
            for belief in touched_beliefs {
                tree.node_mut(belief).mapping_mut().update();
            }
        }
    }

    states.reset_affected_states();
}
