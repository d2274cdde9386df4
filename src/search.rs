//! Search Driver (C6, SPEC_FULL §4.6).
//!
//! Grounded on `examples/original_source/src/solver/Solver.hpp`'s episode
//! loop (`singleSearch`/`multipleSearches`): descend while there's tree to
//! reuse, expand once, then hand off to a value estimate instead of
//! continuing to simulate. Here that handoff is the rollout strategy in
//! `crate::rollout`.

use rand::seq::SliceRandom;
use rand::RngCore;

use crate::action_mapping::ActionMapping;
use crate::belief_tree::{ActionPool, BeliefTree};
use crate::config::SolverConfig;
use crate::history::HistoryStore;
use crate::model::{ActionLike, Model};
use crate::rollout::{RolloutStrategy, StrategyBandit};
use crate::state_pool::StatePool;
use crate::types::{BeliefId, BinNumber, Discount, EntryId, Reward, SequenceId};

/// Runs one episode starting at `start_node`/`start_state`/`start_depth`,
/// appending entries to `sequence` as it goes, and returns the id of the
/// last entry appended -- the frontier backup starts from.
///
/// Precondition: the starting state must be non-terminal and
/// `discount_factor^start_depth` must be at least `config.depth_threshold`;
/// violating this is a caller bug (there would be nothing to search), so
/// it panics rather than returning a sentinel.
#[allow(clippy::too_many_arguments)]
pub fn single_search<M: Model, P: ActionPool<M>>(
    model: &M,
    pool: &P,
    config: &SolverConfig,
    rng: &mut dyn RngCore,
    bandit: &mut StrategyBandit,
    states: &mut StatePool<M::State>,
    histories: &mut HistoryStore<M::Action, M::Observation>,
    tree: &mut BeliefTree<M>,
    sequence: SequenceId,
    start_node: BeliefId,
    start_state: M::State,
    start_depth: u32,
) -> EntryId {
    let discount_factor = model.discount();
    let mut current = start_node;
    let mut state = start_state;
    let mut depth = start_depth;
    let mut discount: Discount = discount_factor.powi(depth as i32);
    let mut last_entry: Option<EntryId> = None;
    let mut expanded = false;

    while discount >= config.depth_threshold && !model.is_terminal(&state) {
        let expansion_action = tree.node_mut(current).mapping_mut().get_next_action_to_try().cloned();
        let (action, is_expansion) = match expansion_action {
            Some(action) => (action, true),
            None => match ucb_select(tree.node(current).mapping(), config.explore_coef) {
                Some(action) => (action, false),
                None => break, // every entry illegal: forced terminal, handled below via default_value
            },
        };

        let step = model.step(&state, &action, rng);
        let (next_state, reward) = if step.legal {
            (step.next_state.clone(), step.reward)
        } else {
            (state.clone(), config.illegal_penalty)
        };
        let observation = step.observation;

        let state_id = states.create_or_get_info(state.clone());
        let entry_id = histories.append_entry(sequence, state_id, action.clone(), observation.clone(), reward, discount, current);
        states.get_info_mut(state_id).add_reference(entry_id);
        tree.add_particle(current, entry_id);
        last_entry = Some(entry_id);

        if is_expansion {
            expanded = true;
            break;
        }

        let action_node = tree.create_action_node(current, &action);
        let (child, _created) = tree.create_or_get_child(action_node, &observation, model, pool, Some(&next_state), rng);
        current = child;
        state = next_state;
        depth += 1;
        discount *= discount_factor;
    }

    let last_entry = last_entry.unwrap_or_else(|| {
        panic!(
            "single_search: called with no room to search (state already terminal or past the depth threshold); this is an engine bug"
        )
    });

    let bootstrap: Reward = if expanded {
        rollout(model, pool, config, rng, bandit, states, histories, tree, current, &state, depth)
    } else if model.is_terminal(&state) {
        model.final_reward(&state)
    } else if tree.node(current).mapping().has_any_selectable_action() {
        0.0 // depth cut-off with at least one legal action: no information beyond the horizon
    } else {
        model.default_value() // all entries illegal: forced terminal (SPEC_FULL §4.3 edge case)
    };

    histories
        .sequence_mut(sequence)
        .last_mut()
        .expect("an entry was just appended above")
        .set_bootstrap_value(bootstrap);

    last_entry
}

/// `UCB(n) = argmax_e (e.meanQ + c * sqrt(ln(n.totalVisits) / e.visits))`,
/// ties broken by lowest bin index.
fn ucb_select<A: ActionLike>(mapping: &ActionMapping<A>, explore_coef: f64) -> Option<A> {
    let ln_total = (mapping.total_visit_count().max(1) as f64).ln();
    let mut best: Option<(A, f64, BinNumber)> = None;
    for entry in mapping.visited_legal_entries() {
        let ucb = entry.mean_q() + explore_coef * (ln_total / entry.visit_count() as f64).sqrt();
        let bin = entry.action().bin_number();
        let take = match &best {
            None => true,
            Some((_, best_ucb, best_bin)) => ucb > *best_ucb || (ucb == *best_ucb && bin < *best_bin),
        };
        if take {
            best = Some((entry.action().clone(), ucb, bin));
        }
    }
    best.map(|(action, _, _)| action)
}

/// Rollout from the expansion frontier (SPEC_FULL §4.6): choose a strategy
/// via the bandit, compute its estimate, and feed the bandit an
/// improvement signal relative to the model's context-free default value
/// (the only baseline available generically; a belief-local baseline would
/// need every sibling's mean Q to already be populated, which the frontier
/// by definition lacks).
#[allow(clippy::too_many_arguments)]
fn rollout<M: Model, P: ActionPool<M>>(
    model: &M,
    pool: &P,
    config: &SolverConfig,
    rng: &mut dyn RngCore,
    bandit: &mut StrategyBandit,
    states: &StatePool<M::State>,
    histories: &HistoryStore<M::Action, M::Observation>,
    tree: &BeliefTree<M>,
    current: BeliefId,
    state: &M::State,
    depth: u32,
) -> Reward {
    let strategy = bandit.choose(rng);
    let estimate = match strategy {
        RolloutStrategy::RandHeuristic => model.solve_heuristic(state),
        RolloutStrategy::Pol => pol_rollout(model, pool, config, rng, states, histories, tree, current, state, depth),
    };
    bandit.update_strategy_probabilities(strategy, estimate - model.default_value());
    estimate
}

/// *POL*: locate a near-neighbor belief via `distL1Independent` (capped at
/// `max_dist_try` candidates, accepting the first within `dist_threshold`
/// and otherwise falling back to the closest one seen so the rollout still
/// produces an estimate), then greedily follow its best actions for the
/// remaining depth budget, accumulating discounted reward.
///
/// The accumulator weighting each step's reward is reset to `1.0` at the
/// rollout's start, not seeded from the global `discount_factor^depth`
/// scale the caller is at -- `backup`'s `discounted_returns` treats the
/// returned bootstrap value as already being at the rollout's own local
/// scale (the same scale `RolloutStrategy::RandHeuristic`'s
/// `solve_heuristic` returns at), so carrying the global scale in here
/// would deflate it by an extra `discount_factor^depth` and bias the
/// strategy bandit against POL at any depth greater than zero. The global
/// scale is still tracked separately, purely to decide when to stop.
#[allow(clippy::too_many_arguments)]
fn pol_rollout<M: Model, P: ActionPool<M>>(
    model: &M,
    _pool: &P,
    config: &SolverConfig,
    rng: &mut dyn RngCore,
    states: &StatePool<M::State>,
    histories: &HistoryStore<M::Action, M::Observation>,
    tree: &BeliefTree<M>,
    current: BeliefId,
    state: &M::State,
    depth: u32,
) -> Reward {
    let discount_factor = model.discount();
    let mut policy_node = find_near_neighbor(tree, states, histories, current, config, rng);

    let mut total = 0.0;
    let mut local_discount: Discount = 1.0;
    let mut global_discount: Discount = discount_factor.powi(depth as i32);
    let mut sim_state = state.clone();

    while global_discount >= config.depth_threshold && !model.is_terminal(&sim_state) {
        let action = policy_node
            .and_then(|n| tree.node(n).mapping().best_action())
            .cloned();
        let Some(action) = action else { break };

        let step = model.step(&sim_state, &action, rng);
        let reward = if step.legal {
            step.reward
        } else {
            log::warn!("POL rollout selected an illegal action at belief {current}; substituting the illegal-action penalty");
            config.illegal_penalty
        };
        total += local_discount * reward;

        let observation = step.observation;
        sim_state = if step.legal { step.next_state } else { sim_state };
        local_discount *= discount_factor;
        global_discount *= discount_factor;

        policy_node = policy_node.and_then(|n| {
            let action_node = tree.node(n).mapping().get_action_node(&action)?;
            tree.get_child(action_node, &observation)
        });
    }

    total
}

fn find_near_neighbor<M: Model>(
    tree: &BeliefTree<M>,
    states: &StatePool<M::State>,
    histories: &HistoryStore<M::Action, M::Observation>,
    current: BeliefId,
    config: &SolverConfig,
    rng: &mut dyn RngCore,
) -> Option<BeliefId> {
    if tree.len() <= 1 {
        return None;
    }
    let state_of = |entry: EntryId| -> M::State {
        let seq = histories.sequence(entry.sequence);
        let e = seq.entry(entry.index as usize);
        states.get_info(e.state()).state().clone()
    };

    let mut candidates: Vec<u32> = (0..tree.len() as u32).collect();
    candidates.shuffle(rng);

    let mut closest: Option<(BeliefId, f64)> = None;
    let mut tried = 0usize;
    for raw in candidates {
        let candidate = BeliefId(raw);
        if candidate == current {
            continue;
        }
        if tried >= config.max_dist_try {
            break;
        }
        tried += 1;
        let distance = tree.dist_l1_independent(current, candidate, state_of);
        if distance <= config.dist_threshold {
            return Some(candidate);
        }
        if closest.map_or(true, |(_, best)| distance < best) {
            closest = Some((candidate, distance));
        }
    }
    closest.map(|(id, _)| id)
}
