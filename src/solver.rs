//! Top-level `Solver` (SPEC_FULL §5, §6.1, §9 Open Question).
//!
//! Grounded on `examples/original_source/src/solver/Solver.hpp`: the same
//! three entry points (`genPol`, `improveSol`, `runSim`) wired over the
//! components built in `search`/`backup`/`change_engine`, owning the RNG,
//! the rollout bandit, and the three arenas (`StatePool`, `HistoryStore`,
//! `BeliefTree`) the rest of the engine operates on.
//!
//! Per the Design Notes' Open Question, `get_best_action`/`get_q_value`
//! always recompute from the mapping's live `best_action()` cache rather
//! than memoizing a value that could go stale across calls.

use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::backup::backup;
use crate::belief_tree::{ActionPool, BeliefTree};
use crate::change_engine::apply_change;
use crate::config::SolverConfig;
use crate::history::HistoryStore;
use crate::model::{ChangeFlags, Model};
use crate::rollout::StrategyBandit;
use crate::search::single_search;
use crate::state_pool::StatePool;
use crate::types::{BeliefId, Reward};

/// One scheduled change fired during [`Solver::run_sim`], paired with the
/// simulated time step it applies at (SPEC_FULL §6.1 `loadChanges`/
/// `applyChange`; schedule ownership is the host's, per §1's Non-goals --
/// the host builds this list however it likes and hands it to `run_sim`).
pub struct ScheduledChange<S> {
    pub time: u64,
    pub affected_region: Vec<S>,
    pub kind: ChangeFlags,
}

/// The real trajectory executed by [`Solver::run_sim`], as opposed to the
/// simulated episodes used to grow the policy.
pub struct Trajectory<M: Model> {
    pub states: Vec<M::State>,
    pub actions: Vec<M::Action>,
    pub observations: Vec<M::Observation>,
    pub rewards: Vec<Reward>,
    pub total_discounted_reward: Reward,
    /// May be less than the requested step count if a terminal state was
    /// reached early.
    pub actual_steps: u64,
}

/// Owns every arena and piece of mutable search state (SPEC_FULL §5
/// "Shared-resource policy"): the `Model`, its `ActionPool`, the tuning
/// knobs, the RNG, the rollout bandit, and the three component arenas.
pub struct Solver<M: Model, P: ActionPool<M>> {
    model: M,
    pool: P,
    config: SolverConfig,
    rng: StdRng,
    bandit: StrategyBandit,
    states: StatePool<M::State>,
    histories: HistoryStore<M::Action, M::Observation>,
    tree: BeliefTree<M>,
    /// The belief node episodes and queries are currently rooted at. Not
    /// necessarily index 0 of the tree's arena: `run_sim` advances this as
    /// the real environment steps forward, reusing the already-grown
    /// subtree rather than discarding it (SPEC_FULL §4.6's `singleSearch`
    /// accepts an arbitrary `startNode`, so nothing about the search driver
    /// requires the root to stay fixed).
    root: BeliefId,
    /// The real environment's current state, separate from any simulated
    /// episode's state.
    current_state: M::State,
}

impl<M: Model, P: ActionPool<M>> Solver<M, P> {
    /// Builds a fresh solver: seeds the RNG, draws an initial state, and
    /// constructs the root belief node's action mapping via `pool`.
    pub fn new(model: M, pool: P, config: SolverConfig, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let initial_state = model.sample_initial_state(&mut rng);
        let tree = BeliefTree::new(&model, &pool, Some(&initial_state), &mut rng);
        let root = tree.root();
        Self {
            model,
            pool,
            config,
            rng,
            bandit: StrategyBandit::default(),
            states: StatePool::new(),
            histories: HistoryStore::new(),
            tree,
            root,
            current_state: initial_state,
        }
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    pub fn root(&self) -> BeliefId {
        self.root
    }

    pub fn current_state(&self) -> &M::State {
        &self.current_state
    }

    /// Generates a starting policy: runs `config.max_trials` episodes
    /// rooted at the tree's root node, using the real environment's current
    /// state as every episode's start state (SPEC_FULL §4.6 "Searches from
    /// the root node for initial policy generation"). Returns the number of
    /// episodes actually run, which can be fewer than `max_trials` if the
    /// time budget runs out first.
    pub fn gen_policy(&mut self) -> u64 {
        let root = self.tree.root();
        self.run_episodes(root, 0)
    }

    /// Improves the solution with the root at an arbitrary belief node
    /// (SPEC_FULL §4.6's `improveSol`): used after `run_sim` has advanced
    /// `self.root` past the tree's original root, to keep growing the
    /// subtree the real trajectory is now walking.
    pub fn improve_solution(&mut self) -> u64 {
        self.run_episodes(self.root, 0)
    }

    fn run_episodes(&mut self, start: BeliefId, start_depth: u32) -> u64 {
        if self.model.is_terminal(&self.current_state) {
            return 0;
        }
        let deadline = self.config.time_budget.map(|budget| (Instant::now(), budget));
        let mut trials_run = 0u64;
        while trials_run < self.config.max_trials {
            if let Some((started_at, budget)) = deadline {
                if started_at.elapsed() >= budget {
                    break;
                }
            }
            let sequence = self.histories.create_sequence();
            single_search(
                &self.model,
                &self.pool,
                &self.config,
                &mut self.rng,
                &mut self.bandit,
                &mut self.states,
                &mut self.histories,
                &mut self.tree,
                sequence,
                start,
                self.current_state.clone(),
                start_depth,
            );
            backup(
                &self.model,
                &self.pool,
                &mut self.rng,
                &self.states,
                &mut self.histories,
                &mut self.tree,
                sequence,
                0,
            );
            trials_run += 1;
        }
        trials_run
    }

    /// The action with the highest mean Q among `belief`'s visited legal
    /// entries, recomputed live off the mapping's own cache rather than any
    /// value memoized by the solver (SPEC_FULL §9 Open Question).
    pub fn get_best_action(&self, belief: BeliefId) -> Option<&M::Action> {
        self.tree.node(belief).mapping().best_action()
    }

    /// `belief`'s current best mean Q, or `-infinity` if it has no visited
    /// legal entries yet.
    pub fn get_q_value(&self, belief: BeliefId) -> Reward {
        let mapping = self.tree.node(belief).mapping();
        mapping
            .best_action()
            .and_then(|action| mapping.get_entry(action))
            .map(|entry| entry.mean_q())
            .unwrap_or(Reward::NEG_INFINITY)
    }

    /// Runs the real environment forward up to `n_steps`, stopping early on
    /// a terminal state. Before each step, applies every scheduled change
    /// whose `time` equals the current step index (SPEC_FULL §5: "the
    /// engine processes all scheduled change records for the current
    /// simulated time before selecting the next action"), then picks
    /// `get_best_action` at the current root, executes it against the real
    /// model, advances `self.root` to the resulting child belief (growing
    /// the tree there via `improve_solution` so the reused subtree stays
    /// populated), and records the transition.
    ///
    /// Falls back to an arbitrary legal action (logging a warning) if the
    /// current root has no visited legal entries yet -- this only happens
    /// if `run_sim` is called before any policy has been generated.
    pub fn run_sim(&mut self, n_steps: u64, changes: &mut Vec<ScheduledChange<M::State>>) -> Trajectory<M> {
        let discount_factor = self.model.discount();
        let mut trajectory = Trajectory {
            states: Vec::new(),
            actions: Vec::new(),
            observations: Vec::new(),
            rewards: Vec::new(),
            total_discounted_reward: 0.0,
            actual_steps: 0,
        };

        let mut discount: Reward = 1.0;
        for t in 0..n_steps {
            if self.model.is_terminal(&self.current_state) {
                break;
            }

            let due: Vec<ScheduledChange<M::State>> = {
                let mut remaining = Vec::with_capacity(changes.len());
                let mut due = Vec::new();
                for change in changes.drain(..) {
                    if change.time == t {
                        due.push(change);
                    } else {
                        remaining.push(change);
                    }
                }
                *changes = remaining;
                due
            };
            for change in due {
                apply_change(
                    &mut self.model,
                    &self.pool,
                    &self.config,
                    &mut self.rng,
                    &mut self.bandit,
                    &mut self.states,
                    &mut self.histories,
                    &mut self.tree,
                    &change.affected_region,
                    change.kind,
                );
            }

            let action = match self.get_best_action(self.root) {
                Some(action) => action.clone(),
                None => {
                    log::warn!("run_sim: root has no visited legal actions yet, falling back to an arbitrary legal action");
                    match self.model.legal_actions(&self.current_state).into_iter().next() {
                        Some(action) => action,
                        None => break,
                    }
                }
            };

            let step = self.model.step(&self.current_state, &action, &mut self.rng);
            let (next_state, reward, observation) = if step.legal {
                (step.next_state, step.reward, step.observation)
            } else {
                (self.current_state.clone(), self.config.illegal_penalty, step.observation)
            };

            trajectory.states.push(self.current_state.clone());
            trajectory.actions.push(action.clone());
            trajectory.observations.push(observation.clone());
            trajectory.rewards.push(reward);
            trajectory.total_discounted_reward += discount * reward;
            trajectory.actual_steps += 1;

            let action_node = self.tree.create_action_node(self.root, &action);
            let (child, _created) = self.tree.create_or_get_child(
                action_node,
                &observation,
                &self.model,
                &self.pool,
                Some(&next_state),
                &mut self.rng,
            );
            self.root = child;
            self.current_state = next_state;
            discount *= discount_factor;

            self.improve_solution();
        }

        trajectory
    }
}
