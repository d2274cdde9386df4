//! Property tests over the seven invariants the components are designed to
//! maintain across search, backup, and change-repair cycles (SPEC_FULL §8).

mod support;

use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::SeedableRng;

use abt_solver::backup::{backup, remove_path_from_belief_node};
use abt_solver::belief_tree::{BeliefTree, DiscretizedActionPool};
use abt_solver::config::SolverConfig;
use abt_solver::history::HistoryStore;
use abt_solver::model::ChangeFlags;
use abt_solver::rollout::StrategyBandit;
use abt_solver::search::single_search;
use abt_solver::solver::Solver;
use abt_solver::state_pool::StatePool;

use support::{GridAction, GridModel, GridObs, GridState};

fn fixture() -> (
    GridModel,
    StdRng,
    StatePool<GridState>,
    HistoryStore<GridAction, GridObs>,
    BeliefTree<GridModel>,
    StrategyBandit,
    SolverConfig,
) {
    let model = GridModel::default();
    let mut rng = StdRng::seed_from_u64(7);
    let initial = GridState { pos: 0, rock_good: true };
    let tree = BeliefTree::new(&model, &DiscretizedActionPool, Some(&initial), &mut rng);
    let states = StatePool::new();
    let histories = HistoryStore::new();
    let bandit = StrategyBandit::default();
    let config = SolverConfig::builder().max_trials(300).discount(model.discount()).build();
    (model, rng, states, histories, tree, bandit, config)
}

fn run_episodes(
    model: &GridModel,
    rng: &mut StdRng,
    states: &mut StatePool<GridState>,
    histories: &mut HistoryStore<GridAction, GridObs>,
    tree: &mut BeliefTree<GridModel>,
    bandit: &mut StrategyBandit,
    config: &SolverConfig,
    n: usize,
) {
    let root = tree.root();
    for _ in 0..n {
        let sequence = histories.create_sequence();
        single_search(
            model,
            &DiscretizedActionPool,
            config,
            rng,
            bandit,
            states,
            histories,
            tree,
            sequence,
            root,
            GridState { pos: 0, rock_good: true },
            0,
        );
        backup(model, &DiscretizedActionPool, rng, states, histories, tree, sequence, 0);
    }
}

// 1. State canonicalization: equal states always resolve to the same id,
// unequal states never do.
#[test]
fn invariant_1_state_canonicalization() {
    let mut pool: StatePool<GridState> = StatePool::new();
    let a = pool.create_or_get_info(GridState { pos: 1, rock_good: true });
    let b = pool.create_or_get_info(GridState { pos: 1, rock_good: true });
    let c = pool.create_or_get_info(GridState { pos: 1, rock_good: false });
    let d = pool.create_or_get_info(GridState { pos: 2, rock_good: true });
    assert_eq!(a, b);
    assert_ne!(a, c);
    assert_ne!(a, d);
    assert_eq!(pool.len(), 3);
}

// 2. Q-value consistency: for every visited entry, mean_q * visit_count
// reconstructs total_q to within floating-point error.
#[test]
fn invariant_2_q_value_consistency() {
    support::init_logging();
    let (model, mut rng, mut states, mut histories, mut tree, mut bandit, config) = fixture();
    run_episodes(&model, &mut rng, &mut states, &mut histories, &mut tree, &mut bandit, &config, 200);

    let mut checked = 0;
    for i in 0..tree.len() {
        let belief = abt_solver::types::BeliefId(i as u32);
        for entry in tree.node(belief).mapping().entries() {
            if entry.visit_count() > 0 {
                let reconstructed = entry.mean_q() * entry.visit_count() as f64;
                assert!(
                    (reconstructed - entry.total_q()).abs() < 1e-9,
                    "mean_q * visit_count ({reconstructed}) should reconstruct total_q ({})",
                    entry.total_q()
                );
                checked += 1;
            }
        }
    }
    assert!(checked > 0, "expected at least one visited entry after 200 episodes");
}

// 3. Backup / unbackup round trip: inverting a sequence's backup restores
// every touched entry's visit count, total Q, and the belief's particle
// count to exactly what they were before the sequence was ever backed up.
#[test]
fn invariant_3_backup_unbackup_round_trip() {
    let (model, mut rng, mut states, mut histories, mut tree, mut bandit, config) = fixture();
    let root = tree.root();

    // A handful of settled episodes first, so the sequence under test
    // shares entries with a non-trivial tree instead of a bare root.
    run_episodes(&model, &mut rng, &mut states, &mut histories, &mut tree, &mut bandit, &config, 20);

    let snapshot: Vec<(GridAction, i64, f64)> = tree
        .node(root)
        .mapping()
        .entries()
        .map(|e| (e.action().clone(), e.visit_count(), e.total_q()))
        .collect();
    let particles_before = tree.node(root).particle_count();

    let sequence = histories.create_sequence();
    single_search(
        &model,
        &DiscretizedActionPool,
        &config,
        &mut rng,
        &mut bandit,
        &mut states,
        &mut histories,
        &mut tree,
        sequence,
        root,
        GridState { pos: 0, rock_good: true },
        0,
    );
    backup(&model, &DiscretizedActionPool, &mut rng, &states, &mut histories, &mut tree, sequence, 0);
    remove_path_from_belief_node(&model, &mut states, &histories, &mut tree, sequence);

    let restored: Vec<(GridAction, i64, f64)> = tree
        .node(root)
        .mapping()
        .entries()
        .map(|e| (e.action().clone(), e.visit_count(), e.total_q()))
        .collect();
    assert_eq!(snapshot.len(), restored.len());
    for ((action_before, visits_before, total_before), (action_after, visits_after, total_after)) in
        snapshot.into_iter().zip(restored.into_iter())
    {
        assert_eq!(action_before, action_after);
        assert_eq!(visits_before, visits_after);
        assert!((total_before - total_after).abs() < 1e-9);
    }
    assert_eq!(tree.node(root).particle_count(), particles_before);
}

// 4. Untried-set discipline: draining `get_next_action_to_try` yields
// exactly the legal bins with a zero visit count, each exactly once.
#[test]
fn invariant_4_untried_set_discipline() {
    let model = GridModel::default();
    let mut rng = StdRng::seed_from_u64(3);
    let start = GridState { pos: 0, rock_good: true };
    let legal = model.legal_actions(&start);
    let mut map = abt_solver::action_mapping::DiscretizedActionMap::new(model.all_actions(), |a| legal.contains(a), &mut rng);

    // Visit one legal action, then confirm it is excluded going forward and
    // every other legal action still appears exactly once.
    let visited = legal[0].clone();
    map.update_value(&visited, 1, -1.0);

    let mut offered = Vec::new();
    while let Some(a) = map.get_next_action_to_try() {
        offered.push(a.clone());
    }
    assert!(!offered.contains(&visited), "a visited entry must never be offered as untried");
    for action in &legal {
        if *action != visited {
            assert_eq!(offered.iter().filter(|a| *a == action).count(), 1, "{action:?} should be offered exactly once");
        }
    }
    for action in model.all_actions() {
        if !legal.contains(&action) {
            assert!(!offered.contains(&action), "an illegal action must never be offered");
        }
    }

    // Backing the visit out re-admits it.
    map.update_value(&visited, -1, 1.0);
    let mut offered_again = Vec::new();
    while let Some(a) = map.get_next_action_to_try() {
        offered_again.push(a.clone());
    }
    assert_eq!(offered_again, vec![visited]);
}

// 5. Particle conservation: every belief's particle count equals the number
// of history entries (across every sequence) whose belief pointer is that
// belief.
#[test]
fn invariant_5_particle_conservation() {
    let (model, mut rng, mut states, mut histories, mut tree, mut bandit, config) = fixture();
    run_episodes(&model, &mut rng, &mut states, &mut histories, &mut tree, &mut bandit, &config, 150);

    let mut counts: HashMap<u32, usize> = HashMap::new();
    for seq in histories.sequences() {
        for i in 0..seq.len() {
            *counts.entry(seq.entry(i).belief().0).or_insert(0) += 1;
        }
    }

    for i in 0..tree.len() {
        let belief = abt_solver::types::BeliefId(i as u32);
        let expected = counts.get(&i).copied().unwrap_or(0);
        assert_eq!(
            tree.node(belief).particle_count(),
            expected,
            "belief {i}'s particle count should equal the number of entries pointing at it"
        );
    }
}

// 6. Change-flag clearance: after `reset_affected_states`, no state carries
// a nonzero flag mask and the affected set is empty.
#[test]
fn invariant_6_change_flag_clearance() {
    let mut pool: StatePool<GridState> = StatePool::new();
    let a = pool.create_or_get_info(GridState { pos: 1, rock_good: true });
    let b = pool.create_or_get_info(GridState { pos: 2, rock_good: false });
    pool.set_change_flags(a, ChangeFlags::REWARD);
    pool.set_change_flags(b, ChangeFlags::TRANSITION);
    assert!(pool.has_affected_states());

    pool.reset_affected_states();

    assert!(!pool.has_affected_states());
    assert_eq!(pool.affected_states().count(), 0);
    assert!(pool.get_info(a).flags().is_empty());
    assert!(pool.get_info(b).flags().is_empty());
}

// 7. Determinism: a fixed seed and a fixed model produce the same tree
// shape and the same Q-values across two independent `gen_policy` runs.
#[test]
fn invariant_7_determinism_given_fixed_seed() {
    let config = SolverConfig::builder().max_trials(250).discount(0.95).build();
    let mut first = Solver::new(GridModel::default(), DiscretizedActionPool, config.clone(), 999);
    let mut second = Solver::new(GridModel::default(), DiscretizedActionPool, config, 999);

    first.gen_policy();
    second.gen_policy();

    assert_eq!(first.get_best_action(first.root()), second.get_best_action(second.root()));
    assert_eq!(first.get_q_value(first.root()), second.get_q_value(second.root()));
}
