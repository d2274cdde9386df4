//! Text tree persistence (SPEC_FULL §6.2, §10).
//!
//! Grounded on `examples/original_source/src/solver/mappings/actions/discretized_actions.cpp`'s
//! `DiscretizedActionTextSerializer` (the save/load pair for one belief
//! node's action mapping) and the `TextSerializer` base class it overrides
//! `saveState`/`saveAction`/`saveObservation` on per problem
//! (`RockSampleTextSerializer`, `ContTagTextSerializer`). Here those
//! per-problem hooks become one small [`TreeCodec`] trait, supplied by the
//! host the same way an [`ActionPool`] is.
//!
//! Layout is flattened relative to the original (belief nodes and action
//! nodes are each written as one top-level block addressed by ID, with
//! cross-references as plain integers, rather than the source's inline
//! recursive nesting) so the loader is a straight line-oriented pass
//! instead of a recursive-descent mirror of the writer. Every field named
//! in §6.2's line format is still present per entry; only the nesting is
//! different. Action mapping persistence supports [`crate::belief_tree::DiscretizedActionPool`]
//! mappings only, since that's the only `ActionPool` this crate ships; a
//! continuous mapping reaching `write_tree`/`load_tree` is an engine bug.

use std::io::{self, BufRead, Write};

use rand::RngCore;

use crate::action_mapping::{ActionMapping, DiscretizedActionMap};
use crate::belief_tree::BeliefTree;
use crate::history::HistoryStore;
use crate::model::Model;
use crate::state_pool::StatePool;
use crate::types::{BeliefId, Discount, EntryId, Reward, SequenceId, StateId};

/// Per-problem text encode/decode for the three opaque value types, the
/// same role `RockSampleTextSerializer` plays for `saveState`/`saveAction`/
/// `saveObservation` over the generic `TextSerializer` base. Encoded tokens
/// must not contain whitespace; the loader splits lines on whitespace.
pub trait TreeCodec<M: Model> {
    fn encode_state(&self, state: &M::State) -> String;
    fn decode_state(&self, token: &str) -> M::State;
    fn encode_action(&self, action: &M::Action) -> String;
    fn decode_action(&self, token: &str) -> M::Action;
    fn encode_observation(&self, obs: &M::Observation) -> String;
    fn decode_observation(&self, token: &str) -> M::Observation;
}

fn fatal(message: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message.into())
}

fn next_line<'a>(lines: &mut impl Iterator<Item = io::Result<String>>, context: &'a str) -> io::Result<String> {
    lines
        .next()
        .ok_or_else(|| fatal(format!("unexpected end of input while reading {context}")))?
}

/// Writes `tree`/`states`/`histories` in the line format SPEC_FULL §6.2
/// describes, flattened to one block per belief/action node (see module
/// docs).
pub fn write_tree<M: Model, C: TreeCodec<M>, W: Write>(
    codec: &C,
    states: &StatePool<M::State>,
    histories: &HistoryStore<M::Action, M::Observation>,
    tree: &BeliefTree<M>,
    out: &mut W,
) -> io::Result<()> {
    writeln!(out, "ENGINE-TREE v1")?;
    writeln!(out, "ROOT {}", tree.root().0)?;
    writeln!(out, "CLOCK {}", tree.clock())?;

    writeln!(out, "STATES {}", states.len())?;
    for i in 0..states.len() {
        let info = states.get_info(StateId(i as u32));
        writeln!(out, "{} {}", i, codec.encode_state(info.state()))?;
    }

    writeln!(out, "SEQUENCES {}", histories.len())?;
    for seq in histories.sequences() {
        writeln!(out, "SEQUENCE {} {}", seq.id().0, seq.len())?;
        for i in 0..seq.len() {
            let entry = seq.entry(i);
            let bootstrap = entry.bootstrap_value().map(|v| v.to_string()).unwrap_or_else(|| "NONE".to_string());
            writeln!(
                out,
                "{} {} {} {} {} {} {}",
                entry.state().0,
                codec.encode_action(entry.action()),
                codec.encode_observation(entry.observation()),
                entry.reward(),
                entry.discount(),
                entry.belief().0,
                bootstrap,
            )?;
        }
    }

    writeln!(out, "BELIEFS {}", tree.len())?;
    for i in 0..tree.len() {
        let node = tree.node(BeliefId(i as u32));
        writeln!(out, "BELIEF {} {}", i, node.t_last_change())?;
        let particles: Vec<EntryId> = node.particles().copied().collect();
        writeln!(out, "PARTICLES {}", particles.len())?;
        let particle_tokens: Vec<String> = particles.iter().map(|p| format!("{}:{}", p.sequence.0, p.index)).collect();
        writeln!(out, "{}", particle_tokens.join(" "))?;

        let mapping = node.mapping();
        let children = mapping.entries().filter(|e| e.child().is_some()).count();
        writeln!(
            out,
            "{} visited actions with {} children; {} visits",
            mapping.entries().filter(|e| e.visit_count() > 0).count(),
            children,
            mapping.total_visit_count(),
        )?;

        let untried = untried_bins(mapping);
        writeln!(out, "UNTRIED {} {}", untried.len(), untried.iter().map(|b| b.to_string()).collect::<Vec<_>>().join(" "))?;

        // Every entry is saved, not just visited/childed ones: an unvisited
        // entry's legality bit still matters on reload (there is no model
        // hint available at load time to recompute it from scratch).
        let saved_entries: Vec<_> = mapping.entries().collect();
        writeln!(out, "ENTRIES {}", saved_entries.len())?;
        for entry in saved_entries {
            let legal = if entry.is_legal() { "LEGAL" } else { "ILLEGAL" };
            let child = entry.child().map(|c| c.0.to_string()).unwrap_or_else(|| "NONE".to_string());
            writeln!(
                out,
                "ACTION {} ({}): {} from {} visits; total: {} {} {}",
                entry.action().bin_number(),
                codec.encode_action(entry.action()),
                entry.mean_q(),
                entry.visit_count(),
                entry.total_q(),
                legal,
                child,
            )?;
        }
    }

    writeln!(out, "ACTIONNODES {}", tree.action_node_count())?;
    for i in 0..tree.action_node_count() {
        let action_node = tree.action_node(crate::types::ActionNodeId(i as u32));
        writeln!(out, "ACTIONNODE {} {}", i, action_node.parent_belief().0)?;
        let obs_children: Vec<_> = action_node.mapping().children().collect();
        writeln!(out, "OBSCHILDREN {}", obs_children.len())?;
        for (obs, belief) in obs_children {
            writeln!(out, "{} -> {}", codec.encode_observation(obs), belief.0)?;
        }
    }

    Ok(())
}

/// Every bin number not yet visited, independent of the concrete mapping
/// variant (used only for the diagnostic `UNTRIED` line; the loader does
/// not parse it back, since `update_value` reconstructs the untried set as
/// a side effect of replaying each entry's saved visit count).
fn untried_bins<A: crate::model::ActionLike>(mapping: &ActionMapping<A>) -> Vec<usize> {
    mapping
        .entries()
        .filter(|e| e.is_legal() && e.visit_count() == 0)
        .map(|e| e.action().bin_number())
        .collect()
}

/// Parses a tree previously written by [`write_tree`] back into a fresh
/// `StatePool`/`HistoryStore`/`BeliefTree` triple, rebuilding every
/// back-reference (`StateInfo::referencing_entries`) by sweeping the loaded
/// sequences once, per the Design Notes.
pub fn load_tree<M: Model, C: TreeCodec<M>, R: BufRead>(
    codec: &C,
    model: &M,
    rng: &mut dyn RngCore,
    input: R,
) -> io::Result<(StatePool<M::State>, HistoryStore<M::Action, M::Observation>, BeliefTree<M>)> {
    let mut lines = input.lines();

    let header = next_line(&mut lines, "header")?;
    if header.trim() != "ENGINE-TREE v1" {
        return Err(fatal(format!("unrecognized header: {header}")));
    }

    let root_line = next_line(&mut lines, "root")?;
    let root_id: u32 = parse_field(&root_line, 1, "ROOT")?;

    let clock_line = next_line(&mut lines, "clock")?;
    let clock: u64 = parse_field(&clock_line, 1, "CLOCK")?;

    let mut states = StatePool::new();
    let states_header = next_line(&mut lines, "states header")?;
    let n_states: usize = parse_field(&states_header, 1, "STATES")?;
    for expected in 0..n_states {
        let line = next_line(&mut lines, "state")?;
        let (id_str, rest) = line.split_once(' ').ok_or_else(|| fatal("malformed STATES line"))?;
        let id: usize = id_str.parse().map_err(|_| fatal("malformed state id"))?;
        if id != expected {
            return Err(fatal("state ids must appear in dense order"));
        }
        let state = codec.decode_state(rest.trim());
        let assigned = states.create_or_get_info(state);
        if assigned.0 as usize != expected {
            return Err(fatal("state pool did not preserve dense IDs on reload (duplicate-valued STATES entries?)"));
        }
    }

    let mut histories = HistoryStore::new();
    let seq_header = next_line(&mut lines, "sequences header")?;
    let n_sequences: usize = parse_field(&seq_header, 1, "SEQUENCES")?;
    for _ in 0..n_sequences {
        let seq_line = next_line(&mut lines, "sequence")?;
        let tokens: Vec<&str> = seq_line.split_whitespace().collect();
        if tokens.first() != Some(&"SEQUENCE") {
            return Err(fatal("expected SEQUENCE line"));
        }
        let len: usize = tokens.get(2).ok_or_else(|| fatal("malformed SEQUENCE line"))?.parse().map_err(|_| fatal("malformed sequence length"))?;
        let sequence = histories.create_sequence();
        for _ in 0..len {
            let entry_line = next_line(&mut lines, "history entry")?;
            let fields: Vec<&str> = entry_line.split_whitespace().collect();
            if fields.len() != 7 {
                return Err(fatal("malformed history entry line"));
            }
            let state_id = StateId(fields[0].parse().map_err(|_| fatal("malformed entry state id"))?);
            let action = codec.decode_action(fields[1]);
            let observation = codec.decode_observation(fields[2]);
            let reward: Reward = fields[3].parse().map_err(|_| fatal("malformed entry reward"))?;
            let discount: Discount = fields[4].parse().map_err(|_| fatal("malformed entry discount"))?;
            let belief = BeliefId(fields[5].parse().map_err(|_| fatal("malformed entry belief id"))?);
            let entry_id = histories.append_entry(sequence, state_id, action, observation, reward, discount, belief);
            states.get_info_mut(state_id).add_reference(entry_id);
            if fields[6] != "NONE" {
                let bootstrap: Reward = fields[6].parse().map_err(|_| fatal("malformed bootstrap value"))?;
                histories.sequence_mut(sequence).last_mut().expect("just appended").set_bootstrap_value(bootstrap);
            }
        }
    }

    let mut tree: BeliefTree<M> = BeliefTree::empty();
    let beliefs_header = next_line(&mut lines, "beliefs header")?;
    let n_beliefs: usize = parse_field(&beliefs_header, 1, "BELIEFS")?;
    for expected in 0..n_beliefs {
        let belief_line = next_line(&mut lines, "belief")?;
        let tokens: Vec<&str> = belief_line.split_whitespace().collect();
        if tokens.first() != Some(&"BELIEF") {
            return Err(fatal("expected BELIEF line"));
        }
        let id: usize = tokens[1].parse().map_err(|_| fatal("malformed belief id"))?;
        if id != expected {
            return Err(fatal("belief ids must appear in dense order"));
        }
        let t_last_change: u64 = tokens[2].parse().map_err(|_| fatal("malformed t_last_change"))?;

        let particles_header = next_line(&mut lines, "particles header")?;
        let n_particles: usize = parse_field(&particles_header, 1, "PARTICLES")?;
        let particle_line = next_line(&mut lines, "particle list")?;
        let mut particles = Vec::with_capacity(n_particles);
        if n_particles > 0 {
            for token in particle_line.split_whitespace() {
                let (seq_str, idx_str) = token.split_once(':').ok_or_else(|| fatal("malformed particle token"))?;
                let sequence = SequenceId(seq_str.parse().map_err(|_| fatal("malformed particle sequence id"))?);
                let index: u32 = idx_str.parse().map_err(|_| fatal("malformed particle index"))?;
                particles.push(EntryId::new(sequence, index));
            }
        }

        let _summary_line = next_line(&mut lines, "visited-actions summary")?;
        let _untried_line = next_line(&mut lines, "untried list")?;

        let entries_header = next_line(&mut lines, "entries header")?;
        let n_entries: usize = parse_field(&entries_header, 1, "ENTRIES")?;

        // Every bin starts illegal/untried; each saved ACTION line below
        // restores the real legality and, where applicable, visit/Q state.
        let mut map: DiscretizedActionMap<M::Action> = DiscretizedActionMap::new(model.all_actions(), |_| false, rng);

        let mut pending_children: Vec<(M::Action, u32)> = Vec::new();
        for _ in 0..n_entries {
            let line = next_line(&mut lines, "action entry")?;
            let (action, visits, total_q, legal, child) = parse_action_line(&line, codec)?;
            map.set_legal(&action, legal);
            if visits > 0 {
                map.update_value(&action, visits, total_q);
            }
            if let Some(child_id) = child {
                pending_children.push((action, child_id));
            }
        }
        map.update();

        let belief_id = tree.insert_loaded_node(ActionMapping::Discretized(map), particles, t_last_change);
        for (action, action_node_id) in pending_children {
            let loaded = tree.insert_loaded_action_node(belief_id);
            if loaded.0 != action_node_id {
                return Err(fatal("action node ids must appear in the same order as referenced"));
            }
            tree.node_mut(belief_id).mapping_mut().create_action_node(&action, || loaded);
        }
    }

    let action_nodes_header = next_line(&mut lines, "action nodes header")?;
    let n_action_nodes: usize = parse_field(&action_nodes_header, 1, "ACTIONNODES")?;
    for expected in 0..n_action_nodes {
        let header_line = next_line(&mut lines, "action node")?;
        let tokens: Vec<&str> = header_line.split_whitespace().collect();
        if tokens.first() != Some(&"ACTIONNODE") {
            return Err(fatal("expected ACTIONNODE line"));
        }
        let id: usize = tokens[1].parse().map_err(|_| fatal("malformed action node id"))?;
        if id != expected {
            return Err(fatal("action node ids must appear in dense order in the ACTIONNODES section"));
        }
        let parent_belief = BeliefId(tokens[2].parse().map_err(|_| fatal("malformed parent belief id"))?);

        let obs_header = next_line(&mut lines, "observation children header")?;
        let n_obs: usize = parse_field(&obs_header, 1, "OBSCHILDREN")?;
        for _ in 0..n_obs {
            let line = next_line(&mut lines, "observation child")?;
            let (obs_token, belief_token) = line.split_once(" -> ").ok_or_else(|| fatal("malformed observation child line"))?;
            let observation = codec.decode_observation(obs_token.trim());
            let belief = BeliefId(belief_token.trim().parse().map_err(|_| fatal("malformed observation child belief id"))?);
            tree.action_node_mut(crate::types::ActionNodeId(id as u32))
                .mapping_mut()
                .create_or_get_child(&observation, || belief);
        }
        let _ = parent_belief; // already recorded when the action node was created during the BELIEFS pass.
    }

    tree.set_root(BeliefId(root_id));
    tree.set_clock(clock);

    Ok((states, histories, tree))
}

fn parse_field<T: std::str::FromStr>(line: &str, index: usize, expected_tag: &str) -> io::Result<T> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.first() != Some(&expected_tag) {
        return Err(fatal(format!("expected a line starting with {expected_tag}, got: {line}")));
    }
    tokens
        .get(index)
        .ok_or_else(|| fatal(format!("missing field {index} on {expected_tag} line")))?
        .parse()
        .map_err(|_| fatal(format!("malformed field {index} on {expected_tag} line")))
}

/// Parses one `ACTION <bin> (<encoded>): <meanQ> from <visits> visits; total: <totalQ> <LEGAL|ILLEGAL> <child|NONE>` line.
fn parse_action_line<M: Model, C: TreeCodec<M>>(line: &str, codec: &C) -> io::Result<(M::Action, i64, Reward, bool, Option<u32>)> {
    let rest = line.strip_prefix("ACTION ").ok_or_else(|| fatal("expected ACTION line"))?;
    let open = rest.find('(').ok_or_else(|| fatal("malformed ACTION line: missing '('"))?;
    let close = rest.find("):").ok_or_else(|| fatal("malformed ACTION line: missing '):'"))?;
    let encoded_action = &rest[open + 1..close];
    let action = codec.decode_action(encoded_action.trim());

    let tail = &rest[close + 2..];
    let fields: Vec<&str> = tail.split_whitespace().collect();
    // fields: [meanQ, "from", visits, "visits;", "total:", totalQ, LEGAL|ILLEGAL, child|NONE]
    if fields.len() != 8 {
        return Err(fatal("malformed ACTION line tail"));
    }
    let visits: i64 = fields[2].parse().map_err(|_| fatal("malformed visit count"))?;
    let total_q: Reward = fields[5].parse().map_err(|_| fatal("malformed total Q"))?;
    let legal = fields[6] == "LEGAL";
    let child = if fields[7] == "NONE" { None } else { Some(fields[7].parse().map_err(|_| fatal("malformed child id"))?) };

    Ok((action, visits, total_q, legal, child))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::belief_tree::DiscretizedActionPool;
    use crate::config::SolverConfig;
    use crate::model::{ActionLike, ChangeFlags, ObservationLike, StateLike, StepResult};
    use crate::rollout::StrategyBandit;
    use crate::search::single_search;
    use crate::backup::backup;
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

    struct ToyCodec;
    impl TreeCodec<Toy> for ToyCodec {
        fn encode_state(&self, state: &S) -> String {
            state.0.to_string()
        }
        fn decode_state(&self, token: &str) -> S {
            S(token.parse().unwrap())
        }
        fn encode_action(&self, action: &A) -> String {
            action.0.to_string()
        }
        fn decode_action(&self, token: &str) -> A {
            A(token.parse().unwrap())
        }
        fn encode_observation(&self, obs: &O) -> String {
            obs.0.to_string()
        }
        fn decode_observation(&self, token: &str) -> O {
            O(token.parse().unwrap())
        }
    }

    #[test]
    fn round_trip_preserves_best_action_and_q_value_at_the_root() {
        let model = Toy;
        let codec = ToyCodec;
        let mut rng = rand::rngs::StdRng::seed_from_u64(42);
        let mut tree = BeliefTree::new(&model, &DiscretizedActionPool, Some(&S(0)), &mut rng);
        let mut states = StatePool::new();
        let mut histories = HistoryStore::new();
        let mut bandit = StrategyBandit::default();
        let config = SolverConfig::default();
        let root = tree.root();

        for _ in 0..20 {
            let sequence = histories.create_sequence();
            single_search(&model, &DiscretizedActionPool, &config, &mut rng, &mut bandit, &mut states, &mut histories, &mut tree, sequence, root, S(0), 0);
            backup(&model, &DiscretizedActionPool, &mut rng, &states, &mut histories, &mut tree, sequence, 0);
        }

        let mut buffer = Vec::new();
        write_tree(&codec, &states, &histories, &tree, &mut buffer).unwrap();

        let mut load_rng = rand::rngs::StdRng::seed_from_u64(1);
        let (_loaded_states, _loaded_histories, loaded_tree) = load_tree::<Toy, _, _>(&codec, &model, &mut load_rng, buffer.as_slice()).unwrap();

        let original_best = tree.node(root).mapping().best_action().cloned();
        let loaded_best = loaded_tree.node(loaded_tree.root()).mapping().best_action().cloned();
        assert_eq!(original_best, loaded_best);

        let original_entry = original_best.as_ref().and_then(|a| tree.node(root).mapping().get_entry(a));
        let loaded_entry = loaded_best.as_ref().and_then(|a| loaded_tree.node(loaded_tree.root()).mapping().get_entry(a));
        assert_eq!(original_entry.map(|e| e.mean_q()), loaded_entry.map(|e| e.mean_q()));
        assert_eq!(original_entry.map(|e| e.visit_count()), loaded_entry.map(|e| e.visit_count()));
    }
}
