//! A small rock-sampling corridor used by the integration tests, grounded
//! in `examples/original_source/problems/RockSample/RockSampleModel.h`:
//! an agent walks a 1-D corridor toward an exit, a rock partway along is
//! either good or bad (hidden state), `Sample` reveals its value as a
//! reward and `Check` gives a noisy observation whose accuracy falls off
//! with distance (the half-efficiency-distance formula the original uses).

use abt_solver::model::{ActionLike, ChangeFlags, Model, ObservationLike, StateLike, StepResult};
use abt_solver::types::{BinNumber, Reward};
use rand::Rng;

pub const WIDTH: i32 = 5;
pub const ROCK_POS: i32 = 2;
pub const HALF_EFFICIENCY_DISTANCE: f64 = 2.0;
pub const GOOD_ROCK_REWARD: Reward = 10.0;
pub const BAD_ROCK_PENALTY: Reward = -10.0;
pub const EXIT_REWARD: Reward = 10.0;
pub const MOVE_COST: Reward = -1.0;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GridState {
    pub pos: i32,
    pub rock_good: bool,
}

impl StateLike for GridState {
    fn distance_to(&self, other: &Self) -> f64 {
        (self.pos - other.pos).abs() as f64 + if self.rock_good == other.rock_good { 0.0 } else { 1.0 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GridAction {
    East,
    West,
    Sample,
    Check,
}

impl ActionLike for GridAction {
    fn bin_number(&self) -> BinNumber {
        match self {
            GridAction::East => 0,
            GridAction::West => 1,
            GridAction::Sample => 2,
            GridAction::Check => 3,
        }
    }
}

impl GridAction {
    pub const ALL: [GridAction; 4] = [GridAction::East, GridAction::West, GridAction::Sample, GridAction::Check];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GridObs {
    None,
    Good,
    Bad,
}

impl ObservationLike for GridObs {}

/// A rock-sampling corridor. `reward_bias` lets the change-engine tests
/// simulate a reward-schedule change (S4) without touching the geometry.
pub struct GridModel {
    pub illegal_penalty: Reward,
    pub reward_bias: Reward,
}

impl Default for GridModel {
    fn default() -> Self {
        Self { illegal_penalty: -100.0, reward_bias: 0.0 }
    }
}

impl GridModel {
    fn check_accuracy(&self, pos: i32) -> f64 {
        let distance = (pos - ROCK_POS).abs() as f64;
        0.5 + 0.5 * (-distance / HALF_EFFICIENCY_DISTANCE).exp()
    }

    fn sample_reward(&self, rock_good: bool) -> Reward {
        self.reward_bias + if rock_good { GOOD_ROCK_REWARD } else { BAD_ROCK_PENALTY }
    }
}

impl Model for GridModel {
    type State = GridState;
    type Action = GridAction;
    type Observation = GridObs;

    fn sample_initial_state(&self, rng: &mut dyn rand::RngCore) -> GridState {
        GridState { pos: 0, rock_good: rng.gen_bool(0.5) }
    }

    fn is_terminal(&self, state: &GridState) -> bool {
        state.pos >= WIDTH
    }

    fn step(&self, state: &GridState, action: &GridAction, rng: &mut dyn rand::RngCore) -> StepResult<Self> {
        match action {
            GridAction::East => {
                let next = GridState { pos: state.pos + 1, rock_good: state.rock_good };
                let reward = if next.pos >= WIDTH { self.reward_bias + EXIT_REWARD } else { self.reward_bias + MOVE_COST };
                StepResult { next_state: next, observation: GridObs::None, reward, legal: true }
            }
            GridAction::West => {
                if state.pos == 0 {
                    StepResult { next_state: state.clone(), observation: GridObs::None, reward: self.illegal_penalty, legal: false }
                } else {
                    let next = GridState { pos: state.pos - 1, rock_good: state.rock_good };
                    StepResult { next_state: next, observation: GridObs::None, reward: self.reward_bias + MOVE_COST, legal: true }
                }
            }
            GridAction::Sample => {
                if state.pos == ROCK_POS {
                    let reward = self.sample_reward(state.rock_good);
                    StepResult { next_state: state.clone(), observation: GridObs::None, reward, legal: true }
                } else {
                    StepResult { next_state: state.clone(), observation: GridObs::None, reward: self.illegal_penalty, legal: false }
                }
            }
            GridAction::Check => {
                let accurate = rng.gen_bool(self.check_accuracy(state.pos));
                let observed_good = if accurate { state.rock_good } else { !state.rock_good };
                let obs = if observed_good { GridObs::Good } else { GridObs::Bad };
                StepResult { next_state: state.clone(), observation: obs, reward: self.reward_bias + MOVE_COST, legal: true }
            }
        }
    }

    fn reward(&self, state: &GridState, action: Option<&GridAction>) -> Reward {
        match action {
            Some(GridAction::East) => {
                if state.pos + 1 >= WIDTH { self.reward_bias + EXIT_REWARD } else { self.reward_bias + MOVE_COST }
            }
            Some(GridAction::West) => {
                if state.pos == 0 { self.illegal_penalty } else { self.reward_bias + MOVE_COST }
            }
            Some(GridAction::Sample) => {
                if state.pos == ROCK_POS { self.sample_reward(state.rock_good) } else { self.illegal_penalty }
            }
            Some(GridAction::Check) => self.reward_bias + MOVE_COST,
            None => 0.0,
        }
    }

    fn solve_heuristic(&self, state: &GridState) -> Reward {
        -((WIDTH - state.pos).abs() as f64)
    }

    fn default_value(&self) -> Reward {
        -100.0
    }

    fn legal_actions(&self, state: &GridState) -> Vec<GridAction> {
        let mut actions = vec![GridAction::East, GridAction::Check];
        if state.pos > 0 {
            actions.push(GridAction::West);
        }
        if state.pos == ROCK_POS {
            actions.push(GridAction::Sample);
        }
        actions
    }

    fn all_actions(&self) -> Vec<GridAction> {
        GridAction::ALL.to_vec()
    }

    fn states_from_observation(&self, _action: &GridAction, _obs: &GridObs, hint: Option<&GridState>, rng: &mut dyn rand::RngCore) -> Vec<GridState> {
        match hint {
            Some(state) => vec![state.clone()],
            None => vec![GridState { pos: 0, rock_good: rng.gen_bool(0.5) }],
        }
    }

    fn discount(&self) -> f64 {
        0.95
    }

    fn apply_change(&mut self, region: &[GridState], kind: ChangeFlags) -> Vec<GridState> {
        if kind.contains(ChangeFlags::REWARD) {
            self.reward_bias += 5.0;
        }
        region.to_vec()
    }
}

pub fn init_logging() {
    let _ = env_logger::try_init();
}
