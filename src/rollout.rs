//! Rollout strategy selection (SPEC_FULL §4.6, Design Notes §9: "Modeled
//! as a small bandit with two arms; weights updated by observed
//! improvement. Keep this as a dedicated substructure with its own unit
//! tests.").
//!
//! Neither `RANDHEURISTIC` nor `POL` is strictly better across problems, so
//! the search driver doesn't hardcode a choice -- it asks a two-arm
//! exponential-weights bandit, and feeds back how much each rollout's
//! bootstrap estimate improved on the belief's incumbent best value.

use rand::RngCore;

use crate::types::Reward;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RolloutStrategy {
    /// Use the model's admissible heuristic directly.
    RandHeuristic,
    /// Reuse a nearby belief's best-known policy.
    Pol,
}

impl RolloutStrategy {
    fn index(self) -> usize {
        match self {
            RolloutStrategy::RandHeuristic => 0,
            RolloutStrategy::Pol => 1,
        }
    }
}

/// Two-arm exponential-weights bandit choosing between the two rollout
/// strategies. Weights are kept positive and renormalized to
/// probabilities on read; there is no decay beyond what
/// `update_strategy_probabilities` applies per observation.
#[derive(Debug, Clone)]
pub struct StrategyBandit {
    weights: [f64; 2],
    learning_rate: f64,
}

impl StrategyBandit {
    /// Starts both arms at equal weight.
    pub fn new(learning_rate: f64) -> Self {
        Self {
            weights: [1.0, 1.0],
            learning_rate,
        }
    }

    pub fn probabilities(&self) -> [f64; 2] {
        let total = self.weights[0] + self.weights[1];
        [self.weights[0] / total, self.weights[1] / total]
    }

    /// Samples a strategy proportional to current arm weights.
    pub fn choose(&self, rng: &mut dyn RngCore) -> RolloutStrategy {
        let [p_rand_heuristic, _] = self.probabilities();
        let draw = (rng.next_u64() >> 11) as f64 / (1u64 << 53) as f64;
        if draw < p_rand_heuristic {
            RolloutStrategy::RandHeuristic
        } else {
            RolloutStrategy::Pol
        }
    }

    /// Multiplicative-weights update: the chosen arm's weight scales by
    /// `exp(learning_rate * improvement)`, so a rollout that beat the
    /// belief's incumbent best value (`improvement > 0`) makes that
    /// strategy more likely next time, and a rollout that underperformed
    /// makes it less likely. Weights are clamped away from zero/infinity so
    /// a long streak of one sign can't starve the other arm permanently.
    pub fn update_strategy_probabilities(&mut self, strategy: RolloutStrategy, improvement: Reward) {
        let idx = strategy.index();
        let scaled = (self.learning_rate * improvement).clamp(-50.0, 50.0);
        self.weights[idx] = (self.weights[idx] * scaled.exp()).clamp(1e-6, 1e6);
    }
}

impl Default for StrategyBandit {
    fn default() -> Self {
        Self::new(0.1)
    }
}
