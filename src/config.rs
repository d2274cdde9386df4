//! Solver configuration (SPEC_FULL §6.3).
//!
//! The engine does not parse argv or a config file itself -- that belongs
//! to the host, exactly as §1's Non-goals say. What it does own is the
//! small set of tuning knobs the original `Model` constructor pulled out of
//! a `po::variables_map`; those live here as a plain struct so a host can
//! build one however it likes (argv, a TOML file, hard-coded) and hand it
//! to [`crate::solver::Solver::new`].

/// Recognized configuration keys, named the way the reference
/// implementation's option parser named them.
#[derive(Debug, Clone, PartialEq)]
pub struct SolverConfig {
    /// `SBT.nParticles` -- the particle cap used when replenishing a belief
    /// whose particle set has been exhausted by change repair.
    pub n_particles: usize,
    /// `SBT.maxTrials` -- episodes run per `gen_policy`/`improve_solution`
    /// call.
    pub max_trials: u64,
    /// `SBT.maxDistTry` -- candidates examined before giving up on a
    /// nearest-neighbor belief search.
    pub max_dist_try: usize,
    /// `SBT.exploreCoef` -- the `c` constant in the UCB1 rule.
    pub explore_coef: f64,
    /// `SBT.depthTh` -- episodes stop once `discount^depth` falls below
    /// this.
    pub depth_threshold: f64,
    /// `SBT.distTh` -- two belief nodes within this L1 particle distance are
    /// treated as the same node for policy-rollout reuse.
    pub dist_threshold: f64,
    /// `problem.discount` -- gamma.
    pub discount: f64,
    /// Reward assigned to an illegal action attempt (self-loop penalty).
    pub illegal_penalty: f64,
    /// Wall-clock budget for a single `gen_policy`/`improve_solution` call.
    /// `None` means trial count is the only budget.
    pub time_budget: Option<std::time::Duration>,
}

impl SolverConfig {
    /// Values used throughout the ABT reference experiments: enough
    /// particles to keep beliefs well-populated on small discrete domains,
    /// a UCB exploration constant tuned for rewards roughly in `[-100,
    /// 100]`, and a depth threshold that stops expansion once the discount
    /// has decayed three orders of magnitude.
    pub fn with_discount(discount: f64) -> Self {
        Self {
            discount,
            ..Self::default()
        }
    }

    pub fn builder() -> SolverConfigBuilder {
        SolverConfigBuilder(Self::default())
    }
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            n_particles: 1000,
            max_trials: 5000,
            max_dist_try: 10,
            explore_coef: 20.0,
            depth_threshold: 1e-3,
            dist_threshold: 1.0,
            discount: 0.95,
            illegal_penalty: -100.0,
            time_budget: None,
        }
    }
}

/// Small fluent builder, since `SolverConfig` has enough fields that
/// constructing it with struct-update syntax at every call site gets noisy.
#[derive(Debug, Clone)]
pub struct SolverConfigBuilder(SolverConfig);

macro_rules! setter {
    ($name:ident, $ty:ty) => {
        pub fn $name(mut self, value: $ty) -> Self {
            self.0.$name = value;
            self
        }
    };
}

impl SolverConfigBuilder {
    setter!(n_particles, usize);
    setter!(max_trials, u64);
    setter!(max_dist_try, usize);
    setter!(explore_coef, f64);
    setter!(depth_threshold, f64);
    setter!(dist_threshold, f64);
    setter!(discount, f64);
    setter!(illegal_penalty, f64);

    pub fn time_budget(mut self, budget: std::time::Duration) -> Self {
        self.0.time_budget = Some(budget);
        self
    }

    pub fn build(self) -> SolverConfig {
        self.0
    }
}
