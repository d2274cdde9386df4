//! Error taxonomy (SPEC_FULL §7).
//!
//! Only the fatal/programmer-error half of the taxonomy gets a `Result`
//! type: those are conditions an embedding application might plausibly want
//! to catch at a boundary before converting to a panic. The
//! "recoverable/logged" half (identical belief nodes during NN search,
//! pairwise-comparison explosion, illegal rollout actions) is not an error
//! at all from the engine's point of view -- those sites call `log::warn!`
//! and fall back to the conservative choice inline, so they never appear
//! here.

use thiserror::Error;

use crate::types::StateId;

/// A condition that indicates a bug in the engine itself rather than in the
/// problem model or the data it supplies. The top-level `Solver` entry
/// points treat these as fatal: they log at `error!` and then panic, since
/// there is no sensible way to keep searching once an invariant has broken.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("state id {0} is out of range for the state pool")]
    StateIdOutOfRange(StateId),

    #[error("action mapping invariant broken: {0}")]
    MappingInvariantBroken(String),

    #[error("non-finite Q delta ({delta}) applied to an action mapping entry")]
    NonFiniteDelta { delta: f64 },

    #[error("history sequence {0:?} is empty")]
    EmptySequence(crate::types::SequenceId),

    #[error("belief node {0} has no parent but is not the root")]
    DetachedBelief(crate::types::BeliefId),
}
