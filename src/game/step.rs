//! Authoritative Step
//!
//! Validate-then-apply for one submission, system steps for forfeits and
//! abandonment, and full replay of a delta log.
//!
//! Everything here is synchronous and deterministic. Given the same
//! opening state and the same deltas, replay produces the same state and
//! the same hash on any machine.

use crate::core::hash::StateHash;
use crate::game::action::{RejectionReason, Submission};
use crate::game::delta::{DeltaChange, MatchDelta};
use crate::game::machine::{self, ReplayError};
use crate::game::rules::Ruleset;
use crate::game::state::{MatchOutcome, MatchState, PlayerSlot};
use crate::game::validator::validate;

/// An accepted change, already applied.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Accepted {
    /// The delta that was applied
    pub delta: MatchDelta,
    /// Hash of the state after applying it
    pub state_hash: StateHash,
    /// Set if this delta ended the match
    pub outcome: Option<MatchOutcome>,
}

/// Result of processing one submission.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StepResult {
    /// Applied; broadcast to every participant.
    Accepted(Accepted),
    /// Refused; reply to the originator only. State is unchanged.
    Rejected(RejectionReason),
}

/// Validate a submission and apply it on success.
pub fn submit(state: &mut MatchState, ruleset: &Ruleset, submission: &Submission) -> StepResult {
    let delta = match validate(state, ruleset, submission) {
        Ok(delta) => delta,
        Err(reason) => return StepResult::Rejected(reason),
    };

    match commit(state, delta) {
        Ok(accepted) => StepResult::Accepted(accepted),
        // apply is atomic, so the state is still the pre-submission state
        Err(_) => StepResult::Rejected(RejectionReason::MalformedAction),
    }
}

/// End the match with `loser` forfeiting. `None` if already over.
pub fn forfeit(state: &mut MatchState, loser: PlayerSlot) -> Option<Accepted> {
    let change = machine::forfeit(state, loser)?;
    system_step(state, change)
}

/// End the match as an abandoned draw. `None` if already over.
pub fn abandon(state: &mut MatchState) -> Option<Accepted> {
    let change = machine::abandon(state)?;
    system_step(state, change)
}

fn system_step(state: &mut MatchState, change: DeltaChange) -> Option<Accepted> {
    let delta = MatchDelta {
        seq: state.seq + 1,
        origin: None,
        change,
    };
    commit(state, delta).ok()
}

fn commit(state: &mut MatchState, delta: MatchDelta) -> Result<Accepted, ReplayError> {
    machine::apply(state, &delta)?;
    let outcome = delta.change.outcome();
    Ok(Accepted {
        state_hash: state.compute_hash(),
        delta,
        outcome,
    })
}

/// Replay a delta log against an opening state.
pub fn replay_match(opening: &MatchState, deltas: &[MatchDelta]) -> Result<MatchState, ReplayError> {
    deltas.iter().try_fold(opening.clone(), |mut state, delta| {
        machine::apply(&mut state, delta)?;
        Ok(state)
    })
}

/// Replay and check the final hash.
pub fn verify_replay(
    opening: &MatchState,
    deltas: &[MatchDelta],
    expected: &StateHash,
) -> Result<MatchState, ReplayError> {
    let state = replay_match(opening, deltas)?;
    if state.compute_hash() != *expected {
        return Err(ReplayError::HashMismatch);
    }
    Ok(state)
}

// =============================================================================
// TESTS
// =============================================================================
