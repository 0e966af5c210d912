//! Game Logic Module
//!
//! All match rules. Synchronous, deterministic, no I/O and no logging.
//!
//! ## Module Structure
//!
//! - `catalog`: Card definitions
//! - `board`: 3D grid, occupancy, placement legality
//! - `state`: Match and player state
//! - `rules`: Tunable rules, win predicate, ruleset loading
//! - `action`: Actions, submissions, rejection taxonomy
//! - `delta`: Accepted state changes
//! - `machine`: Phase transitions and `apply`
//! - `validator`: Pure action validation
//! - `step`: Validate-then-apply, system steps, replay

pub mod catalog;
pub mod board;
pub mod state;
pub mod rules;
pub mod action;
pub mod delta;
pub mod machine;
pub mod validator;
pub mod step;

// Re-export key types
pub use catalog::{CardCatalog, CardDefinition, CardTypeId, CardClass, EffectTag};
pub use board::{Board, BoardDimensions, BoardError, CardInstanceId, CardStatus, PlacedCard, Position};
pub use state::{MatchState, MatchOutcome, MatchResult, EndReason, Phase, Player, PlayerId, PlayerSlot};
pub use rules::{Ruleset, RulesConfig, RulesetError, WinCondition, NoForcesRemaining};
pub use action::{Action, ActionKind, Submission, RejectionReason, RejectionCategory};
pub use delta::{MatchDelta, DeltaChange, DeltaOrigin, CardEffect};
pub use machine::ReplayError;
pub use step::{StepResult, Accepted};
