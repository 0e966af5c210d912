//! Actions and Rejections
//!
//! What a participant may ask for, and every way the server can say no.

use serde::{Serialize, Deserialize};
use thiserror::Error;

use crate::game::board::{BoardError, CardInstanceId, Position};
use crate::game::catalog::CardTypeId;
use crate::game::state::{Phase, PlayerId};

// =============================================================================
// ACTIONS
// =============================================================================

/// What a placed card does with its action.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// Damage an opposing card in range
    Attack,
    /// Grant guard to itself or an own card
    Defend,
    /// Raise its own attack
    Pump,
}

/// A proposed move.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    /// Put a card from hand onto the board.
    PlaceCard {
        /// Card type from hand
        card: CardTypeId,
        /// Target cell
        position: Position,
    },
    /// Have a placed card act.
    PerformCardAction {
        /// Acting card
        card_id: CardInstanceId,
        /// What it does
        kind: ActionKind,
        /// Target card, where the kind takes one
        #[serde(default)]
        target: Option<CardInstanceId>,
    },
    /// Move to the next phase.
    AdvancePhase {
        /// Phase the client believes is current
        #[serde(default)]
        expected: Option<Phase>,
    },
}

/// An action together with who sent it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    /// Originating player
    pub player: PlayerId,
    /// Client sequence number; must exceed every earlier accepted one
    pub client_seq: u64,
    /// The proposed action
    pub action: Action,
}

impl Submission {
    /// Create a submission.
    pub fn new(player: PlayerId, client_seq: u64, action: Action) -> Self {
        Self { player, client_seq, action }
    }
}

// =============================================================================
// REJECTIONS
// =============================================================================

/// Rejection taxonomy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionCategory {
    /// The move is geometrically or syntactically impossible
    Structural,
    /// The move is not allowed right now
    Procedural,
    /// The match is over
    Terminal,
}

/// Why an action was rejected.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Error)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    /// Action not allowed in the current phase
    #[error("wrong phase")]
    WrongPhase,
    /// Sender is not the active player
    #[error("not your turn")]
    NotYourTurn,
    /// Target cell already holds a card
    #[error("cell is occupied")]
    OccupiedCell,
    /// Coordinate outside the board
    #[error("position out of bounds")]
    OutOfBounds,
    /// Card may not be placed on that layer
    #[error("layer constraint violated")]
    LayerConstraintViolated,
    /// Acting card already acted this round
    #[error("card is exhausted")]
    CardExhausted,
    /// Acting card or target is not acceptable
    #[error("invalid target")]
    InvalidTarget,
    /// Card type is not in the sender's hand
    #[error("card not in hand")]
    CardNotInHand,
    /// Action budget used up
    #[error("no actions remaining")]
    NoActionsRemaining,
    /// Client sequence number already used
    #[error("duplicate action")]
    DuplicateAction,
    /// Sender holds no seat in the match
    #[error("not a participant")]
    NotAParticipant,
    /// Payload does not describe a valid action
    #[error("malformed action")]
    MalformedAction,
    /// The match has ended
    #[error("match has ended")]
    MatchEnded,
}

impl RejectionReason {
    /// Category this reason belongs to.
    pub fn category(self) -> RejectionCategory {
        use RejectionReason::*;
        match self {
            OutOfBounds | OccupiedCell | LayerConstraintViolated | MalformedAction => {
                RejectionCategory::Structural
            }
            MatchEnded => RejectionCategory::Terminal,
            WrongPhase | NotYourTurn | CardExhausted | InvalidTarget | CardNotInHand
            | NoActionsRemaining | DuplicateAction | NotAParticipant => {
                RejectionCategory::Procedural
            }
        }
    }
}

impl From<BoardError> for RejectionReason {
    fn from(err: BoardError) -> Self {
        match err {
            BoardError::OutOfBounds(_) => RejectionReason::OutOfBounds,
            BoardError::OccupiedCell(_) => RejectionReason::OccupiedCell,
            BoardError::DuplicateInstance(_) => RejectionReason::MalformedAction,
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categories() {
        assert_eq!(RejectionReason::OccupiedCell.category(), RejectionCategory::Structural);
        assert_eq!(RejectionReason::MalformedAction.category(), RejectionCategory::Structural);
        assert_eq!(RejectionReason::NotYourTurn.category(), RejectionCategory::Procedural);
        assert_eq!(RejectionReason::DuplicateAction.category(), RejectionCategory::Procedural);
        assert_eq!(RejectionReason::MatchEnded.category(), RejectionCategory::Terminal);
    }

    #[test]
    fn test_action_wire_format() {
        let action = Action::PlaceCard {
            card: CardTypeId(3),
            position: Position::new(1, 1, 0),
        };
        let json = serde_json::to_value(&action).unwrap();
        assert_eq!(json["type"], "place_card");
        assert_eq!(json["card"], 3);
        assert_eq!(json["position"]["z"], 0);

        let parsed: Action = serde_json::from_str(
            r#"{"type": "perform_card_action", "card_id": 4, "kind": "attack", "target": 9}"#,
        )
        .unwrap();
        assert_eq!(
            parsed,
            Action::PerformCardAction {
                card_id: CardInstanceId(4),
                kind: ActionKind::Attack,
                target: Some(CardInstanceId(9)),
            }
        );

        let parsed: Action = serde_json::from_str(r#"{"type": "advance_phase"}"#).unwrap();
        assert_eq!(parsed, Action::AdvancePhase { expected: None });
    }

    #[test]
    fn test_reason_wire_names() {
        assert_eq!(
            serde_json::to_string(&RejectionReason::NotAParticipant).unwrap(),
            "\"not_a_participant\""
        );
        assert_eq!(
            serde_json::to_string(&RejectionReason::LayerConstraintViolated).unwrap(),
            "\"layer_constraint_violated\""
        );
    }
}
