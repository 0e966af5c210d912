//! Match Deltas
//!
//! A delta is the minimal, self-contained record of one accepted state
//! change. Applying it needs no ruleset: every value the validator
//! computed (damage, drawn card, outcome) is carried in the delta, so a
//! delta log can be replayed against the opening state alone.

use serde::{Serialize, Deserialize};

use crate::game::action::ActionKind;
use crate::game::board::{CardInstanceId, Position};
use crate::game::catalog::CardTypeId;
use crate::game::state::{MatchOutcome, Phase, PlayerSlot};

/// Who caused a delta. Absent for system deltas.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaOrigin {
    /// Acting seat
    pub slot: PlayerSlot,
    /// Client sequence number of the submission
    pub client_seq: u64,
}

/// One accepted change, stamped with its match-local sequence number.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchDelta {
    /// Sequence number (previous + 1)
    pub seq: u64,
    /// Originating player, if any
    pub origin: Option<DeltaOrigin>,
    /// The change
    pub change: DeltaChange,
}

/// Result of a card action on its target.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "effect", rename_all = "snake_case")]
pub enum CardEffect {
    /// Target loses health.
    Damage {
        /// Damaged card
        target: CardInstanceId,
        /// Health lost
        amount: i32,
        /// Health reached zero
        destroyed: bool,
    },
    /// Target gains guard.
    Guard {
        /// Guarded card
        target: CardInstanceId,
        /// Guard gained
        amount: i32,
    },
    /// Acting card gains attack.
    Pump {
        /// Attack gained
        amount: i32,
    },
}

/// Cleanup performed when leaving Resolution.
///
/// Listed cards go to their owner's graveyard; exhausted cards are
/// refreshed and every guard resets.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionCleanup {
    /// Destroyed cards removed from the board
    pub removed: Vec<CardInstanceId>,
}

/// Start of the next turn.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnStart {
    /// New active seat
    pub active: PlayerSlot,
    /// New turn number
    pub turn: u32,
    /// Budget granted to the active seat
    pub actions: u8,
    /// Card drawn from the top of the deck
    pub drew: Option<CardTypeId>,
}

/// The state change carried by a delta.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DeltaChange {
    /// A card left a hand and entered the board.
    CardPlaced {
        /// New instance id
        instance: CardInstanceId,
        /// Card type
        card: CardTypeId,
        /// Cell
        position: Position,
        /// Owner
        owner: PlayerSlot,
        /// Index of the card in the owner's hand
        hand_index: usize,
        /// Starting attack
        attack: i32,
        /// Starting health
        health: i32,
    },
    /// A placed card acted and is now exhausted.
    CardActed {
        /// Acting card
        actor: CardInstanceId,
        /// Action kind
        action: ActionKind,
        /// Effect applied
        effect: CardEffect,
    },
    /// The phase moved on.
    PhaseAdvanced {
        /// Phase left
        from: Phase,
        /// Phase entered
        to: Phase,
        /// Present when leaving Resolution
        #[serde(default)]
        cleanup: Option<ResolutionCleanup>,
        /// Present when a new turn starts
        #[serde(default)]
        next_turn: Option<TurnStart>,
        /// Present when the match ended
        #[serde(default)]
        outcome: Option<MatchOutcome>,
    },
    /// The match ended by a system decision (forfeit or abandonment).
    MatchClosed {
        /// Outcome
        outcome: MatchOutcome,
    },
}

impl DeltaChange {
    /// Outcome recorded by this change, if it ends the match.
    pub fn outcome(&self) -> Option<MatchOutcome> {
        match self {
            DeltaChange::PhaseAdvanced { outcome, .. } => *outcome,
            DeltaChange::MatchClosed { outcome } => Some(*outcome),
            _ => None,
        }
    }
}
