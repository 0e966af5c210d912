//! Match State Machine
//!
//! Phase transitions and the single mutation path for a match.
//!
//! ```text
//! Setup ──begin──▶ Deployment ──▶ Action ──▶ Resolution ──┬──▶ Deployment
//!                                                        └──▶ End
//! ```
//!
//! Planning functions (`advance`, `forfeit`, `abandon`) only read state and
//! return a `DeltaChange`. `apply` is the only function that mutates a
//! match after it is created; replay folds `apply` over a delta log.

use thiserror::Error;

use crate::game::action::{ActionKind, RejectionReason};
use crate::game::board::{BoardError, CardInstanceId, CardStatus, PlacedCard};
use crate::game::delta::{CardEffect, DeltaChange, MatchDelta, ResolutionCleanup, TurnStart};
use crate::game::rules::{RulesConfig, Ruleset};
use crate::game::state::{
    EndReason, MatchOutcome, MatchResult, MatchState, Phase, PlayerSlot,
};

// =============================================================================
// ERRORS
// =============================================================================

/// A delta could not be applied to a state.
///
/// Never produced for deltas the validator created against the same
/// state; seen when replaying a log against the wrong opening state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReplayError {
    /// Delta sequence number is not state.seq + 1.
    #[error("sequence gap: expected {expected}, got {found}")]
    SequenceGap {
        /// Expected sequence number
        expected: u64,
        /// Sequence number found in the delta
        found: u64,
    },
    /// The match is already over.
    #[error("match has already ended")]
    MatchOver,
    /// Delta was recorded in a different phase.
    #[error("phase mismatch: state is {state:?}, delta expects {delta:?}")]
    PhaseMismatch {
        /// Current phase
        state: Phase,
        /// Phase named by the delta
        delta: Phase,
    },
    /// Referenced card instance is not on the board.
    #[error("unknown card instance {0}")]
    MissingCard(CardInstanceId),
    /// Hand does not hold the card at the recorded index.
    #[error("hand of {slot:?} does not match at index {index}")]
    HandMismatch {
        /// Seat
        slot: PlayerSlot,
        /// Hand index
        index: usize,
    },
    /// Deck top does not match the recorded draw.
    #[error("deck of {0:?} does not match the recorded draw")]
    DeckMismatch(PlayerSlot),
    /// Board rejected the placement.
    #[error(transparent)]
    Board(#[from] BoardError),
    /// Final state hash differs from the expected one.
    #[error("state hash mismatch after replay")]
    HashMismatch,
}

// =============================================================================
// TRANSITIONS
// =============================================================================

/// Phase that follows `phase` in normal play.
///
/// Resolution may also lead to End; that branch is decided by the win
/// condition, not the table.
pub fn successor(phase: Phase) -> Option<Phase> {
    match phase {
        Phase::Setup => Some(Phase::Deployment),
        Phase::Deployment => Some(Phase::Action),
        Phase::Action => Some(Phase::Resolution),
        Phase::Resolution => Some(Phase::Deployment),
        Phase::End => None,
    }
}

/// Start a match once both seats are filled.
///
/// Part of building the opening state: no delta and no sequence number.
/// Returns false if the match already left Setup.
pub fn begin(state: &mut MatchState, rules: &RulesConfig) -> bool {
    if state.phase != Phase::Setup || state.seq != 0 {
        return false;
    }
    state.phase = Phase::Deployment;
    state.turn = 1;
    state.active = PlayerSlot::A;
    state.player_mut(PlayerSlot::A).actions_remaining = rules.actions_per_turn;
    state.player_mut(PlayerSlot::B).actions_remaining = 0;
    true
}

/// Plan a phase advance requested by `actor`.
pub fn advance(
    state: &MatchState,
    ruleset: &Ruleset,
    actor: PlayerSlot,
    expected: Option<Phase>,
) -> Result<DeltaChange, RejectionReason> {
    if state.is_over() {
        return Err(RejectionReason::MatchEnded);
    }
    if state.phase == Phase::Setup {
        return Err(RejectionReason::WrongPhase);
    }
    if actor != state.active {
        return Err(RejectionReason::NotYourTurn);
    }
    if expected.is_some_and(|phase| phase != state.phase) {
        return Err(RejectionReason::WrongPhase);
    }

    let from = state.phase;
    let to = successor(from).ok_or(RejectionReason::MatchEnded)?;

    if from != Phase::Resolution {
        return Ok(DeltaChange::PhaseAdvanced {
            from,
            to,
            cleanup: None,
            next_turn: None,
            outcome: None,
        });
    }

    // Evaluate the win condition on the cleaned state
    let mut cleaned = state.clone();
    let cleanup = plan_cleanup(&cleaned);
    // Ids were just read from this board, so removal cannot miss
    run_cleanup(&mut cleaned, &cleanup).map_err(|_| RejectionReason::MalformedAction)?;

    let outcome = ruleset
        .win_condition
        .evaluate(&cleaned.board, &cleaned.players)
        .map(|result| MatchOutcome { result, reason: EndReason::Eliminated })
        .or_else(|| {
            let limit = ruleset.rules.max_turns?;
            (state.turn >= limit).then_some(MatchOutcome {
                result: MatchResult::Draw,
                reason: EndReason::TurnLimit,
            })
        });

    if let Some(outcome) = outcome {
        return Ok(DeltaChange::PhaseAdvanced {
            from,
            to: Phase::End,
            cleanup: Some(cleanup),
            next_turn: None,
            outcome: Some(outcome),
        });
    }

    let active = state.active.other();
    let drew = if ruleset.rules.draw_per_round {
        state.player(active).deck.first().copied()
    } else {
        None
    };

    Ok(DeltaChange::PhaseAdvanced {
        from,
        to,
        cleanup: Some(cleanup),
        next_turn: Some(TurnStart {
            active,
            turn: state.turn + 1,
            actions: ruleset.rules.actions_per_turn,
            drew,
        }),
        outcome: None,
    })
}

/// Plan a forfeit by `loser`. `None` if the match is already over.
pub fn forfeit(state: &MatchState, loser: PlayerSlot) -> Option<DeltaChange> {
    if state.is_over() {
        return None;
    }
    Some(DeltaChange::MatchClosed {
        outcome: MatchOutcome {
            result: MatchResult::Win(loser.other()),
            reason: EndReason::Forfeit,
        },
    })
}

/// Plan an abandonment (draw). `None` if the match is already over.
pub fn abandon(state: &MatchState) -> Option<DeltaChange> {
    if state.is_over() {
        return None;
    }
    Some(DeltaChange::MatchClosed {
        outcome: MatchOutcome {
            result: MatchResult::Draw,
            reason: EndReason::Abandoned,
        },
    })
}

fn plan_cleanup(state: &MatchState) -> ResolutionCleanup {
    ResolutionCleanup {
        removed: state
            .board
            .cards()
            .filter(|c| !c.is_live())
            .map(|c| c.instance)
            .collect(),
    }
}

fn run_cleanup(state: &mut MatchState, cleanup: &ResolutionCleanup) -> Result<(), ReplayError> {
    for &instance in &cleanup.removed {
        let position = state
            .board
            .find(instance)
            .map(|c| c.position)
            .ok_or(ReplayError::MissingCard(instance))?;
        if let Some(card) = state.board.remove(position) {
            state.player_mut(card.owner).graveyard.push(card.card);
        }
    }

    for card in state.board.cards_mut() {
        if card.status == CardStatus::Exhausted {
            card.status = CardStatus::Active;
        }
        card.guard = 0;
    }
    Ok(())
}

// =============================================================================
// APPLY
// =============================================================================

/// Apply a delta. The only mutation path for a running match.
///
/// Atomic: on error the state is left untouched.
pub fn apply(state: &mut MatchState, delta: &MatchDelta) -> Result<(), ReplayError> {
    let expected = state.seq + 1;
    if delta.seq != expected {
        return Err(ReplayError::SequenceGap { expected, found: delta.seq });
    }
    if state.is_over() {
        return Err(ReplayError::MatchOver);
    }

    let mut next = state.clone();
    apply_change(&mut next, &delta.change)?;

    if let Some(origin) = delta.origin {
        next.player_mut(origin.slot).last_client_seq = origin.client_seq;
    }
    next.seq = delta.seq;

    *state = next;
    Ok(())
}

fn apply_change(state: &mut MatchState, change: &DeltaChange) -> Result<(), ReplayError> {
    match change {
        DeltaChange::CardPlaced { instance, card, position, owner, hand_index, attack, health } => {
            let player = state.player_mut(*owner);
            if player.hand.get(*hand_index) != Some(card) {
                return Err(ReplayError::HandMismatch { slot: *owner, index: *hand_index });
            }
            player.hand.remove(*hand_index);
            player.actions_remaining = player.actions_remaining.saturating_sub(1);

            state.board.place(PlacedCard {
                instance: *instance,
                card: *card,
                position: *position,
                owner: *owner,
                status: CardStatus::Active,
                attack: *attack,
                health: *health,
                guard: 0,
            })?;
            state.next_instance = state.next_instance.max(instance.0 + 1);
        }

        DeltaChange::CardActed { actor, action, effect } => {
            let owner = {
                let card = state
                    .board
                    .find_mut(*actor)
                    .ok_or(ReplayError::MissingCard(*actor))?;
                card.status = CardStatus::Exhausted;
                if let (ActionKind::Pump, CardEffect::Pump { amount }) = (action, effect) {
                    card.attack += amount;
                }
                card.owner
            };

            match *effect {
                CardEffect::Damage { target, amount, destroyed } => {
                    let card = state
                        .board
                        .find_mut(target)
                        .ok_or(ReplayError::MissingCard(target))?;
                    card.health -= amount;
                    if destroyed {
                        card.status = CardStatus::Destroyed;
                    }
                }
                CardEffect::Guard { target, amount } => {
                    let card = state
                        .board
                        .find_mut(target)
                        .ok_or(ReplayError::MissingCard(target))?;
                    card.guard += amount;
                }
                CardEffect::Pump { .. } => {}
            }

            let player = state.player_mut(owner);
            player.actions_remaining = player.actions_remaining.saturating_sub(1);
        }

        DeltaChange::PhaseAdvanced { from, to, cleanup, next_turn, outcome } => {
            if state.phase != *from {
                return Err(ReplayError::PhaseMismatch { state: state.phase, delta: *from });
            }
            if let Some(cleanup) = cleanup {
                run_cleanup(state, cleanup)?;
            }
            state.phase = *to;

            if let Some(outcome) = outcome {
                state.phase = Phase::End;
                state.outcome = Some(*outcome);
            } else if let Some(turn) = next_turn {
                start_turn(state, turn)?;
            }
        }

        DeltaChange::MatchClosed { outcome } => {
            state.phase = Phase::End;
            state.outcome = Some(*outcome);
        }
    }
    Ok(())
}

fn start_turn(state: &mut MatchState, turn: &TurnStart) -> Result<(), ReplayError> {
    state.active = turn.active;
    state.turn = turn.turn;
    state.player_mut(turn.active.other()).actions_remaining = 0;

    let player = state.player_mut(turn.active);
    player.actions_remaining = turn.actions;
    if let Some(card) = turn.drew {
        if player.deck.first() != Some(&card) {
            return Err(ReplayError::DeckMismatch(turn.active));
        }
        player.deck.remove(0);
        player.hand.push(card);
    }
    Ok(())
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::board::Position;
    use crate::game::catalog::CardTypeId;
    use crate::game::delta::DeltaOrigin;
    use crate::game::state::PlayerId;
    use uuid::Uuid;

    fn started() -> (MatchState, Ruleset) {
        let ruleset = Ruleset::builtin();
        let mut state = MatchState::new(
            Uuid::from_bytes([1; 16]),
            [PlayerId::new([1; 16]), PlayerId::new([2; 16])],
            &ruleset,
        );
        assert!(begin(&mut state, &ruleset.rules));
        (state, ruleset)
    }

    fn system(state: &MatchState, change: DeltaChange) -> MatchDelta {
        MatchDelta { seq: state.seq + 1, origin: None, change }
    }

    fn advance_as_active(state: &mut MatchState, ruleset: &Ruleset) {
        let change = advance(state, ruleset, state.active, None).unwrap();
        let delta = system(state, change);
        apply(state, &delta).unwrap();
    }

    #[test]
    fn test_successor_table() {
        assert_eq!(successor(Phase::Setup), Some(Phase::Deployment));
        assert_eq!(successor(Phase::Deployment), Some(Phase::Action));
        assert_eq!(successor(Phase::Action), Some(Phase::Resolution));
        assert_eq!(successor(Phase::Resolution), Some(Phase::Deployment));
        assert_eq!(successor(Phase::End), None);
    }

    #[test]
    fn test_begin() {
        let (mut state, ruleset) = started();
        assert_eq!(state.phase, Phase::Deployment);
        assert_eq!(state.turn, 1);
        assert_eq!(state.active, PlayerSlot::A);
        assert_eq!(state.seq, 0);
        assert_eq!(state.player(PlayerSlot::A).actions_remaining, ruleset.rules.actions_per_turn);

        // Only once
        assert!(!begin(&mut state, &ruleset.rules));
    }

    #[test]
    fn test_advance_guards() {
        let ruleset = Ruleset::builtin();
        let setup = MatchState::new(
            Uuid::from_bytes([1; 16]),
            [PlayerId::new([1; 16]), PlayerId::new([2; 16])],
            &ruleset,
        );
        assert_eq!(
            advance(&setup, &ruleset, PlayerSlot::A, None),
            Err(RejectionReason::WrongPhase)
        );

        let (state, ruleset) = started();
        assert_eq!(
            advance(&state, &ruleset, PlayerSlot::B, None),
            Err(RejectionReason::NotYourTurn)
        );
        assert_eq!(
            advance(&state, &ruleset, PlayerSlot::A, Some(Phase::Action)),
            Err(RejectionReason::WrongPhase)
        );
        assert!(advance(&state, &ruleset, PlayerSlot::A, Some(Phase::Deployment)).is_ok());
    }

    #[test]
    fn test_full_round_switches_player_and_draws() {
        let (mut state, ruleset) = started();
        let b_deck_top = state.player(PlayerSlot::B).deck[0];
        let b_hand = state.player(PlayerSlot::B).hand.len();

        advance_as_active(&mut state, &ruleset); // -> Action
        advance_as_active(&mut state, &ruleset); // -> Resolution
        assert_eq!(state.phase, Phase::Resolution);
        assert_eq!(state.active, PlayerSlot::A);

        advance_as_active(&mut state, &ruleset); // -> Deployment, B's turn
        assert_eq!(state.phase, Phase::Deployment);
        assert_eq!(state.active, PlayerSlot::B);
        assert_eq!(state.turn, 2);
        assert_eq!(state.seq, 3);
        assert_eq!(state.player(PlayerSlot::B).hand.len(), b_hand + 1);
        assert_eq!(state.player(PlayerSlot::B).hand.last(), Some(&b_deck_top));
        assert_eq!(state.player(PlayerSlot::B).actions_remaining, ruleset.rules.actions_per_turn);
        assert_eq!(state.player(PlayerSlot::A).actions_remaining, 0);
    }

    #[test]
    fn test_resolution_cleanup_and_elimination() {
        let (mut state, ruleset) = started();

        // B has nothing left anywhere; A has one exhausted card and one destroyed
        state.player_mut(PlayerSlot::B).hand.clear();
        for (i, status) in [CardStatus::Exhausted, CardStatus::Destroyed].into_iter().enumerate() {
            state
                .board
                .place(PlacedCard {
                    instance: CardInstanceId(i as u32),
                    card: CardTypeId(3),
                    position: Position::new(i as u8, 0, 0),
                    owner: PlayerSlot::A,
                    status,
                    attack: 4,
                    health: 4,
                    guard: 1,
                })
                .unwrap();
        }
        state.next_instance = 2;
        state.phase = Phase::Resolution;

        advance_as_active(&mut state, &ruleset);

        assert_eq!(state.phase, Phase::End);
        assert_eq!(
            state.outcome,
            Some(MatchOutcome { result: MatchResult::Win(PlayerSlot::A), reason: EndReason::Eliminated })
        );
        assert_eq!(state.board.len(), 1);
        let survivor = state.board.find(CardInstanceId(0)).unwrap();
        assert_eq!(survivor.status, CardStatus::Active);
        assert_eq!(survivor.guard, 0);
        assert_eq!(state.player(PlayerSlot::A).graveyard, vec![CardTypeId(3)]);

        assert_eq!(
            advance(&state, &ruleset, PlayerSlot::A, None),
            Err(RejectionReason::MatchEnded)
        );
    }

    #[test]
    fn test_turn_limit_draw() {
        let (mut state, mut ruleset) = started();
        ruleset.rules.max_turns = Some(1);

        advance_as_active(&mut state, &ruleset);
        advance_as_active(&mut state, &ruleset);
        advance_as_active(&mut state, &ruleset);

        assert_eq!(
            state.outcome,
            Some(MatchOutcome { result: MatchResult::Draw, reason: EndReason::TurnLimit })
        );
    }

    #[test]
    fn test_forfeit_and_abandon() {
        let (mut state, _) = started();
        let change = forfeit(&state, PlayerSlot::A).unwrap();
        let delta = system(&state, change);
        apply(&mut state, &delta).unwrap();

        assert!(state.is_over());
        assert_eq!(state.outcome.unwrap().winner(), Some(PlayerSlot::B));
        assert!(forfeit(&state, PlayerSlot::B).is_none());
        assert!(abandon(&state).is_none());

        let (state, _) = started();
        assert_eq!(
            abandon(&state),
            Some(DeltaChange::MatchClosed {
                outcome: MatchOutcome { result: MatchResult::Draw, reason: EndReason::Abandoned }
            })
        );
    }

    #[test]
    fn test_apply_rejects_sequence_gap_without_mutation() {
        let (mut state, ruleset) = started();
        let change = advance(&state, &ruleset, PlayerSlot::A, None).unwrap();
        let delta = MatchDelta { seq: 5, origin: None, change };

        let before = state.clone();
        assert_eq!(
            apply(&mut state, &delta),
            Err(ReplayError::SequenceGap { expected: 1, found: 5 })
        );
        assert_eq!(state, before);
    }

    #[test]
    fn test_apply_is_atomic_on_bad_placement() {
        let (mut state, _) = started();
        let card = state.player(PlayerSlot::A).hand[0];
        let delta = MatchDelta {
            seq: 1,
            origin: Some(DeltaOrigin { slot: PlayerSlot::A, client_seq: 1 }),
            change: DeltaChange::CardPlaced {
                instance: CardInstanceId(0),
                card,
                position: Position::new(200, 0, 0),
                owner: PlayerSlot::A,
                hand_index: 0,
                attack: 1,
                health: 1,
            },
        };

        let before = state.clone();
        assert!(matches!(apply(&mut state, &delta), Err(ReplayError::Board(_))));
        assert_eq!(state, before);
    }
}
