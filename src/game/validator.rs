//! Action Validator
//!
//! Pure function from (state, submission) to a delta or a rejection.
//! Never mutates, never performs I/O. The first failing check wins, in
//! this order:
//!
//! 1. `MatchEnded`
//! 2. `NotAParticipant`
//! 3. `DuplicateAction`
//! 4. action-specific checks
//!
//! Placement checks geometry before turn ownership, so probing an
//! occupied cell reports `OccupiedCell` to either player.

use crate::game::action::{Action, ActionKind, RejectionReason, Submission};
use crate::game::board::{CardInstanceId, CardStatus, PlacedCard, Position};
use crate::game::catalog::{CardDefinition, CardTypeId, EffectTag};
use crate::game::delta::{CardEffect, DeltaChange, DeltaOrigin, MatchDelta};
use crate::game::machine;
use crate::game::rules::Ruleset;
use crate::game::state::{MatchState, Phase, PlayerSlot};

/// Validate a submission against the current state.
///
/// On success the returned delta carries `state.seq + 1`.
pub fn validate(
    state: &MatchState,
    ruleset: &Ruleset,
    submission: &Submission,
) -> Result<MatchDelta, RejectionReason> {
    if state.is_over() {
        return Err(RejectionReason::MatchEnded);
    }

    let slot = state
        .slot_of(submission.player)
        .ok_or(RejectionReason::NotAParticipant)?;

    if submission.client_seq <= state.player(slot).last_client_seq {
        return Err(RejectionReason::DuplicateAction);
    }

    let change = match &submission.action {
        Action::PlaceCard { card, position } => {
            validate_place(state, ruleset, slot, *card, *position)?
        }
        Action::PerformCardAction { card_id, kind, target } => {
            validate_card_action(state, ruleset, slot, *card_id, *kind, *target)?
        }
        Action::AdvancePhase { expected } => machine::advance(state, ruleset, slot, *expected)?,
    };

    Ok(MatchDelta {
        seq: state.seq + 1,
        origin: Some(DeltaOrigin { slot, client_seq: submission.client_seq }),
        change,
    })
}

// =============================================================================
// PLACEMENT
// =============================================================================

fn validate_place(
    state: &MatchState,
    ruleset: &Ruleset,
    slot: PlayerSlot,
    card: CardTypeId,
    position: Position,
) -> Result<DeltaChange, RejectionReason> {
    if state.phase != Phase::Deployment {
        return Err(RejectionReason::WrongPhase);
    }
    state.board.check_placement(position)?;
    ensure_turn(state, slot)?;

    let hand_index = state
        .player(slot)
        .hand
        .iter()
        .position(|&c| c == card)
        .ok_or(RejectionReason::CardNotInHand)?;

    let def = ruleset
        .catalog
        .get(card)
        .ok_or(RejectionReason::MalformedAction)?;
    if !def.allows_layer(position.z) {
        return Err(RejectionReason::LayerConstraintViolated);
    }

    Ok(DeltaChange::CardPlaced {
        instance: CardInstanceId(state.next_instance),
        card,
        position,
        owner: slot,
        hand_index,
        attack: def.attack,
        health: def.defense,
    })
}

// =============================================================================
// CARD ACTIONS
// =============================================================================

fn validate_card_action(
    state: &MatchState,
    ruleset: &Ruleset,
    slot: PlayerSlot,
    card_id: CardInstanceId,
    kind: ActionKind,
    target: Option<CardInstanceId>,
) -> Result<DeltaChange, RejectionReason> {
    if state.phase != Phase::Action {
        return Err(RejectionReason::WrongPhase);
    }
    ensure_turn(state, slot)?;

    let actor = state
        .board
        .find(card_id)
        .filter(|c| c.owner == slot && c.is_live())
        .ok_or(RejectionReason::InvalidTarget)?;
    if actor.status == CardStatus::Exhausted {
        return Err(RejectionReason::CardExhausted);
    }
    let actor_def = definition(ruleset, actor)?;

    let effect = match kind {
        ActionKind::Attack => {
            let target = target
                .and_then(|id| state.board.find(id))
                .filter(|t| t.owner != slot && t.is_live())
                .ok_or(RejectionReason::InvalidTarget)?;
            if actor.position.chebyshev(target.position) > actor_def.range {
                return Err(RejectionReason::InvalidTarget);
            }
            let target_def = definition(ruleset, target)?;

            let amount = attack_damage(actor, actor_def, target, target_def);
            CardEffect::Damage {
                target: target.instance,
                amount,
                destroyed: target.health - amount <= 0,
            }
        }
        ActionKind::Defend => {
            let target = match target {
                None => actor,
                Some(id) => state
                    .board
                    .find(id)
                    .filter(|t| t.owner == slot && t.is_live())
                    .ok_or(RejectionReason::InvalidTarget)?,
            };
            let bonus = i32::from(actor_def.has_tag(EffectTag::Guardian));
            CardEffect::Guard {
                target: target.instance,
                amount: ruleset.rules.defend_guard + bonus,
            }
        }
        ActionKind::Pump => {
            if target.is_some_and(|id| id != actor.instance) {
                return Err(RejectionReason::InvalidTarget);
            }
            let amount = if actor_def.has_tag(EffectTag::Surge) { 2 } else { 1 };
            CardEffect::Pump { amount }
        }
    };

    Ok(DeltaChange::CardActed {
        actor: actor.instance,
        action: kind,
        effect,
    })
}

/// Damage dealt by one attack.
///
/// Guard absorbs damage unless the attacker is Piercing; Bulwark targets
/// take one less. Never negative.
pub fn attack_damage(
    attacker: &PlacedCard,
    attacker_def: &CardDefinition,
    target: &PlacedCard,
    target_def: &CardDefinition,
) -> i32 {
    let guard = if attacker_def.has_tag(EffectTag::Piercing) { 0 } else { target.guard };
    let bulwark = i32::from(target_def.has_tag(EffectTag::Bulwark));
    (attacker.attack - guard - bulwark).max(0)
}

fn ensure_turn(state: &MatchState, slot: PlayerSlot) -> Result<(), RejectionReason> {
    if state.active != slot {
        return Err(RejectionReason::NotYourTurn);
    }
    if state.player(slot).actions_remaining == 0 {
        return Err(RejectionReason::NoActionsRemaining);
    }
    Ok(())
}

fn definition<'a>(
    ruleset: &'a Ruleset,
    card: &PlacedCard,
) -> Result<&'a CardDefinition, RejectionReason> {
    ruleset
        .catalog
        .get(card.card)
        .ok_or(RejectionReason::MalformedAction)
}

// =============================================================================
// TESTS
// =============================================================================
