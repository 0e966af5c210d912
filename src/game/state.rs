//! Match State Definitions
//!
//! All state types for a single match.
//! Uses BTreeMap-backed collections for deterministic iteration order.

use serde::{Serialize, Deserialize};
use uuid::Uuid;

use crate::core::rng::{DeterministicRng, derive_match_seed};
use crate::core::hash::{StateHash, StateHasher, compute_state_hash};
use crate::game::board::Board;
use crate::game::catalog::CardTypeId;
use crate::game::rules::Ruleset;

pub use crate::game::board::PlayerSlot;

// =============================================================================
// PLAYER ID
// =============================================================================

/// Opaque player identifier (16 bytes).
///
/// Implements Ord for deterministic ordering.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[derive(Default)]
pub struct PlayerId(pub [u8; 16]);

impl PlayerId {
    /// Create from raw bytes.
    pub const fn new(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Create from UUID string.
    pub fn from_uuid_str(s: &str) -> Option<Self> {
        Uuid::parse_str(s)
            .ok()
            .map(|u| Self(*u.as_bytes()))
    }

    /// Convert to UUID string.
    pub fn to_uuid_string(&self) -> String {
        Uuid::from_bytes(self.0).to_string()
    }

    /// Short hex prefix for logs.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }

    /// Get raw bytes.
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl std::fmt::Display for PlayerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.short())
    }
}

// =============================================================================
// PLAYER
// =============================================================================

/// One participant's private match state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    /// Player identity
    pub id: PlayerId,

    /// Seat
    pub slot: PlayerSlot,

    /// Cards not yet placed, in draw order
    pub hand: Vec<CardTypeId>,

    /// Draw pile; the top card is index 0
    pub deck: Vec<CardTypeId>,

    /// Cards removed from the board
    pub graveyard: Vec<CardTypeId>,

    /// Actions left this turn
    pub actions_remaining: u8,

    /// Highest client sequence number accepted from this player
    pub last_client_seq: u64,
}

impl Player {
    fn new(id: PlayerId, slot: PlayerSlot) -> Self {
        Self {
            id,
            slot,
            hand: Vec::new(),
            deck: Vec::new(),
            graveyard: Vec::new(),
            actions_remaining: 0,
            last_client_seq: 0,
        }
    }
}

// =============================================================================
// PHASE & OUTCOME
// =============================================================================

/// Match phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
#[derive(Default)]
pub enum Phase {
    /// Waiting for both participants
    #[default]
    Setup = 0,
    /// Active player places cards
    Deployment = 1,
    /// Active player's cards act
    Action = 2,
    /// End of the active player's turn; cleanup and win check
    Resolution = 3,
    /// Match over
    End = 4,
}

/// Result of a finished match.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchResult {
    /// The given seat won
    Win(PlayerSlot),
    /// Nobody won
    Draw,
}

/// Why a match ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum EndReason {
    /// A win condition was met
    Eliminated = 0,
    /// The turn limit was reached
    TurnLimit = 1,
    /// A participant left or did not return in time
    Forfeit = 2,
    /// The match sat idle too long
    Abandoned = 3,
}

/// Final outcome.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchOutcome {
    /// Winner or draw
    pub result: MatchResult,
    /// End reason
    pub reason: EndReason,
}

impl MatchOutcome {
    /// Winning seat, if any.
    pub fn winner(&self) -> Option<PlayerSlot> {
        match self.result {
            MatchResult::Win(slot) => Some(slot),
            MatchResult::Draw => None,
        }
    }
}

// =============================================================================
// MATCH STATE
// =============================================================================

/// Complete authoritative state of a match.
///
/// Only `machine::apply` mutates a match after its opening state is built.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchState {
    /// Match identifier
    pub match_id: Uuid,

    /// Seed used for deck shuffling
    pub seed: u64,

    /// Participants, indexed by `PlayerSlot::index`
    pub players: [Player; 2],

    /// The board
    pub board: Board,

    /// Current phase
    pub phase: Phase,

    /// Seat whose turn it is
    pub active: PlayerSlot,

    /// Turn counter (0 during Setup)
    pub turn: u32,

    /// Sequence number of the last applied delta
    pub seq: u64,

    /// Next card instance id to allocate
    pub next_instance: u32,

    /// Set once the match has ended
    pub outcome: Option<MatchOutcome>,
}

impl MatchState {
    /// Build the opening state (sequence 0, phase Setup).
    ///
    /// Each deck is the ruleset deck shuffled with a seed derived from the
    /// match id and the participants, then `hand_size` cards are dealt.
    pub fn new(match_id: Uuid, players: [PlayerId; 2], ruleset: &Ruleset) -> Self {
        let seed = derive_match_seed(match_id.as_bytes(), &[players[0].0, players[1].0]);
        let mut rng = DeterministicRng::new(seed);
        let rules = &ruleset.rules;

        let seat = |id: PlayerId, slot: PlayerSlot, rng: &mut DeterministicRng| {
            let mut player = Player::new(id, slot);
            let mut deck = rules.deck.clone();
            rng.shuffle(&mut deck);
            let dealt = rules.hand_size.min(deck.len());
            player.hand = deck.drain(..dealt).collect();
            player.deck = deck;
            player
        };

        let a = seat(players[0], PlayerSlot::A, &mut rng);
        let b = seat(players[1], PlayerSlot::B, &mut rng);

        Self {
            match_id,
            seed,
            players: [a, b],
            board: Board::new(rules.board),
            phase: Phase::Setup,
            active: PlayerSlot::A,
            turn: 0,
            seq: 0,
            next_instance: 0,
            outcome: None,
        }
    }

    /// Player in a seat.
    #[inline]
    pub fn player(&self, slot: PlayerSlot) -> &Player {
        &self.players[slot.index()]
    }

    /// Player in a seat, mutably.
    #[inline]
    pub fn player_mut(&mut self, slot: PlayerSlot) -> &mut Player {
        &mut self.players[slot.index()]
    }

    /// Seat held by a player id.
    pub fn slot_of(&self, id: PlayerId) -> Option<PlayerSlot> {
        self.players.iter().find(|p| p.id == id).map(|p| p.slot)
    }

    /// Whether the match has ended.
    #[inline]
    pub fn is_over(&self) -> bool {
        self.phase == Phase::End || self.outcome.is_some()
    }

    /// Compute deterministic hash of this state.
    pub fn compute_hash(&self) -> StateHash {
        compute_state_hash(self.seq, self.seed, |hasher| {
            hasher.update_bytes(self.match_id.as_bytes());
            hasher.update_u8(self.phase as u8);
            hasher.update_u8(self.active.index() as u8);
            hasher.update_u32(self.turn);
            hasher.update_u32(self.next_instance);
            hash_outcome(hasher, self.outcome);

            for player in &self.players {
                hasher.update_id(&player.id.0);
                hasher.update_card_list(player.hand.iter().map(|c| c.0));
                hasher.update_card_list(player.deck.iter().map(|c| c.0));
                hasher.update_card_list(player.graveyard.iter().map(|c| c.0));
                hasher.update_u8(player.actions_remaining);
                hasher.update_u64(player.last_client_seq);
            }

            hasher.update_u32(self.board.len() as u32);
            for card in self.board.cards() {
                hasher.update_u32(card.instance.0);
                hasher.update_u16(card.card.0);
                hasher.update_u8(card.position.x);
                hasher.update_u8(card.position.y);
                hasher.update_u8(card.position.z);
                hasher.update_u8(card.owner.index() as u8);
                hasher.update_u8(card.status as u8);
                hasher.update_i32(card.attack);
                hasher.update_i32(card.health);
                hasher.update_i32(card.guard);
            }
        })
    }
}

fn hash_outcome(hasher: &mut StateHasher, outcome: Option<MatchOutcome>) {
    match outcome {
        None => hasher.update_bool(false),
        Some(outcome) => {
            hasher.update_bool(true);
            match outcome.result {
                MatchResult::Win(slot) => hasher.update_u8(slot.index() as u8),
                MatchResult::Draw => hasher.update_u8(0xFF),
            }
            hasher.update_u8(outcome.reason as u8);
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
