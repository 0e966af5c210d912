//! Rules Configuration
//!
//! Tunable game rules and the win predicate. Everything that shapes a
//! match but is not a card definition lives here, so board size, budget
//! and turn limit are configuration rather than code.

use std::fmt;
use serde::{Serialize, Deserialize};
use thiserror::Error;

use crate::game::board::{Board, BoardDimensions};
use crate::game::catalog::{CardCatalog, CardDefinition, CardTypeId, CatalogError};
use crate::game::state::{MatchResult, Player, PlayerSlot};

// =============================================================================
// RULES CONFIG
// =============================================================================

/// Copies of each catalog card in the default deck.
pub const DEFAULT_DECK_COPIES: usize = 2;

/// Tunable rules.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RulesConfig {
    /// Board extents
    pub board: BoardDimensions,

    /// Cards dealt at match creation
    pub hand_size: usize,

    /// Action budget refilled at the start of each turn
    pub actions_per_turn: u8,

    /// Deck list shared by both players (shuffled per player).
    /// Empty = every catalog card `DEFAULT_DECK_COPIES` times.
    pub deck: Vec<CardTypeId>,

    /// Whether the incoming active player draws a card each round
    pub draw_per_round: bool,

    /// Guard granted by Defend
    pub defend_guard: i32,

    /// Turn after which the match is a draw
    pub max_turns: Option<u32>,
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            board: BoardDimensions::default(),
            hand_size: 5,
            actions_per_turn: 3,
            deck: Vec::new(),
            draw_per_round: true,
            defend_guard: 2,
            max_turns: Some(40),
        }
    }
}

// =============================================================================
// WIN CONDITION
// =============================================================================

/// Predicate evaluated on the cleaned state at the end of every Resolution.
pub trait WinCondition: Send + Sync {
    /// `Some` ends the match with that result.
    fn evaluate(&self, board: &Board, players: &[Player; 2]) -> Option<MatchResult>;
}

impl<F> WinCondition for F
where
    F: Fn(&Board, &[Player; 2]) -> Option<MatchResult> + Send + Sync,
{
    fn evaluate(&self, board: &Board, players: &[Player; 2]) -> Option<MatchResult> {
        self(board, players)
    }
}

/// A player with no live cards on the board and an empty hand is
/// eliminated. Both eliminated at once is a draw.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoForcesRemaining;

impl WinCondition for NoForcesRemaining {
    fn evaluate(&self, board: &Board, players: &[Player; 2]) -> Option<MatchResult> {
        let eliminated = |slot: PlayerSlot| {
            board.live_count(slot) == 0 && players[slot.index()].hand.is_empty()
        };

        match (eliminated(PlayerSlot::A), eliminated(PlayerSlot::B)) {
            (true, true) => Some(MatchResult::Draw),
            (true, false) => Some(MatchResult::Win(PlayerSlot::B)),
            (false, true) => Some(MatchResult::Win(PlayerSlot::A)),
            (false, false) => None,
        }
    }
}

// =============================================================================
// RULESET
// =============================================================================

/// Ruleset validation errors.
#[derive(Debug, Error)]
pub enum RulesetError {
    /// Card list is invalid.
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    /// Ruleset JSON could not be parsed.
    #[error("invalid ruleset json: {0}")]
    Parse(#[from] serde_json::Error),
    /// A board dimension is zero.
    #[error("board dimensions must be non-zero")]
    InvalidDimensions,
    /// The action budget is zero.
    #[error("actions_per_turn must be at least 1")]
    ZeroBudget,
    /// Defend would lower guard.
    #[error("defend_guard must not be negative, got {0}")]
    NegativeGuard(i32),
    /// The deck resolved to no cards.
    #[error("deck is empty")]
    EmptyDeck,
    /// The deck names a card the catalog does not define.
    #[error("deck references unknown card {0}")]
    UnknownDeckCard(CardTypeId),
    /// A card allows a layer the board does not have.
    #[error("card {card} allows layer {layer} but the board has {height} layers")]
    LayerOutOfRange {
        /// Offending card
        card: CardTypeId,
        /// Offending layer
        layer: u8,
        /// Board height
        height: u8,
    },
}

/// Ruleset file layout.
#[derive(Debug, Deserialize)]
struct RulesetFile {
    #[serde(default)]
    rules: RulesConfig,
    cards: Vec<CardDefinition>,
}

/// Immutable ruleset shared by every match (as `Arc<Ruleset>`).
pub struct Ruleset {
    /// Card definitions
    pub catalog: CardCatalog,
    /// Rules, with the deck list resolved
    pub rules: RulesConfig,
    /// Win predicate
    pub win_condition: Box<dyn WinCondition>,
}

impl fmt::Debug for Ruleset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ruleset")
            .field("cards", &self.catalog.len())
            .field("rules", &self.rules)
            .finish_non_exhaustive()
    }
}

impl Ruleset {
    /// Validate and build a ruleset with the default win condition.
    pub fn new(catalog: CardCatalog, mut rules: RulesConfig) -> Result<Self, RulesetError> {
        let dims = rules.board;
        if dims.width == 0 || dims.depth == 0 || dims.height == 0 {
            return Err(RulesetError::InvalidDimensions);
        }
        if rules.actions_per_turn == 0 {
            return Err(RulesetError::ZeroBudget);
        }
        if rules.defend_guard < 0 {
            return Err(RulesetError::NegativeGuard(rules.defend_guard));
        }

        for def in catalog.iter() {
            if let Some(&layer) = def.layers.iter().find(|&&z| z >= dims.height) {
                return Err(RulesetError::LayerOutOfRange {
                    card: def.id,
                    layer,
                    height: dims.height,
                });
            }
        }

        resolve_deck(&catalog, &mut rules);
        if rules.deck.is_empty() {
            return Err(RulesetError::EmptyDeck);
        }
        if let Some(&unknown) = rules.deck.iter().find(|&&id| !catalog.contains(id)) {
            return Err(RulesetError::UnknownDeckCard(unknown));
        }

        Ok(Self {
            catalog,
            rules,
            win_condition: Box::new(NoForcesRemaining),
        })
    }

    /// Built-in catalog with default rules.
    pub fn builtin() -> Self {
        let catalog = CardCatalog::builtin();
        let mut rules = RulesConfig::default();
        resolve_deck(&catalog, &mut rules);

        Self {
            catalog,
            rules,
            win_condition: Box::new(NoForcesRemaining),
        }
    }

    /// Parse a ruleset file: `{ "rules": {...}, "cards": [...] }`.
    pub fn from_json(json: &str) -> Result<Self, RulesetError> {
        let file: RulesetFile = serde_json::from_str(json)?;
        let catalog = CardCatalog::from_definitions(file.cards)?;
        Self::new(catalog, file.rules)
    }

    /// Replace the win predicate.
    pub fn with_win_condition(mut self, condition: impl WinCondition + 'static) -> Self {
        self.win_condition = Box::new(condition);
        self
    }
}

/// Fill an empty deck list with every catalog card `DEFAULT_DECK_COPIES` times.
fn resolve_deck(catalog: &CardCatalog, rules: &mut RulesConfig) {
    if rules.deck.is_empty() {
        rules.deck = catalog
            .ids()
            .flat_map(|id| std::iter::repeat(id).take(DEFAULT_DECK_COPIES))
            .collect();
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::board::{CardInstanceId, CardStatus, PlacedCard, Position};
    use crate::game::state::PlayerId;

    fn players_with_hands(a: usize, b: usize) -> [Player; 2] {
        let mk = |slot: PlayerSlot, n: usize| Player {
            id: PlayerId::new([slot.index() as u8; 16]),
            slot,
            hand: vec![CardTypeId(3); n],
            deck: Vec::new(),
            graveyard: Vec::new(),
            actions_remaining: 0,
            last_client_seq: 0,
        };
        [mk(PlayerSlot::A, a), mk(PlayerSlot::B, b)]
    }

    fn board_with(owner: PlayerSlot, status: CardStatus) -> Board {
        let mut board = Board::new(BoardDimensions::default());
        board
            .place(PlacedCard {
                instance: CardInstanceId(0),
                card: CardTypeId(3),
                position: Position::new(0, 0, 0),
                owner,
                status,
                attack: 4,
                health: 4,
                guard: 0,
            })
            .unwrap();
        board
    }

    #[test]
    fn test_builtin_ruleset_validates() {
        let builtin = Ruleset::builtin();
        let rebuilt = Ruleset::new(builtin.catalog.clone(), builtin.rules.clone()).unwrap();
        assert_eq!(rebuilt.rules, builtin.rules);
        assert_eq!(builtin.rules.deck.len(), builtin.catalog.len() * DEFAULT_DECK_COPIES);
    }

    #[test]
    fn test_no_forces_remaining() {
        let cond = NoForcesRemaining;
        let empty = Board::new(BoardDimensions::default());

        // Cards in hand keep a player alive
        assert_eq!(cond.evaluate(&empty, &players_with_hands(1, 1)), None);

        // B has nothing anywhere
        assert_eq!(
            cond.evaluate(&empty, &players_with_hands(1, 0)),
            Some(MatchResult::Win(PlayerSlot::A))
        );

        // Both eliminated
        assert_eq!(
            cond.evaluate(&empty, &players_with_hands(0, 0)),
            Some(MatchResult::Draw)
        );

        // A live card on the board keeps A alive
        let board = board_with(PlayerSlot::A, CardStatus::Exhausted);
        assert_eq!(
            cond.evaluate(&board, &players_with_hands(0, 0)),
            Some(MatchResult::Win(PlayerSlot::A))
        );

        // A destroyed card does not
        let board = board_with(PlayerSlot::A, CardStatus::Destroyed);
        assert_eq!(
            cond.evaluate(&board, &players_with_hands(0, 0)),
            Some(MatchResult::Draw)
        );
    }

    #[test]
    fn test_closure_win_condition() {
        let ruleset = Ruleset::builtin()
            .with_win_condition(|_: &Board, _: &[Player; 2]| Some(MatchResult::Draw));
        let empty = Board::new(BoardDimensions::default());
        assert_eq!(
            ruleset.win_condition.evaluate(&empty, &players_with_hands(3, 3)),
            Some(MatchResult::Draw)
        );
    }

    #[test]
    fn test_from_json() {
        let json = r#"{
            "rules": { "hand_size": 2, "actions_per_turn": 1, "max_turns": null },
            "cards": [
                {"id": 1, "name": "Wall", "class": "defender",
                 "attack": 1, "defense": 5, "speed": 1, "layers": [0], "tags": ["bulwark"]},
                {"id": 2, "name": "Bolt", "class": "all_rounder",
                 "attack": 3, "defense": 1, "speed": 9, "range": 3}
            ]
        }"#;

        let ruleset = Ruleset::from_json(json).unwrap();
        assert_eq!(ruleset.rules.hand_size, 2);
        assert_eq!(ruleset.rules.max_turns, None);
        assert_eq!(ruleset.rules.board, BoardDimensions::default());
        assert_eq!(ruleset.rules.deck.len(), 4);
        assert_eq!(ruleset.catalog.by_name("Bolt").unwrap().range, 3);
    }

    #[test]
    fn test_invalid_rulesets() {
        let catalog = CardCatalog::builtin();

        let rules = RulesConfig {
            deck: vec![CardTypeId(999)],
            ..RulesConfig::default()
        };
        assert!(matches!(
            Ruleset::new(catalog.clone(), rules),
            Err(RulesetError::UnknownDeckCard(CardTypeId(999)))
        ));

        let rules = RulesConfig {
            actions_per_turn: 0,
            ..RulesConfig::default()
        };
        assert!(matches!(Ruleset::new(catalog.clone(), rules), Err(RulesetError::ZeroBudget)));

        let rules = RulesConfig {
            defend_guard: -1,
            ..RulesConfig::default()
        };
        assert!(matches!(
            Ruleset::new(catalog.clone(), rules),
            Err(RulesetError::NegativeGuard(-1))
        ));

        // Built-in cards use layer 2; a two-layer board cannot host them
        let rules = RulesConfig {
            board: BoardDimensions { width: 5, depth: 5, height: 2 },
            ..RulesConfig::default()
        };
        assert!(matches!(
            Ruleset::new(catalog, rules),
            Err(RulesetError::LayerOutOfRange { layer: 2, height: 2, .. })
        ));

        assert!(matches!(Ruleset::from_json("{"), Err(RulesetError::Parse(_))));
    }
}
