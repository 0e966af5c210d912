//! Board Model
//!
//! The three-dimensional grid a match is played on.
//! Knows about occupancy and bounds, nothing about turns or phases.
//!
//! Uses BTreeMap keyed by position for deterministic iteration order.

use std::collections::BTreeMap;
use serde::{Serialize, Deserialize};
use thiserror::Error;

use crate::game::catalog::CardTypeId;

// =============================================================================
// POSITION
// =============================================================================

/// Cell coordinate. `z` is the layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Position {
    /// Column
    pub x: u8,
    /// Row
    pub y: u8,
    /// Layer
    pub z: u8,
}

impl Position {
    /// Create a position.
    pub const fn new(x: u8, y: u8, z: u8) -> Self {
        Self { x, y, z }
    }

    /// Chebyshev distance (king moves in three dimensions).
    #[inline]
    pub fn chebyshev(self, other: Position) -> u8 {
        self.x
            .abs_diff(other.x)
            .max(self.y.abs_diff(other.y))
            .max(self.z.abs_diff(other.z))
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({},{},{})", self.x, self.y, self.z)
    }
}

/// Board extents. Valid coordinates are `0..width`, `0..depth`, `0..height`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardDimensions {
    /// Extent along x
    pub width: u8,
    /// Extent along y
    pub depth: u8,
    /// Number of layers (extent along z)
    pub height: u8,
}

impl Default for BoardDimensions {
    fn default() -> Self {
        Self { width: 5, depth: 5, height: 3 }
    }
}

impl BoardDimensions {
    /// Whether a position lies inside the board.
    #[inline]
    pub fn contains(&self, pos: Position) -> bool {
        pos.x < self.width && pos.y < self.depth && pos.z < self.height
    }

    /// Total number of cells.
    pub fn cell_count(&self) -> usize {
        self.width as usize * self.depth as usize * self.height as usize
    }
}

// =============================================================================
// PLACED CARDS
// =============================================================================

/// Match-local id of a card on the board.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CardInstanceId(pub u32);

impl std::fmt::Display for CardInstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "card-{}", self.0)
    }
}

/// Seat in a match.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PlayerSlot {
    /// First seat, moves first
    A,
    /// Second seat
    B,
}

impl PlayerSlot {
    /// Both seats in order.
    pub const ALL: [PlayerSlot; 2] = [PlayerSlot::A, PlayerSlot::B];

    /// Array index of this seat.
    #[inline]
    pub fn index(self) -> usize {
        match self {
            PlayerSlot::A => 0,
            PlayerSlot::B => 1,
        }
    }

    /// The opposing seat.
    #[inline]
    pub fn other(self) -> PlayerSlot {
        match self {
            PlayerSlot::A => PlayerSlot::B,
            PlayerSlot::B => PlayerSlot::A,
        }
    }
}

/// Per-instance card status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum CardStatus {
    /// Ready to act
    Active = 0,
    /// Acted this round
    Exhausted = 1,
    /// Health reached zero; removed at the end of Resolution
    Destroyed = 2,
}

/// A card instance on the board.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacedCard {
    /// Instance id
    pub instance: CardInstanceId,
    /// Card type
    pub card: CardTypeId,
    /// Cell occupied
    pub position: Position,
    /// Owning seat
    pub owner: PlayerSlot,
    /// Current status
    pub status: CardStatus,
    /// Current attack
    pub attack: i32,
    /// Current health
    pub health: i32,
    /// Guard absorbing attack damage until the round ends
    pub guard: i32,
}

impl PlacedCard {
    /// Whether the card still counts as a live force.
    #[inline]
    pub fn is_live(&self) -> bool {
        self.status != CardStatus::Destroyed
    }
}

// =============================================================================
// BOARD
// =============================================================================

/// Board errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BoardError {
    /// A coordinate is outside the board.
    #[error("position {0} is out of bounds")]
    OutOfBounds(Position),
    /// The cell already holds a card.
    #[error("position {0} is occupied")]
    OccupiedCell(Position),
    /// Two cards share an instance id.
    #[error("duplicate card instance {0}")]
    DuplicateInstance(CardInstanceId),
}

/// Three-dimensional grid of placed cards.
///
/// Invariants: no two cards share a position, every card is in bounds,
/// instance ids are unique.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "BoardRepr", into = "BoardRepr")]
pub struct Board {
    dimensions: BoardDimensions,
    cells: BTreeMap<Position, PlacedCard>,
}

/// Serialized form: dimensions plus a flat card list.
#[derive(Serialize, Deserialize)]
struct BoardRepr {
    dimensions: BoardDimensions,
    cards: Vec<PlacedCard>,
}

impl From<Board> for BoardRepr {
    fn from(board: Board) -> Self {
        Self {
            dimensions: board.dimensions,
            cards: board.cells.into_values().collect(),
        }
    }
}

impl TryFrom<BoardRepr> for Board {
    type Error = BoardError;

    fn try_from(repr: BoardRepr) -> Result<Self, Self::Error> {
        let mut board = Board::new(repr.dimensions);
        for card in repr.cards {
            board.place(card)?;
        }
        Ok(board)
    }
}

impl Board {
    /// Create an empty board.
    pub fn new(dimensions: BoardDimensions) -> Self {
        Self {
            dimensions,
            cells: BTreeMap::new(),
        }
    }

    /// Board extents.
    pub fn dimensions(&self) -> BoardDimensions {
        self.dimensions
    }

    /// Check whether a card could be placed at `pos`, without placing it.
    pub fn check_placement(&self, pos: Position) -> Result<(), BoardError> {
        if !self.dimensions.contains(pos) {
            return Err(BoardError::OutOfBounds(pos));
        }
        if self.cells.contains_key(&pos) {
            return Err(BoardError::OccupiedCell(pos));
        }
        Ok(())
    }

    /// Place a card at its own position.
    pub fn place(&mut self, card: PlacedCard) -> Result<(), BoardError> {
        self.check_placement(card.position)?;
        if self.find(card.instance).is_some() {
            return Err(BoardError::DuplicateInstance(card.instance));
        }
        self.cells.insert(card.position, card);
        Ok(())
    }

    /// Remove and return the card at `pos`.
    pub fn remove(&mut self, pos: Position) -> Option<PlacedCard> {
        self.cells.remove(&pos)
    }

    /// Card at `pos`, if any.
    pub fn occupant_at(&self, pos: Position) -> Option<&PlacedCard> {
        self.cells.get(&pos)
    }

    /// Find a card by instance id.
    pub fn find(&self, instance: CardInstanceId) -> Option<&PlacedCard> {
        self.cells.values().find(|c| c.instance == instance)
    }

    /// Find a card by instance id, mutably.
    ///
    /// Position is not exposed for mutation through this path; callers
    /// must not move the card.
    pub fn find_mut(&mut self, instance: CardInstanceId) -> Option<&mut PlacedCard> {
        self.cells.values_mut().find(|c| c.instance == instance)
    }

    /// All cards in position order.
    pub fn cards(&self) -> impl Iterator<Item = &PlacedCard> {
        self.cells.values()
    }

    /// All cards, mutably.
    pub(crate) fn cards_mut(&mut self) -> impl Iterator<Item = &mut PlacedCard> {
        self.cells.values_mut()
    }

    /// Cards owned by one seat.
    pub fn cards_of(&self, owner: PlayerSlot) -> impl Iterator<Item = &PlacedCard> {
        self.cells.values().filter(move |c| c.owner == owner)
    }

    /// Number of non-destroyed cards owned by a seat.
    pub fn live_count(&self, owner: PlayerSlot) -> usize {
        self.cards_of(owner).filter(|c| c.is_live()).count()
    }

    /// Number of cards on the board.
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Whether the board is empty.
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

// =============================================================================
// TESTS
// =============================================================================
