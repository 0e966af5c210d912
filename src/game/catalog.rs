//! Card Catalog
//!
//! Static card definitions shared read-only by every match.
//! Loaded once at startup, either from a ruleset file or from the
//! built-in set below.

use std::collections::BTreeMap;
use serde::{Serialize, Deserialize};
use thiserror::Error;

// =============================================================================
// CARD TYPE ID
// =============================================================================

/// Identifier of a card type in the catalog.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CardTypeId(pub u16);

impl CardTypeId {
    /// Create from raw value.
    pub const fn new(id: u16) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for CardTypeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// =============================================================================
// CARD DEFINITION
// =============================================================================

/// Combat role of a card.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CardClass {
    /// Protects its lane.
    Defender,
    /// Grows stronger when pumped.
    Pumper,
    /// Balanced attacker.
    AllRounder,
}

/// Rules-relevant effect tags.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectTag {
    /// Defend grants one extra point of guard.
    Guardian,
    /// Pump grants +2 attack instead of +1.
    Surge,
    /// Attacks ignore the target's guard.
    Piercing,
    /// Incoming attack damage is reduced by 1.
    Bulwark,
}

/// Immutable definition of a card type.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardDefinition {
    /// Type identifier.
    pub id: CardTypeId,
    /// Display name.
    pub name: String,
    /// Combat role.
    pub class: CardClass,
    /// Base attack.
    pub attack: i32,
    /// Base defense (starting health on the board).
    pub defense: i32,
    /// Speed (informational, shown to clients).
    pub speed: i32,
    /// Maximum Chebyshev distance to an attack target.
    #[serde(default = "default_range")]
    pub range: u8,
    /// Layers (z) this card may be placed on. Empty = any layer.
    #[serde(default)]
    pub layers: Vec<u8>,
    /// Effect tags.
    #[serde(default)]
    pub tags: Vec<EffectTag>,
}

fn default_range() -> u8 {
    1
}

impl CardDefinition {
    /// Whether the card may be placed on layer `z`.
    pub fn allows_layer(&self, z: u8) -> bool {
        self.layers.is_empty() || self.layers.contains(&z)
    }

    /// Whether the card carries a tag.
    pub fn has_tag(&self, tag: EffectTag) -> bool {
        self.tags.contains(&tag)
    }
}

// =============================================================================
// CATALOG
// =============================================================================

/// Catalog loading errors.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// The catalog has no cards.
    #[error("catalog is empty")]
    Empty,
    /// Two definitions share an id.
    #[error("duplicate card id {0}")]
    DuplicateId(CardTypeId),
    /// A definition has non-positive defense.
    #[error("card {0} must have positive defense")]
    InvalidDefense(CardTypeId),
}

/// Read-only collection of card definitions.
///
/// BTreeMap keeps iteration order stable across runs.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CardCatalog {
    cards: BTreeMap<CardTypeId, CardDefinition>,
}

impl CardCatalog {
    /// Build a catalog, rejecting duplicates and degenerate cards.
    pub fn from_definitions(
        definitions: impl IntoIterator<Item = CardDefinition>,
    ) -> Result<Self, CatalogError> {
        let mut cards = BTreeMap::new();
        for def in definitions {
            if def.defense <= 0 {
                return Err(CatalogError::InvalidDefense(def.id));
            }
            if cards.contains_key(&def.id) {
                return Err(CatalogError::DuplicateId(def.id));
            }
            cards.insert(def.id, def);
        }
        if cards.is_empty() {
            return Err(CatalogError::Empty);
        }
        Ok(Self { cards })
    }

    /// The built-in card set.
    pub fn builtin() -> Self {
        let cards = builtin_definitions()
            .into_iter()
            .map(|def| (def.id, def))
            .collect();
        Self { cards }
    }

    /// Look up a definition.
    pub fn get(&self, id: CardTypeId) -> Option<&CardDefinition> {
        self.cards.get(&id)
    }

    /// Look up a definition by display name.
    pub fn by_name(&self, name: &str) -> Option<&CardDefinition> {
        self.cards.values().find(|def| def.name == name)
    }

    /// Whether an id exists.
    pub fn contains(&self, id: CardTypeId) -> bool {
        self.cards.contains_key(&id)
    }

    /// All card ids in ascending order.
    pub fn ids(&self) -> impl Iterator<Item = CardTypeId> + '_ {
        self.cards.keys().copied()
    }

    /// All definitions in id order.
    pub fn iter(&self) -> impl Iterator<Item = &CardDefinition> {
        self.cards.values()
    }

    /// Number of card types.
    pub fn len(&self) -> usize {
        self.cards.len()
    }

    /// Whether the catalog is empty.
    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }
}

fn card(
    id: u16,
    name: &str,
    class: CardClass,
    (attack, defense, speed): (i32, i32, i32),
    range: u8,
    layers: &[u8],
    tags: &[EffectTag],
) -> CardDefinition {
    CardDefinition {
        id: CardTypeId(id),
        name: name.to_string(),
        class,
        attack,
        defense,
        speed,
        range,
        layers: layers.to_vec(),
        tags: tags.to_vec(),
    }
}

fn builtin_definitions() -> Vec<CardDefinition> {
    use CardClass::*;
    use EffectTag::*;

    vec![
        card(1, "Iron Guardian", Defender, (3, 8, 2), 1, &[0], &[Guardian]),
        card(2, "Arcane Pumper", Pumper, (2, 6, 4), 1, &[0, 1], &[Surge]),
        card(3, "Striker", AllRounder, (4, 4, 8), 2, &[], &[]),
        card(4, "Earthen Bulwark", Defender, (2, 10, 3), 1, &[0], &[Bulwark]),
        card(5, "Windcharger", Pumper, (3, 5, 7), 2, &[1, 2], &[]),
        card(6, "Shadow Hunter", AllRounder, (5, 3, 6), 2, &[], &[Piercing]),
        card(7, "Aquatic Golem", Defender, (4, 8, 2), 1, &[0], &[]),
        card(8, "Pyro Fiend", Pumper, (6, 4, 4), 1, &[0, 1], &[Surge]),
        card(9, "Lightning Bolt", AllRounder, (7, 2, 9), 3, &[2], &[]),
        card(10, "Noble Knight", Defender, (4, 7, 3), 1, &[0], &[Guardian]),
        card(11, "Warped Archer", AllRounder, (5, 4, 7), 3, &[1, 2], &[]),
        card(12, "Stone Protector", Defender, (3, 9, 2), 1, &[0], &[Guardian, Bulwark]),
    ]
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_catalog_is_valid() {
        let builtin = CardCatalog::builtin();
        let rebuilt = CardCatalog::from_definitions(builtin.iter().cloned()).unwrap();
        assert_eq!(builtin, rebuilt);
        assert_eq!(builtin.len(), 12);
    }

    #[test]
    fn test_lookup_by_name() {
        let catalog = CardCatalog::builtin();
        let striker = catalog.by_name("Striker").unwrap();
        assert_eq!(striker.id, CardTypeId(3));
        assert_eq!(catalog.get(CardTypeId(3)), Some(striker));
        assert!(catalog.by_name("Nonexistent").is_none());
    }

    #[test]
    fn test_layer_constraints() {
        let catalog = CardCatalog::builtin();
        let guardian = catalog.get(CardTypeId(1)).unwrap();
        assert!(guardian.allows_layer(0));
        assert!(!guardian.allows_layer(1));

        // Empty layer list means anywhere
        let striker = catalog.by_name("Striker").unwrap();
        assert!(striker.allows_layer(0));
        assert!(striker.allows_layer(2));
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let a = card(1, "A", CardClass::Defender, (1, 1, 1), 1, &[], &[]);
        let b = card(1, "B", CardClass::Pumper, (1, 1, 1), 1, &[], &[]);
        let result = CardCatalog::from_definitions(vec![a, b]);
        assert!(matches!(result, Err(CatalogError::DuplicateId(CardTypeId(1)))));
    }

    #[test]
    fn test_empty_and_degenerate_rejected() {
        assert!(matches!(
            CardCatalog::from_definitions(Vec::new()),
            Err(CatalogError::Empty)
        ));

        let zero = card(4, "Paper", CardClass::Defender, (1, 0, 1), 1, &[], &[]);
        assert!(matches!(
            CardCatalog::from_definitions(vec![zero]),
            Err(CatalogError::InvalidDefense(CardTypeId(4)))
        ));
    }

    #[test]
    fn test_definition_json_defaults() {
        let json = r#"{"id": 40, "name": "Scout", "class": "all_rounder",
                       "attack": 2, "defense": 3, "speed": 5}"#;
        let def: CardDefinition = serde_json::from_str(json).unwrap();
        assert_eq!(def.range, 1);
        assert!(def.layers.is_empty());
        assert!(def.tags.is_empty());
    }
}
