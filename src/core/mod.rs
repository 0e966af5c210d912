//! Core deterministic primitives.
//!
//! Seeded randomness and state hashing. Nothing here depends on the
//! game rules.

pub mod rng;
pub mod hash;

// Re-export core types
pub use rng::{DeterministicRng, derive_match_seed};
pub use hash::{StateHash, StateHasher, compute_state_hash};
