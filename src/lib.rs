//! # Tridimensional Duels Server
//!
//! Authoritative session engine for Tridimensional Duels, a two-player
//! card duel fought on a small 3D grid.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  TRIDIMENSIONAL DUELS SERVER                 │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Deterministic primitives                  │
//! │  ├── rng.rs      - Deterministic Xorshift128+ PRNG           │
//! │  └── hash.rs     - State hashing for verification            │
//! │                                                              │
//! │  game/           - Game logic (deterministic)                │
//! │  ├── catalog.rs  - Card definitions                          │
//! │  ├── board.rs    - 3D grid and occupancy                     │
//! │  ├── state.rs    - Match and player state                    │
//! │  ├── rules.rs    - Rules, win condition, ruleset loading     │
//! │  ├── action.rs   - Actions and rejection taxonomy            │
//! │  ├── delta.rs    - Accepted state changes                    │
//! │  ├── machine.rs  - Phase transitions and apply               │
//! │  ├── validator.rs- Pure action validation                    │
//! │  └── step.rs     - Validate-then-apply and replay            │
//! │                                                              │
//! │  network/        - Networking (non-deterministic)            │
//! │  ├── protocol.rs - Message types                             │
//! │  ├── transport.rs- Outbound connection handles               │
//! │  ├── identity.rs - Session token to player id                │
//! │  ├── session.rs  - One match: seats, presence, fan-out       │
//! │  ├── broker.rs   - Per-match tasks and routing               │
//! │  └── server.rs   - WebSocket server                          │
//! │                                                              │
//! │  config.rs       - Environment configuration                 │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Determinism Guarantee
//!
//! The `core/` and `game/` modules are **100% deterministic**:
//! - No floating-point arithmetic in game logic
//! - No HashMap (uses BTreeMap for sorted iteration)
//! - No system time dependencies
//! - All randomness from seeded Xorshift128+
//!
//! Every accepted action becomes a numbered delta. Replaying the deltas
//! against the opening state reproduces the match, hash for hash.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod game;
pub mod network;
pub mod config;

// Re-export commonly used types
pub use core::rng::DeterministicRng;
pub use core::hash::StateHash;
pub use game::state::{MatchState, PlayerId, PlayerSlot, Phase};
pub use game::rules::Ruleset;
pub use game::action::{Action, RejectionReason};
pub use game::delta::MatchDelta;
pub use config::{AppConfig, ConfigError};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
