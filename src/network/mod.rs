//! Network Layer
//!
//! WebSocket server, session broker and per-match actors.
//! This layer is **non-deterministic** - all game logic runs through `game/`.

pub mod protocol;
pub mod transport;
pub mod identity;
pub mod session;
pub mod broker;
pub mod server;

pub use protocol::{ClientMessage, ServerMessage, MatchSnapshot, ErrorCode, ParseFailure};
pub use transport::{ConnectionHandle, ConnectionId, connection_pair};
pub use identity::{SessionIdentity, IdentityError};
pub use session::{MatchSession, SessionConfig, SessionState, SessionError, DeltaRing};
pub use broker::{SessionBroker, MatchCommand, MatchStatus};
pub use server::{GameServer, ServerConfig, GameServerError};
