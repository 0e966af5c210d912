//! Protocol Messages
//!
//! Wire format for client-server communication over WebSocket.
//! Every message is a JSON object tagged by `type` (snake_case).

use serde::{Serialize, Deserialize};
use uuid::Uuid;

use crate::core::hash::StateHash;
use crate::game::action::{Action, RejectionCategory, RejectionReason};
use crate::game::delta::MatchDelta;
use crate::game::state::{MatchOutcome, MatchState, PlayerSlot};

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from client to server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Take a seat, or return to one.
    JoinMatch {
        /// Opaque session token
        session: String,
        /// Specific match to join; any open match if absent
        #[serde(default)]
        match_id: Option<Uuid>,
        /// Last delta the client saw (reconnect catch-up)
        #[serde(default)]
        last_seen_seq: Option<u64>,
    },

    /// Propose an action.
    SubmitAction {
        /// The action
        action: Action,
        /// Client sequence number
        client_seq: u64,
    },

    /// Request missed deltas.
    SyncRequest {
        /// Last delta the client saw
        last_seen_seq: u64,
    },

    /// Ping for latency measurement.
    Ping {
        /// Client timestamp, echoed back
        #[serde(default)]
        timestamp: u64,
    },

    /// Leave the current match.
    Leave,
}

/// Why an inbound frame could not be turned into a `ClientMessage`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseFailure {
    /// A `submit_action` whose action payload is invalid; the client
    /// sequence number was recovered.
    MalformedAction {
        /// Recovered client sequence number
        client_seq: u64,
    },
    /// Anything else.
    Invalid(String),
}

impl ClientMessage {
    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    /// Parse a text frame, recovering the client sequence number of a
    /// malformed `submit_action` so it can be rejected individually.
    pub fn parse(text: &str) -> Result<Self, ParseFailure> {
        let err = match Self::from_json(text) {
            Ok(msg) => return Ok(msg),
            Err(e) => e,
        };

        let value: serde_json::Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(_) => return Err(ParseFailure::Invalid(err.to_string())),
        };
        let is_submit = value.get("type").and_then(|t| t.as_str()) == Some("submit_action");
        match value.get("client_seq").and_then(|s| s.as_u64()) {
            Some(client_seq) if is_submit => Err(ParseFailure::MalformedAction { client_seq }),
            _ => Err(ParseFailure::Invalid(err.to_string())),
        }
    }
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from server to client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Seat confirmed.
    Joined(JoinedInfo),

    /// Both seats filled; opening state.
    MatchStarted {
        /// Opening snapshot (sequence 0)
        snapshot: MatchSnapshot,
    },

    /// An accepted delta.
    MatchDelta {
        /// Sequence number
        seq: u64,
        /// The delta
        delta: MatchDelta,
        /// Hex state hash after applying it
        state_hash: String,
    },

    /// The sender's action was refused.
    ActionRejected {
        /// Client sequence number of the refused action
        client_seq: u64,
        /// Reason
        reason: RejectionReason,
        /// Reason category
        category: RejectionCategory,
    },

    /// The match is over.
    MatchEnded {
        /// Match identifier
        match_id: Uuid,
        /// Outcome
        outcome: MatchOutcome,
    },

    /// Full current state (reconnect fallback or on request).
    Snapshot(MatchSnapshot),

    /// The other participant disconnected.
    PlayerAway {
        /// Seat that went away
        slot: PlayerSlot,
        /// Seconds before the match is forfeited
        grace_secs: u64,
    },

    /// The other participant is back.
    PlayerReturned {
        /// Seat that returned
        slot: PlayerSlot,
    },

    /// Pong response.
    Pong {
        /// Echoed client timestamp
        timestamp: u64,
        /// Server wall clock (unix millis)
        server_time: i64,
    },

    /// Error message.
    Error(ServerError),

    /// Server is shutting down.
    Shutdown {
        /// Reason
        reason: String,
    },
}

/// Seat confirmation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinedInfo {
    /// Match identifier
    pub match_id: Uuid,
    /// Derived player id
    pub player_id: String,
    /// Assigned seat
    pub slot: PlayerSlot,
    /// Whether this was a reconnect to an existing seat
    pub reconnected: bool,
    /// Whether the match is still waiting for an opponent
    pub waiting: bool,
}

/// Full match state at a sequence number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchSnapshot {
    /// Match identifier
    pub match_id: Uuid,
    /// Sequence number of the last applied delta
    pub seq: u64,
    /// Hex state hash
    pub state_hash: String,
    /// The state
    pub state: MatchState,
}

impl MatchSnapshot {
    /// Capture the current state.
    pub fn capture(state: &MatchState) -> Self {
        Self {
            match_id: state.match_id,
            seq: state.seq,
            state_hash: hash_hex(&state.compute_hash()),
            state: state.clone(),
        }
    }
}

/// Server error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerError {
    /// Error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
}

impl ServerError {
    /// Build an error message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }
}

/// Error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Frame could not be parsed.
    InvalidMessage,
    /// Session token rejected.
    InvalidSession,
    /// Command requires a seat.
    NotInMatch,
    /// Player already holds a seat in another running match.
    AlreadyInMatch,
    /// Requested match has no free seat.
    MatchFull,
    /// Requested match has ended.
    MatchClosed,
    /// Server overloaded.
    ServerOverloaded,
}

/// Lowercase hex rendering of a state hash.
pub fn hash_hex(hash: &StateHash) -> String {
    hex::encode(hash)
}

// =============================================================================
// SERIALIZATION HELPERS
// =============================================================================

impl ServerMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    /// Rejection reply for one action.
    pub fn rejected(client_seq: u64, reason: RejectionReason) -> Self {
        ServerMessage::ActionRejected {
            client_seq,
            reason,
            category: reason.category(),
        }
    }

    /// Error reply.
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        ServerMessage::Error(ServerError::new(code, message))
    }
}
