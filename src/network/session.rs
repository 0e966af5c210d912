//! Match Session
//!
//! One match from the first seat to close: seats and presence, the
//! authoritative `MatchState`, the recent-delta ring used for reconnects,
//! and fan-out of accepted deltas.
//!
//! A `MatchSession` is owned by exactly one task (see `broker`), so nothing
//! in here locks or awaits. Time is passed in by the caller.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::core::hash::StateHash;
use crate::game::action::{Action, RejectionReason, Submission};
use crate::game::delta::MatchDelta;
use crate::game::machine;
use crate::game::rules::Ruleset;
use crate::game::state::{MatchOutcome, MatchState, PlayerId, PlayerSlot};
use crate::game::step::{self, Accepted, StepResult};
use crate::network::protocol::{
    hash_hex, ErrorCode, JoinedInfo, MatchSnapshot, ServerMessage,
};
use crate::network::transport::{ConnectionHandle, ConnectionId};

/// Session timing and buffering.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How long a disconnected player keeps their seat.
    pub grace_period: Duration,
    /// An active match with no accepted delta for this long is abandoned.
    pub idle_timeout: Duration,
    /// Recent deltas kept for reconnect catch-up.
    pub delta_ring_capacity: usize,
    /// Housekeeping cadence.
    pub housekeeping_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            grace_period: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
            delta_ring_capacity: 256,
            housekeeping_interval: Duration::from_secs(1),
        }
    }
}

/// Session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Fewer than two seats filled.
    Waiting,
    /// Match in progress.
    Active,
    /// Match over; participants may still be connected.
    Ended,
    /// Nothing left to do; the task may exit.
    Closed,
}

/// Connection state for reconnection support.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    /// Player is connected.
    Connected,
    /// Player disconnected, waiting for reconnect.
    Away {
        /// When the disconnect happened.
        since: Instant,
    },
}

/// One occupied seat.
#[derive(Debug)]
pub struct Seat {
    /// Seat holder.
    pub player_id: PlayerId,
    /// Seat position.
    pub slot: PlayerSlot,
    connection: Option<ConnectionHandle>,
    presence: Presence,
}

impl Seat {
    /// Current presence.
    pub fn presence(&self) -> Presence {
        self.presence
    }

    fn is_connected(&self) -> bool {
        self.connection.as_ref().is_some_and(|conn| !conn.is_closed())
    }

    fn emit(&self, message: ServerMessage) {
        if let Some(conn) = &self.connection {
            conn.emit(message);
        }
    }
}

/// Session errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// Both seats are taken.
    #[error("Match is full")]
    MatchFull,

    /// The match has ended or closed.
    #[error("Match is closed")]
    MatchClosed,

    /// Player already holds a seat elsewhere.
    #[error("Already in a match")]
    AlreadyInMatch,

    /// Player holds no seat here.
    #[error("Not seated in this match")]
    NotSeated,
}

impl SessionError {
    /// Wire error code.
    pub fn code(self) -> ErrorCode {
        match self {
            SessionError::MatchFull => ErrorCode::MatchFull,
            SessionError::MatchClosed => ErrorCode::MatchClosed,
            SessionError::AlreadyInMatch => ErrorCode::AlreadyInMatch,
            SessionError::NotSeated => ErrorCode::NotInMatch,
        }
    }
}

// =============================================================================
// DELTA RING
// =============================================================================

/// Bounded history of recent accepted deltas.
#[derive(Debug)]
pub struct DeltaRing {
    capacity: usize,
    entries: VecDeque<(MatchDelta, StateHash)>,
}

impl DeltaRing {
    /// Create an empty ring.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: VecDeque::new(),
        }
    }

    /// Record a delta, evicting the oldest when full.
    pub fn push(&mut self, delta: MatchDelta, hash: StateHash) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back((delta, hash));
    }

    /// Deltas after `last_seen` up to `current`, in order.
    ///
    /// `None` if part of that range has been evicted or `last_seen` is
    /// ahead of `current`.
    pub fn since(&self, last_seen: u64, current: u64) -> Option<Vec<&(MatchDelta, StateHash)>> {
        if last_seen > current {
            return None;
        }
        if last_seen == current {
            return Some(Vec::new());
        }
        let oldest = self.entries.front()?.0.seq;
        if oldest > last_seen + 1 {
            return None;
        }
        Some(self.entries.iter().filter(|(d, _)| d.seq > last_seen).collect())
    }

    /// Number of retained deltas.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn delta_message(delta: &MatchDelta, hash: &StateHash) -> ServerMessage {
    ServerMessage::MatchDelta {
        seq: delta.seq,
        delta: delta.clone(),
        state_hash: hash_hex(hash),
    }
}

// =============================================================================
// MATCH SESSION
// =============================================================================

/// A match session.
pub struct MatchSession {
    match_id: Uuid,
    ruleset: Arc<Ruleset>,
    config: SessionConfig,
    state: SessionState,
    seats: [Option<Seat>; 2],
    game: Option<MatchState>,
    ring: DeltaRing,
    last_activity: Instant,
}

impl MatchSession {
    /// Create a new, empty session.
    pub fn new(match_id: Uuid, ruleset: Arc<Ruleset>, config: SessionConfig, now: Instant) -> Self {
        let ring = DeltaRing::new(config.delta_ring_capacity);
        Self {
            match_id,
            ruleset,
            config,
            state: SessionState::Waiting,
            seats: [None, None],
            game: None,
            ring,
            last_activity: now,
        }
    }

    /// Match identifier.
    pub fn match_id(&self) -> Uuid {
        self.match_id
    }

    /// Get session state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Authoritative match state, once started.
    pub fn game(&self) -> Option<&MatchState> {
        self.game.as_ref()
    }

    /// Seat held by `player`.
    pub fn seat_of(&self, player: PlayerId) -> Option<PlayerSlot> {
        self.seats.iter().flatten().find(|s| s.player_id == player).map(|s| s.slot)
    }

    /// Seat at `slot`.
    pub fn seat(&self, slot: PlayerSlot) -> Option<&Seat> {
        self.seats[slot.index()].as_ref()
    }

    /// Players currently holding a seat.
    pub fn seated_players(&self) -> Vec<PlayerId> {
        self.seats.iter().flatten().map(|s| s.player_id).collect()
    }

    /// Free seats while waiting; zero otherwise.
    pub fn open_seats(&self) -> usize {
        if self.state != SessionState::Waiting {
            return 0;
        }
        self.seats.iter().filter(|s| s.is_none()).count()
    }

    /// Current snapshot, once started.
    pub fn snapshot(&self) -> Option<MatchSnapshot> {
        self.game.as_ref().map(MatchSnapshot::capture)
    }

    // =========================================================================
    // JOIN / RECONNECT
    // =========================================================================

    /// Seat a player, or reconnect one who already holds a seat.
    pub fn join(
        &mut self,
        player: PlayerId,
        conn: ConnectionHandle,
        last_seen_seq: Option<u64>,
        now: Instant,
    ) -> Result<PlayerSlot, SessionError> {
        if self.state == SessionState::Closed {
            return Err(SessionError::MatchClosed);
        }

        if let Some(slot) = self.seat_of(player) {
            self.reconnect(slot, conn, last_seen_seq);
            return Ok(slot);
        }

        match self.state {
            SessionState::Waiting => {}
            SessionState::Active => return Err(SessionError::MatchFull),
            SessionState::Ended | SessionState::Closed => return Err(SessionError::MatchClosed),
        }

        let slot = PlayerSlot::ALL
            .into_iter()
            .find(|s| self.seats[s.index()].is_none())
            .ok_or(SessionError::MatchFull)?;

        self.seats[slot.index()] = Some(Seat {
            player_id: player,
            slot,
            connection: Some(conn),
            presence: Presence::Connected,
        });

        let waiting = self.seats.iter().any(Option::is_none);
        self.emit_to(slot, self.joined(player, slot, false, waiting));
        info!(match_id = %self.match_id, player = %player, ?slot, "Player seated");

        if !waiting {
            self.start(now);
        }
        Ok(slot)
    }

    fn start(&mut self, now: Instant) {
        let (Some(a), Some(b)) = (&self.seats[0], &self.seats[1]) else {
            return;
        };

        let mut game = MatchState::new(self.match_id, [a.player_id, b.player_id], &self.ruleset);
        machine::begin(&mut game, &self.ruleset.rules);

        let snapshot = MatchSnapshot::capture(&game);
        info!(
            match_id = %self.match_id,
            seed = game.seed,
            hash = %snapshot.state_hash,
            "Match started"
        );

        self.game = Some(game);
        self.state = SessionState::Active;
        self.last_activity = now;
        self.broadcast(ServerMessage::MatchStarted { snapshot });
    }

    fn reconnect(&mut self, slot: PlayerSlot, conn: ConnectionHandle, last_seen_seq: Option<u64>) {
        let waiting = self.state == SessionState::Waiting;
        let Some(seat) = self.seats[slot.index()].as_mut() else {
            return;
        };
        let was_away = matches!(seat.presence, Presence::Away { .. });
        let player = seat.player_id;
        seat.connection = Some(conn);
        seat.presence = Presence::Connected;

        info!(match_id = %self.match_id, player = %player, ?slot, "Player reconnected");

        self.emit_to(slot, self.joined(player, slot, true, waiting));
        if was_away {
            self.emit_to(slot.other(), ServerMessage::PlayerReturned { slot });
        }

        for message in self.catch_up(last_seen_seq) {
            self.emit_to(slot, message);
        }
        if let Some(outcome) = self.game.as_ref().and_then(|g| g.outcome) {
            self.emit_to(slot, ServerMessage::MatchEnded { match_id: self.match_id, outcome });
        }
    }

    /// Messages bringing a client from `last_seen_seq` to the present.
    ///
    /// Missed deltas from the ring if available, a full snapshot otherwise.
    fn catch_up(&self, last_seen_seq: Option<u64>) -> Vec<ServerMessage> {
        let Some(game) = &self.game else {
            return Vec::new();
        };

        let deltas = last_seen_seq.and_then(|seen| self.ring.since(seen, game.seq));
        match deltas {
            Some(entries) => entries.into_iter().map(|(d, h)| delta_message(d, h)).collect(),
            None => vec![ServerMessage::Snapshot(MatchSnapshot::capture(game))],
        }
    }

    /// Answer a `sync_request`.
    pub fn sync(&self, player: PlayerId, conn: &ConnectionHandle, last_seen_seq: u64) {
        if self.seat_of(player).is_none() || self.game.is_none() {
            conn.emit(ServerMessage::error(ErrorCode::NotInMatch, "no running match to sync"));
            return;
        }
        for message in self.catch_up(Some(last_seen_seq)) {
            conn.emit(message);
        }
    }

    fn joined(&self, player: PlayerId, slot: PlayerSlot, reconnected: bool, waiting: bool) -> ServerMessage {
        ServerMessage::Joined(JoinedInfo {
            match_id: self.match_id,
            player_id: player.to_uuid_string(),
            slot,
            reconnected,
            waiting,
        })
    }

    // =========================================================================
    // ACTIONS
    // =========================================================================

    /// Validate and apply one action; reply to `conn` on rejection.
    pub fn submit(
        &mut self,
        player: PlayerId,
        conn: &ConnectionHandle,
        client_seq: u64,
        action: Action,
        now: Instant,
    ) {
        let Some(game) = self.game.as_mut() else {
            conn.emit(ServerMessage::rejected(client_seq, RejectionReason::WrongPhase));
            return;
        };

        let submission = Submission::new(player, client_seq, action);
        match step::submit(game, &self.ruleset, &submission) {
            StepResult::Accepted(accepted) => {
                debug!(
                    match_id = %self.match_id,
                    player = %player,
                    seq = accepted.delta.seq,
                    "Action accepted"
                );
                self.publish(accepted, now);
            }
            StepResult::Rejected(reason) => {
                debug!(
                    match_id = %self.match_id,
                    player = %player,
                    client_seq,
                    ?reason,
                    "Action rejected"
                );
                conn.emit(ServerMessage::rejected(client_seq, reason));
            }
        }
    }

    /// Reject an action whose payload could not be parsed.
    pub fn reject_malformed(&self, conn: &ConnectionHandle, client_seq: u64) {
        conn.emit(ServerMessage::rejected(client_seq, RejectionReason::MalformedAction));
    }

    fn publish(&mut self, accepted: Accepted, now: Instant) {
        self.last_activity = now;
        let message = delta_message(&accepted.delta, &accepted.state_hash);
        self.ring.push(accepted.delta, accepted.state_hash);
        self.broadcast(message);

        if let Some(outcome) = accepted.outcome {
            self.finish(outcome);
        }
    }

    fn finish(&mut self, outcome: MatchOutcome) {
        info!(
            match_id = %self.match_id,
            result = ?outcome.result,
            reason = ?outcome.reason,
            "Match ended"
        );
        self.state = SessionState::Ended;
        self.broadcast(ServerMessage::MatchEnded { match_id: self.match_id, outcome });
    }

    // =========================================================================
    // PRESENCE
    // =========================================================================

    /// Handle a dropped connection.
    ///
    /// Ignored unless `conn_id` is the seat's current connection. Returns
    /// true if the seat was affected.
    pub fn disconnect(&mut self, player: PlayerId, conn_id: ConnectionId, now: Instant) -> bool {
        let Some(slot) = self.seat_of(player) else {
            return false;
        };
        let current = self.seats[slot.index()]
            .as_ref()
            .and_then(|s| s.connection.as_ref())
            .map(ConnectionHandle::id);
        if current != Some(conn_id) {
            debug!(match_id = %self.match_id, player = %player, connection = %conn_id, "Stale disconnect ignored");
            return false;
        }

        match self.state {
            SessionState::Waiting => {
                self.seats[slot.index()] = None;
                info!(match_id = %self.match_id, player = %player, "Seat freed");
                self.close_if_empty();
            }
            SessionState::Active => {
                self.mark_away(slot, now);
                info!(match_id = %self.match_id, player = %player, ?slot, "Player away");
                self.emit_to(slot.other(), ServerMessage::PlayerAway {
                    slot,
                    grace_secs: self.config.grace_period.as_secs(),
                });
            }
            SessionState::Ended | SessionState::Closed => self.mark_away(slot, now),
        }
        true
    }

    /// Handle an explicit `leave`.
    pub fn leave(&mut self, player: PlayerId, now: Instant) -> Result<(), SessionError> {
        let slot = self.seat_of(player).ok_or(SessionError::NotSeated)?;

        match self.state {
            SessionState::Waiting => {
                self.seats[slot.index()] = None;
                info!(match_id = %self.match_id, player = %player, "Left waiting match");
                self.close_if_empty();
            }
            SessionState::Active => {
                info!(match_id = %self.match_id, player = %player, ?slot, "Player forfeited");
                if let Some(accepted) = self.game.as_mut().and_then(|g| step::forfeit(g, slot)) {
                    self.publish(accepted, now);
                }
                self.mark_away(slot, now);
            }
            SessionState::Ended | SessionState::Closed => self.mark_away(slot, now),
        }
        Ok(())
    }

    fn mark_away(&mut self, slot: PlayerSlot, now: Instant) {
        if let Some(seat) = self.seats[slot.index()].as_mut() {
            seat.connection = None;
            seat.presence = Presence::Away { since: now };
        }
    }

    fn close_if_empty(&mut self) {
        if self.seats.iter().all(Option::is_none) {
            self.state = SessionState::Closed;
        }
    }

    // =========================================================================
    // HOUSEKEEPING
    // =========================================================================

    /// Grace expiry, idle timeout, and closing finished matches.
    pub fn housekeeping(&mut self, now: Instant) -> SessionState {
        match self.state {
            SessionState::Active => self.expire_active(now),
            SessionState::Ended => {
                let idle = now.saturating_duration_since(self.last_activity) >= self.config.idle_timeout;
                if idle || self.seats.iter().flatten().all(|s| !s.is_connected()) {
                    debug!(match_id = %self.match_id, idle, "Closing ended match");
                    self.state = SessionState::Closed;
                }
            }
            SessionState::Waiting | SessionState::Closed => {}
        }
        self.state
    }

    fn expire_active(&mut self, now: Instant) {
        let grace = self.config.grace_period;
        let expired: Vec<PlayerSlot> = self
            .seats
            .iter()
            .flatten()
            .filter(|s| match s.presence {
                Presence::Away { since } => now.saturating_duration_since(since) >= grace,
                Presence::Connected => false,
            })
            .map(|s| s.slot)
            .collect();

        let accepted = match expired.as_slice() {
            [] => None,
            [slot] => {
                warn!(match_id = %self.match_id, slot = ?slot, "Reconnect grace expired, forfeiting");
                self.game.as_mut().and_then(|g| step::forfeit(g, *slot))
            }
            _ => {
                warn!(match_id = %self.match_id, "Both players gone, abandoning");
                self.game.as_mut().and_then(step::abandon)
            }
        };
        if let Some(accepted) = accepted {
            self.publish(accepted, now);
            return;
        }

        if now.saturating_duration_since(self.last_activity) >= self.config.idle_timeout {
            warn!(match_id = %self.match_id, "Idle timeout, abandoning");
            if let Some(accepted) = self.game.as_mut().and_then(step::abandon) {
                self.publish(accepted, now);
            }
            self.state = SessionState::Closed;
        }
    }

    /// Notify everyone and close.
    pub fn shutdown(&mut self, reason: &str) {
        self.broadcast(ServerMessage::Shutdown { reason: reason.to_string() });
        self.state = SessionState::Closed;
    }

    // =========================================================================
    // FAN-OUT
    // =========================================================================

    fn emit_to(&self, slot: PlayerSlot, message: ServerMessage) {
        if let Some(seat) = &self.seats[slot.index()] {
            seat.emit(message);
        }
    }

    /// Send to every connected seat, in seat order.
    fn broadcast(&self, message: ServerMessage) {
        for seat in self.seats.iter().flatten() {
            seat.emit(message.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::state::{EndReason, MatchResult, Phase};
    use crate::network::transport::connection_pair;
    use tokio::sync::mpsc;

    fn a() -> PlayerId {
        PlayerId::new([1; 16])
    }

    fn b() -> PlayerId {
        PlayerId::new([2; 16])
    }

    fn conn(id: u64) -> (ConnectionHandle, mpsc::Receiver<ServerMessage>) {
        connection_pair(ConnectionId(id), 64)
    }

    fn drain(rx: &mut mpsc::Receiver<ServerMessage>) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    fn delta_seqs(messages: &[ServerMessage]) -> Vec<u64> {
        messages
            .iter()
            .filter_map(|m| match m {
                ServerMessage::MatchDelta { seq, .. } => Some(*seq),
                _ => None,
            })
            .collect()
    }

    fn session_with(config: SessionConfig, now: Instant) -> MatchSession {
        MatchSession::new(Uuid::from_bytes([9; 16]), Arc::new(Ruleset::builtin()), config, now)
    }

    struct Started {
        session: MatchSession,
        conn_a: ConnectionHandle,
        rx_a: mpsc::Receiver<ServerMessage>,
        conn_b: ConnectionHandle,
        rx_b: mpsc::Receiver<ServerMessage>,
    }

    fn started(config: SessionConfig, now: Instant) -> Started {
        let mut session = session_with(config, now);
        let (conn_a, mut rx_a) = conn(1);
        let (conn_b, mut rx_b) = conn(2);
        assert_eq!(session.join(a(), conn_a.clone(), None, now), Ok(PlayerSlot::A));
        assert_eq!(session.join(b(), conn_b.clone(), None, now), Ok(PlayerSlot::B));
        drain(&mut rx_a);
        drain(&mut rx_b);
        Started { session, conn_a, rx_a, conn_b, rx_b }
    }

    fn advance() -> Action {
        Action::AdvancePhase { expected: None }
    }

    #[test]
    fn test_join_starts_match() {
        let now = Instant::now();
        let mut session = session_with(SessionConfig::default(), now);
        let (conn_a, mut rx_a) = conn(1);
        let (conn_b, mut rx_b) = conn(2);

        session.join(a(), conn_a, None, now).unwrap();
        assert_eq!(session.state(), SessionState::Waiting);
        assert_eq!(session.open_seats(), 1);
        match drain(&mut rx_a).as_slice() {
            [ServerMessage::Joined(info)] => {
                assert_eq!(info.slot, PlayerSlot::A);
                assert!(info.waiting);
                assert!(!info.reconnected);
            }
            other => panic!("unexpected messages: {other:?}"),
        }

        session.join(b(), conn_b, None, now).unwrap();
        assert_eq!(session.state(), SessionState::Active);
        assert_eq!(session.open_seats(), 0);

        let game = session.game().unwrap();
        assert_eq!(game.phase, Phase::Deployment);
        assert_eq!(game.seq, 0);

        let to_a = drain(&mut rx_a);
        assert!(matches!(to_a.as_slice(), [ServerMessage::MatchStarted { .. }]));
        let to_b = drain(&mut rx_b);
        assert!(matches!(to_b.as_slice(), [ServerMessage::Joined(_), ServerMessage::MatchStarted { .. }]));

        // A third player cannot join
        let (conn_c, _rx_c) = conn(3);
        assert_eq!(
            session.join(PlayerId::new([3; 16]), conn_c, None, now),
            Err(SessionError::MatchFull)
        );
    }

    #[test]
    fn test_accepted_delta_broadcast_to_both() {
        let now = Instant::now();
        let mut s = started(SessionConfig::default(), now);

        s.session.submit(a(), &s.conn_a, 1, advance(), now);

        let to_a = drain(&mut s.rx_a);
        let to_b = drain(&mut s.rx_b);
        assert_eq!(delta_seqs(&to_a), vec![1]);
        assert_eq!(to_a, to_b);

        let expected_hash = hash_hex(&s.session.game().unwrap().compute_hash());
        match &to_a[0] {
            ServerMessage::MatchDelta { state_hash, .. } => assert_eq!(state_hash, &expected_hash),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_rejection_goes_to_originator_only() {
        let now = Instant::now();
        let mut s = started(SessionConfig::default(), now);
        let before = s.session.game().unwrap().clone();

        s.session.submit(b(), &s.conn_b, 1, advance(), now);

        assert_eq!(
            drain(&mut s.rx_b),
            vec![ServerMessage::rejected(1, RejectionReason::NotYourTurn)]
        );
        assert!(drain(&mut s.rx_a).is_empty());
        assert_eq!(s.session.game().unwrap(), &before);
    }

    #[test]
    fn test_submit_while_waiting() {
        let now = Instant::now();
        let mut session = session_with(SessionConfig::default(), now);
        let (conn_a, mut rx_a) = conn(1);
        session.join(a(), conn_a.clone(), None, now).unwrap();
        drain(&mut rx_a);

        session.submit(a(), &conn_a, 1, advance(), now);
        assert_eq!(
            drain(&mut rx_a),
            vec![ServerMessage::rejected(1, RejectionReason::WrongPhase)]
        );
    }

    #[test]
    fn test_malformed_action_keeps_match_running() {
        let now = Instant::now();
        let mut s = started(SessionConfig::default(), now);

        s.session.reject_malformed(&s.conn_a, 5);
        assert_eq!(
            drain(&mut s.rx_a),
            vec![ServerMessage::rejected(5, RejectionReason::MalformedAction)]
        );

        s.session.submit(a(), &s.conn_a, 6, advance(), now);
        assert_eq!(delta_seqs(&drain(&mut s.rx_a)), vec![1]);
        assert_eq!(s.session.state(), SessionState::Active);
    }

    #[test]
    fn test_reconnect_receives_exactly_missed_deltas() {
        let now = Instant::now();
        let mut s = started(SessionConfig::default(), now);

        // seq 1 seen by both
        s.session.submit(a(), &s.conn_a, 1, advance(), now);
        drain(&mut s.rx_a);
        drain(&mut s.rx_b);

        // B drops
        assert!(s.session.disconnect(b(), s.conn_b.id(), now));
        assert_eq!(
            drain(&mut s.rx_a),
            vec![ServerMessage::PlayerAway { slot: PlayerSlot::B, grace_secs: 30 }]
        );

        // seq 2 and 3 happen while B is away
        s.session.submit(a(), &s.conn_a, 2, advance(), now);
        s.session.submit(a(), &s.conn_a, 3, advance(), now);
        assert_eq!(delta_seqs(&drain(&mut s.rx_a)), vec![2, 3]);

        // B returns within grace
        let (conn_b2, mut rx_b2) = conn(3);
        let later = now + Duration::from_secs(10);
        assert_eq!(s.session.join(b(), conn_b2, Some(1), later), Ok(PlayerSlot::B));

        let to_b = drain(&mut rx_b2);
        assert!(matches!(&to_b[0], ServerMessage::Joined(info) if info.reconnected));
        assert_eq!(delta_seqs(&to_b), vec![2, 3]);
        assert_eq!(to_b.len(), 3);
        assert_eq!(
            drain(&mut s.rx_a),
            vec![ServerMessage::PlayerReturned { slot: PlayerSlot::B }]
        );

        // Housekeeping after the grace period does nothing now
        assert_eq!(
            s.session.housekeeping(now + Duration::from_secs(60)),
            SessionState::Active
        );

        // Sync with nothing missing is empty
        s.session.sync(b(), &s.conn_a, 3);
        assert!(drain(&mut s.rx_a).is_empty());
    }

    #[test]
    fn test_evicted_range_falls_back_to_snapshot() {
        let now = Instant::now();
        let config = SessionConfig { delta_ring_capacity: 2, ..Default::default() };
        let mut s = started(config, now);

        for client_seq in 1..=3 {
            s.session.submit(a(), &s.conn_a, client_seq, advance(), now);
        }
        assert_eq!(s.session.ring.len(), 2);

        let (observer, mut rx) = conn(7);
        s.session.sync(a(), &observer, 0);
        match drain(&mut rx).as_slice() {
            [ServerMessage::Snapshot(snapshot)] => {
                assert_eq!(snapshot.seq, 3);
                assert_eq!(&snapshot.state, s.session.game().unwrap());
            }
            other => panic!("unexpected messages: {other:?}"),
        }

        // Still in range
        s.session.sync(a(), &observer, 1);
        assert_eq!(delta_seqs(&drain(&mut rx)), vec![2, 3]);
    }

    #[test]
    fn test_grace_expiry_forfeits_to_remaining_player() {
        let now = Instant::now();
        let mut s = started(SessionConfig::default(), now);

        s.session.disconnect(b(), s.conn_b.id(), now);
        drain(&mut s.rx_a);

        assert_eq!(s.session.housekeeping(now + Duration::from_secs(29)), SessionState::Active);
        assert_eq!(s.session.housekeeping(now + Duration::from_secs(30)), SessionState::Ended);

        let outcome = s.session.game().unwrap().outcome.unwrap();
        assert_eq!(outcome.result, MatchResult::Win(PlayerSlot::A));
        assert_eq!(outcome.reason, EndReason::Forfeit);

        let to_a = drain(&mut s.rx_a);
        assert_eq!(delta_seqs(&to_a), vec![1]);
        assert!(matches!(to_a.last(), Some(ServerMessage::MatchEnded { .. })));

        // A leaves too; the ended match closes
        s.session.disconnect(a(), s.conn_a.id(), now);
        assert_eq!(s.session.housekeeping(now + Duration::from_secs(31)), SessionState::Closed);
    }

    #[test]
    fn test_ended_match_closes_when_connections_drop() {
        let now = Instant::now();
        let mut s = started(SessionConfig::default(), now);
        s.session.leave(b(), now).unwrap();
        assert_eq!(s.session.housekeeping(now), SessionState::Ended);

        // A's socket goes away without a disconnect reaching this match
        drop(s.rx_a);
        assert_eq!(s.session.housekeeping(now), SessionState::Closed);
    }

    #[test]
    fn test_ended_match_idle_timeout() {
        let now = Instant::now();
        let config = SessionConfig { idle_timeout: Duration::from_secs(60), ..Default::default() };
        let mut s = started(config, now);
        let later = now + Duration::from_secs(10);
        s.session.leave(b(), later).unwrap();

        // Still connected, so only the idle timeout can close it
        assert_eq!(s.session.housekeeping(later + Duration::from_secs(59)), SessionState::Ended);
        assert_eq!(s.session.housekeeping(later + Duration::from_secs(60)), SessionState::Closed);
        drain(&mut s.rx_a);
    }

    #[test]
    fn test_stale_disconnect_ignored() {
        let now = Instant::now();
        let mut s = started(SessionConfig::default(), now);

        let (conn_b2, _rx_b2) = conn(3);
        s.session.join(b(), conn_b2.clone(), Some(0), now).unwrap();

        // The old connection closing must not mark B away
        assert!(!s.session.disconnect(b(), s.conn_b.id(), now));
        assert_eq!(s.session.seat(PlayerSlot::B).unwrap().presence(), Presence::Connected);
        assert!(s.session.disconnect(b(), conn_b2.id(), now));
    }

    #[test]
    fn test_leave_waiting_frees_seat() {
        let now = Instant::now();
        let mut session = session_with(SessionConfig::default(), now);
        let (conn_a, _rx_a) = conn(1);
        session.join(a(), conn_a, None, now).unwrap();

        session.leave(a(), now).unwrap();
        assert_eq!(session.seat_of(a()), None);
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(session.leave(a(), now), Err(SessionError::NotSeated));
    }

    #[test]
    fn test_leave_active_forfeits() {
        let now = Instant::now();
        let mut s = started(SessionConfig::default(), now);

        s.session.leave(a(), now).unwrap();
        assert_eq!(s.session.state(), SessionState::Ended);
        let outcome = s.session.game().unwrap().outcome.unwrap();
        assert_eq!(outcome.result, MatchResult::Win(PlayerSlot::B));

        let to_b = drain(&mut s.rx_b);
        assert!(matches!(to_b.last(), Some(ServerMessage::MatchEnded { .. })));
    }

    #[test]
    fn test_idle_timeout_abandons() {
        let now = Instant::now();
        let config = SessionConfig { idle_timeout: Duration::from_secs(60), ..Default::default() };
        let mut s = started(config, now);

        assert_eq!(s.session.housekeeping(now + Duration::from_secs(59)), SessionState::Active);
        assert_eq!(s.session.housekeeping(now + Duration::from_secs(60)), SessionState::Closed);

        let outcome = s.session.game().unwrap().outcome.unwrap();
        assert_eq!(outcome.result, MatchResult::Draw);
        assert_eq!(outcome.reason, EndReason::Abandoned);
        assert!(matches!(drain(&mut s.rx_b).last(), Some(ServerMessage::MatchEnded { .. })));
    }

    #[test]
    fn test_delta_ring_window() {
        let ruleset = Ruleset::builtin();
        let mut state = MatchState::new(Uuid::nil(), [a(), b()], &ruleset);
        machine::begin(&mut state, &ruleset.rules);

        let mut ring = DeltaRing::new(3);
        for client_seq in 1..=5 {
            // Turn passes to B after Resolution; keep advancing whoever is active
            let player = state.player(state.active).id;
            let sub = Submission::new(player, client_seq, advance());
            match step::submit(&mut state, &ruleset, &sub) {
                StepResult::Accepted(acc) => ring.push(acc.delta, acc.state_hash),
                StepResult::Rejected(reason) => panic!("unexpected rejection: {reason:?}"),
            }
        }

        let seqs = |v: Vec<&(MatchDelta, StateHash)>| v.iter().map(|(d, _)| d.seq).collect::<Vec<_>>();
        assert_eq!(ring.len(), 3);
        assert_eq!(ring.since(2, 5).map(seqs), Some(vec![3, 4, 5]));
        assert_eq!(ring.since(4, 5).map(seqs), Some(vec![5]));
        assert_eq!(ring.since(5, 5).map(seqs), Some(vec![]));
        assert!(ring.since(1, 5).is_none());
        assert!(ring.since(6, 5).is_none());
    }
}
