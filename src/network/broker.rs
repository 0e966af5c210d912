//! Session Broker
//!
//! Routes inbound commands to the task that owns each match. Every match
//! runs in its own task consuming a FIFO command channel, so commands for
//! one match are handled strictly in arrival order and matches never share
//! mutable state. The broker itself only holds routing tables.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot, watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::game::action::{Action, RejectionReason};
use crate::game::rules::Ruleset;
use crate::game::state::{PlayerId, PlayerSlot};
use crate::network::protocol::ServerMessage;
use crate::network::session::{MatchSession, SessionConfig, SessionError, SessionState};
use crate::network::transport::{ConnectionHandle, ConnectionId};

/// Queued commands per match.
const COMMAND_BUFFER: usize = 256;

/// Open matches tried before a fresh one is created.
const MAX_JOIN_ATTEMPTS: usize = 4;

/// A command for one match task.
#[derive(Debug)]
pub enum MatchCommand {
    /// Seat or reconnect a player.
    Join {
        /// Player
        player: PlayerId,
        /// Player's connection
        conn: ConnectionHandle,
        /// Last delta the client saw
        last_seen_seq: Option<u64>,
        /// Result
        reply: oneshot::Sender<Result<PlayerSlot, SessionError>>,
    },
    /// Validate and apply an action.
    Submit {
        /// Player
        player: PlayerId,
        /// Originating connection
        conn: ConnectionHandle,
        /// Client sequence number
        client_seq: u64,
        /// The action
        action: Action,
    },
    /// Reject an unparseable action.
    Malformed {
        /// Originating connection
        conn: ConnectionHandle,
        /// Client sequence number
        client_seq: u64,
    },
    /// Catch a client up.
    Sync {
        /// Player
        player: PlayerId,
        /// Originating connection
        conn: ConnectionHandle,
        /// Last delta the client saw
        last_seen_seq: u64,
    },
    /// A connection dropped.
    Disconnect {
        /// Player
        player: PlayerId,
        /// The connection that dropped
        conn_id: ConnectionId,
    },
    /// Explicit leave.
    Leave {
        /// Player
        player: PlayerId,
        /// Result
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    /// Notify participants and stop.
    Shutdown {
        /// Reason sent to clients
        reason: String,
    },
}

/// Routing view of a match, published by its task after every command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchStatus {
    /// Session state
    pub state: SessionState,
    /// Free seats (only while waiting)
    pub open_seats: usize,
    /// Seated players
    pub players: Vec<PlayerId>,
}

impl MatchStatus {
    fn of(session: &MatchSession) -> Self {
        Self {
            state: session.state(),
            open_seats: session.open_seats(),
            players: session.seated_players(),
        }
    }

    fn is_joinable(&self) -> bool {
        self.state == SessionState::Waiting && self.open_seats > 0
    }
}

struct MatchHandle {
    commands: mpsc::Sender<MatchCommand>,
    status: watch::Receiver<MatchStatus>,
    task: JoinHandle<()>,
    created: u64,
}

/// Manages all active matches.
pub struct SessionBroker {
    ruleset: Arc<Ruleset>,
    config: SessionConfig,
    matches: RwLock<BTreeMap<Uuid, MatchHandle>>,
    players: RwLock<BTreeMap<PlayerId, Uuid>>,
    next_order: AtomicU64,
}

impl SessionBroker {
    /// Create a broker.
    pub fn new(ruleset: Arc<Ruleset>, config: SessionConfig) -> Self {
        Self {
            ruleset,
            config,
            matches: RwLock::new(BTreeMap::new()),
            players: RwLock::new(BTreeMap::new()),
            next_order: AtomicU64::new(0),
        }
    }

    /// Shared ruleset.
    pub fn ruleset(&self) -> &Arc<Ruleset> {
        &self.ruleset
    }

    // =========================================================================
    // JOIN
    // =========================================================================

    /// Seat `player`.
    ///
    /// With `match_id`, joins (or creates) that match. Without, joins the
    /// oldest open match or opens a new one. A player who already holds a
    /// seat is reconnected to it instead.
    #[instrument(skip(self, player, conn), fields(player = %player))]
    pub async fn join(
        &self,
        player: PlayerId,
        conn: ConnectionHandle,
        match_id: Option<Uuid>,
        last_seen_seq: Option<u64>,
    ) -> Result<(Uuid, PlayerSlot), SessionError> {
        if let Some(current) = self.current_match(player).await {
            match match_id {
                Some(requested) if requested != current => return Err(SessionError::AlreadyInMatch),
                _ => {
                    let slot = self.send_join(current, player, conn, last_seen_seq).await?;
                    return Ok((current, slot));
                }
            }
        }

        let joined = match match_id {
            Some(id) => {
                self.ensure_match(id).await;
                let slot = self.send_join(id, player, conn, last_seen_seq).await?;
                (id, slot)
            }
            None => self.join_any(player, conn).await?,
        };

        self.players.write().await.insert(player, joined.0);
        info!(match_id = %joined.0, slot = ?joined.1, "Player joined");
        Ok(joined)
    }

    async fn join_any(
        &self,
        player: PlayerId,
        conn: ConnectionHandle,
    ) -> Result<(Uuid, PlayerSlot), SessionError> {
        let mut tried = Vec::new();
        while tried.len() < MAX_JOIN_ATTEMPTS {
            let Some(id) = self.oldest_open(&tried).await else {
                break;
            };
            tried.push(id);
            match self.send_join(id, player, conn.clone(), None).await {
                Ok(slot) => return Ok((id, slot)),
                Err(SessionError::MatchFull | SessionError::MatchClosed) => continue,
                Err(e) => return Err(e),
            }
        }

        let id = Uuid::new_v4();
        self.ensure_match(id).await;
        let slot = self.send_join(id, player, conn, None).await?;
        Ok((id, slot))
    }

    /// The live match `player` is seated in, if any. Drops stale entries.
    async fn current_match(&self, player: PlayerId) -> Option<Uuid> {
        let id = *self.players.read().await.get(&player)?;

        let (live, ended) = {
            let matches = self.matches.read().await;
            matches.get(&id).map_or((false, false), |handle| {
                let status = handle.status.borrow();
                let seated = status.players.contains(&player);
                let live = matches!(status.state, SessionState::Waiting | SessionState::Active);
                (seated && live, seated && status.state == SessionState::Ended)
            })
        };

        if live {
            return Some(id);
        }
        self.players.write().await.remove(&player);
        if ended {
            self.release(id, player).await;
        }
        None
    }

    /// Let an ended match forget `player`'s connection so it can close.
    async fn release(&self, id: Uuid, player: PlayerId) {
        let (reply, _) = oneshot::channel();
        if self.dispatch(id, MatchCommand::Leave { player, reply }).await.is_ok() {
            debug!(match_id = %id, player = %player, "Released seat in ended match");
        }
    }

    async fn oldest_open(&self, exclude: &[Uuid]) -> Option<Uuid> {
        let matches = self.matches.read().await;
        matches
            .iter()
            .filter(|(id, handle)| !exclude.contains(*id) && handle.status.borrow().is_joinable())
            .min_by_key(|(_, handle)| handle.created)
            .map(|(id, _)| *id)
    }

    /// Spawn the task for `id` unless it already exists.
    async fn ensure_match(&self, id: Uuid) {
        let mut matches = self.matches.write().await;
        if matches.contains_key(&id) {
            return;
        }

        let session = MatchSession::new(id, self.ruleset.clone(), self.config.clone(), Instant::now());
        let (commands, rx) = mpsc::channel(COMMAND_BUFFER);
        let (status_tx, status) = watch::channel(MatchStatus::of(&session));
        let period = self.config.housekeeping_interval;
        let task = tokio::spawn(run_match(session, rx, status_tx, period));

        matches.insert(id, MatchHandle {
            commands,
            status,
            task,
            created: self.next_order.fetch_add(1, Ordering::Relaxed),
        });
        info!(match_id = %id, "Match created");
    }

    async fn send_join(
        &self,
        id: Uuid,
        player: PlayerId,
        conn: ConnectionHandle,
        last_seen_seq: Option<u64>,
    ) -> Result<PlayerSlot, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.dispatch(id, MatchCommand::Join { player, conn, last_seen_seq, reply }).await?;
        rx.await.map_err(|_| SessionError::MatchClosed)?
    }

    // =========================================================================
    // ROUTED COMMANDS
    // =========================================================================

    /// Route an action to the player's match.
    pub async fn submit(
        &self,
        player: PlayerId,
        conn: &ConnectionHandle,
        client_seq: u64,
        action: Action,
    ) -> Result<(), SessionError> {
        let id = self.route(player).await?;
        let command = MatchCommand::Submit { player, conn: conn.clone(), client_seq, action };
        self.dispatch(id, command).await
    }

    /// Reject an unparseable action, in order with the match's other output.
    pub async fn reject_malformed(&self, player: PlayerId, conn: &ConnectionHandle, client_seq: u64) {
        let routed = match self.route(player).await {
            Ok(id) => {
                let command = MatchCommand::Malformed { conn: conn.clone(), client_seq };
                self.dispatch(id, command).await
            }
            Err(e) => Err(e),
        };
        if routed.is_err() {
            conn.emit(ServerMessage::rejected(client_seq, RejectionReason::MalformedAction));
        }
    }

    /// Route a sync request.
    pub async fn sync(
        &self,
        player: PlayerId,
        conn: &ConnectionHandle,
        last_seen_seq: u64,
    ) -> Result<(), SessionError> {
        let id = self.route(player).await?;
        let command = MatchCommand::Sync { player, conn: conn.clone(), last_seen_seq };
        self.dispatch(id, command).await
    }

    /// Report a dropped connection. The seat stays mapped for reconnects.
    pub async fn disconnect(&self, player: PlayerId, conn_id: ConnectionId) {
        let Some(id) = self.players.read().await.get(&player).copied() else {
            return;
        };
        if self.dispatch(id, MatchCommand::Disconnect { player, conn_id }).await.is_err() {
            debug!(match_id = %id, player = %player, "Disconnect for finished match");
        }
    }

    /// Leave the current match.
    pub async fn leave(&self, player: PlayerId) -> Result<(), SessionError> {
        let id = self.route(player).await?;
        let (reply, rx) = oneshot::channel();
        self.dispatch(id, MatchCommand::Leave { player, reply }).await?;
        let result = rx.await.map_err(|_| SessionError::MatchClosed)?;
        self.players.write().await.remove(&player);
        result
    }

    /// Tell every match to notify its participants and stop.
    pub async fn shutdown(&self, reason: &str) {
        let senders: Vec<_> = {
            let matches = self.matches.read().await;
            matches.values().map(|h| h.commands.clone()).collect()
        };
        info!(matches = senders.len(), "Shutting down matches");
        for tx in senders {
            let _ = tx.send(MatchCommand::Shutdown { reason: reason.to_string() }).await;
        }
    }

    async fn route(&self, player: PlayerId) -> Result<Uuid, SessionError> {
        self.players
            .read()
            .await
            .get(&player)
            .copied()
            .ok_or(SessionError::NotSeated)
    }

    async fn dispatch(&self, id: Uuid, command: MatchCommand) -> Result<(), SessionError> {
        let tx = {
            let matches = self.matches.read().await;
            matches.get(&id).map(|h| h.commands.clone())
        }
        .ok_or(SessionError::MatchClosed)?;

        tx.send(command).await.map_err(|_| SessionError::MatchClosed)
    }

    // =========================================================================
    // CLEANUP
    // =========================================================================

    /// Drop handles of finished match tasks and their player mappings.
    pub async fn cleanup(&self) -> usize {
        let finished: Vec<Uuid> = {
            let mut matches = self.matches.write().await;
            let finished: Vec<Uuid> = matches
                .iter()
                .filter(|(_, h)| h.task.is_finished())
                .map(|(id, _)| *id)
                .collect();
            for id in &finished {
                matches.remove(id);
            }
            finished
        };

        if !finished.is_empty() {
            self.players.write().await.retain(|_, id| !finished.contains(id));
            debug!(removed = finished.len(), "Cleaned up finished matches");
        }
        finished.len()
    }

    /// Run `cleanup` every `period` until the task is aborted.
    pub fn spawn_cleanup(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let broker = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                broker.cleanup().await;
            }
        })
    }

    /// Number of tracked matches.
    pub async fn match_count(&self) -> usize {
        self.matches.read().await.len()
    }

    /// Latest status of a match.
    pub async fn status(&self, id: Uuid) -> Option<MatchStatus> {
        let matches = self.matches.read().await;
        matches.get(&id).map(|h| h.status.borrow().clone())
    }
}

// =============================================================================
// MATCH TASK
// =============================================================================

async fn run_match(
    mut session: MatchSession,
    mut commands: mpsc::Receiver<MatchCommand>,
    status: watch::Sender<MatchStatus>,
    period: Duration,
) {
    let match_id = session.match_id();
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            command = commands.recv() => {
                match command {
                    Some(command) => handle_command(&mut session, &status, command),
                    None => break,
                }
            }
            _ = ticker.tick() => {
                session.housekeeping(Instant::now());
                status.send_replace(MatchStatus::of(&session));
            }
        }

        if session.state() == SessionState::Closed {
            break;
        }
    }

    if session.state() != SessionState::Closed {
        warn!(match_id = %match_id, "Command channel closed before match finished");
    }
    info!(match_id = %match_id, "Match task finished");
}

fn handle_command(session: &mut MatchSession, status: &watch::Sender<MatchStatus>, command: MatchCommand) {
    let now = Instant::now();
    match command {
        MatchCommand::Join { player, conn, last_seen_seq, reply } => {
            let result = session.join(player, conn, last_seen_seq, now);
            status.send_replace(MatchStatus::of(session));
            let _ = reply.send(result);
        }
        MatchCommand::Submit { player, conn, client_seq, action } => {
            session.submit(player, &conn, client_seq, action, now);
            status.send_replace(MatchStatus::of(session));
        }
        MatchCommand::Malformed { conn, client_seq } => {
            session.reject_malformed(&conn, client_seq);
        }
        MatchCommand::Sync { player, conn, last_seen_seq } => {
            session.sync(player, &conn, last_seen_seq);
        }
        MatchCommand::Disconnect { player, conn_id } => {
            session.disconnect(player, conn_id, now);
            status.send_replace(MatchStatus::of(session));
        }
        MatchCommand::Leave { player, reply } => {
            let result = session.leave(player, now);
            status.send_replace(MatchStatus::of(session));
            let _ = reply.send(result);
        }
        MatchCommand::Shutdown { reason } => {
            session.shutdown(&reason);
            status.send_replace(MatchStatus::of(session));
        }
    }
}
