//! Game Hub
//!
//! Composition root of the game side. Owns the room registry, every session
//! and the tournament book, and binds connections to identities and
//! paddles. All mutation goes through here, from a single task, so handlers
//! are plain synchronous transitions and never wait on I/O: outbound
//! messages are queued with `try_send`.
//!
//! Leaving during a running game is a forfeit. Outside a running game it is
//! a plain leave.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::core::clock::Clock;
use crate::core::rng::derive_session_seed;
use crate::game::ai::{AiConfig, Difficulty};
use crate::game::input::Direction;
use crate::game::state::{GameConfig, PaddleSide};
use crate::network::protocol::{
    ClientMessage, ErrorCode, GameFinishedInfo, JoinRequest, PlayerResult, RoomJoinedInfo,
    ServerMessage,
};
use crate::network::room::{Departure, Room, RoomError, RoomKind, RoomRegistry, TournamentLink};
use crate::network::session::{GameSession, SessionEnded, SessionError};
use crate::services::{
    ConnectionId, Identity, IdentityProvider, MatchRecord, MatchRecorder, MatchType, Outbox,
    PublishScope, Publisher,
};
use crate::tournament::{BracketError, TournamentBook};

/// Outbound channel of one connection.
pub type ClientSender = mpsc::Sender<ServerMessage>;

/// Collaborators injected into the hub.
#[derive(Clone)]
pub struct HubServices {
    /// Who is behind a connection.
    pub identities: Arc<dyn IdentityProvider>,
    /// Where finished matches go.
    pub recorder: Arc<dyn MatchRecorder>,
    /// Where tournament notifications go (besides the participants).
    pub publisher: Arc<dyn Publisher>,
    /// Time source for serve delays and seeds.
    pub clock: Arc<dyn Clock>,
}

/// Hub settings.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Constants for every new game.
    pub game: GameConfig,
    /// Strength of the AI in `ai` rooms.
    pub ai_difficulty: Difficulty,
    /// Seed for tournament draws.
    pub bracket_seed: u64,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            game: GameConfig::default(),
            ai_difficulty: Difficulty::Medium,
            bracket_seed: 0x5EED,
        }
    }
}

/// Why a request was refused.
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    /// No identity for the connection.
    #[error("authenticate before joining")]
    NotAuthenticated,

    /// Identity already seated under another connection.
    #[error("user {0} is already connected")]
    AlreadyConnected(String),

    /// This connection already holds a seat.
    #[error("already seated in room {0}")]
    AlreadySeated(String),

    /// Malformed request.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Connection is not in a room.
    #[error("not in a room")]
    NotInRoom,

    /// Paddle is bound to someone else.
    #[error("the {0:?} paddle is not yours")]
    NotYourPaddle(PaddleSide),

    /// No such paddle side.
    #[error("unknown paddle {0:?}")]
    UnknownPaddle(String),

    /// No such direction.
    #[error("unknown direction {0:?}")]
    UnknownDirection(String),

    /// Room failure.
    #[error(transparent)]
    Room(#[from] RoomError),

    /// Session failure.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// Bracket failure.
    #[error(transparent)]
    Bracket(#[from] BracketError),
}

impl HubError {
    /// Wire code reported to the client.
    pub fn code(&self) -> ErrorCode {
        match self {
            HubError::NotAuthenticated => ErrorCode::NotAuthenticated,
            HubError::AlreadyConnected(_) | HubError::AlreadySeated(_) => {
                ErrorCode::UserAlreadyConnected
            }
            HubError::InvalidInput(_) => ErrorCode::InvalidInput,
            HubError::NotInRoom => ErrorCode::RoomNotFound,
            HubError::NotYourPaddle(_) | HubError::UnknownPaddle(_) => ErrorCode::InvalidPaddle,
            HubError::UnknownDirection(_) => ErrorCode::InvalidDirection,
            HubError::Room(e) => e.code(),
            HubError::Session(e) => e.code(),
            HubError::Bracket(_) => ErrorCode::InternalError,
        }
    }

    /// The connection must be evicted from all bindings. A connection
    /// re-sending `join_room` from its own seat keeps it.
    fn evicts(&self) -> bool {
        matches!(self, HubError::NotAuthenticated | HubError::AlreadyConnected(_))
    }
}

/// How a connection left.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DepartReason {
    Leave,
    Disconnect,
    Evicted,
}

/// Result of a forfeit, for tournament follow-up.
struct Forfeit {
    winner_user: Option<String>,
    link: Option<TournamentLink>,
}

/// The hub.
pub struct GameHub {
    registry: RoomRegistry,
    tournaments: TournamentBook,
    services: HubServices,
    config: HubConfig,
    clients: BTreeMap<ConnectionId, ClientSender>,
    results_tx: mpsc::UnboundedSender<SessionEnded>,
    results_rx: mpsc::UnboundedReceiver<SessionEnded>,
    notices: Outbox,
}

impl GameHub {
    /// Create a hub.
    pub fn new(services: HubServices, config: HubConfig) -> Self {
        let (results_tx, results_rx) = mpsc::unbounded_channel();
        Self {
            registry: RoomRegistry::new(),
            tournaments: TournamentBook::new(config.bracket_seed),
            services,
            config,
            clients: BTreeMap::new(),
            results_tx,
            results_rx,
            notices: Outbox::new(),
        }
    }

    // =========================================================================
    // CONNECTIONS
    // =========================================================================

    /// Register a connection's outbound channel.
    pub fn connect(&mut self, connection: ConnectionId, sender: ClientSender) {
        debug!("{:?} connected", connection);
        self.clients.insert(connection, sender);
    }

    /// Transport closed: forfeit or leave, then forget the connection.
    #[instrument(skip(self))]
    pub fn disconnect(&mut self, connection: ConnectionId) {
        self.depart(connection, DepartReason::Disconnect);
        self.clients.remove(&connection);
        debug!("{:?} disconnected", connection);
    }

    /// Dispatch one client message.
    pub fn handle_message(&mut self, connection: ConnectionId, msg: ClientMessage) {
        let result = match msg {
            ClientMessage::JoinRoom(req) => self.join(connection, req),
            ClientMessage::MovePaddle(req) => match (req.side(), req.direction()) {
                (Err(raw), _) => Err(HubError::UnknownPaddle(raw)),
                (_, Err(raw)) => Err(HubError::UnknownDirection(raw)),
                (Ok(side), Ok(direction)) => self.move_paddle(connection, side, direction),
            },
            ClientMessage::LeaveRoom => {
                self.leave(connection);
                Ok(())
            }
            ClientMessage::Ping { timestamp } => {
                let server_time = self.services.clock.now_ms();
                self.send(connection, ServerMessage::Pong { timestamp, server_time });
                Ok(())
            }
            ClientMessage::Auth(_) => {
                debug!("{:?} auth reached the hub; handled by transport", connection);
                Ok(())
            }
        };

        if let Err(e) = result {
            self.reject(connection, e);
        }
    }

    fn reject(&mut self, connection: ConnectionId, err: HubError) {
        debug!("Rejected request from {:?}: {}", connection, err);
        self.send(connection, ServerMessage::error(err.code(), err.to_string()));
        if err.evicts() {
            self.depart(connection, DepartReason::Evicted);
        }
    }

    // =========================================================================
    // JOIN
    // =========================================================================

    /// Seat a connection in a room, bind its paddle and start the game once
    /// the room is full.
    #[instrument(skip(self))]
    pub fn join(&mut self, connection: ConnectionId, req: JoinRequest) -> Result<(), HubError> {
        let identity = self
            .services
            .identities
            .identity_for_connection(connection)
            .ok_or(HubError::NotAuthenticated)?;

        if req.capacity != 2 && req.capacity != 4 {
            return Err(HubError::InvalidInput(format!(
                "capacity must be 2 or 4, got {}",
                req.capacity
            )));
        }
        match req.kind {
            RoomKind::Tournament if req.capacity != 4 => {
                return Err(HubError::InvalidInput("tournaments need 4 players".into()));
            }
            RoomKind::Ai if req.capacity != 2 => {
                return Err(HubError::InvalidInput("AI games are 1 vs 1".into()));
            }
            _ => {}
        }

        if let Some(room) = self.registry.room_of(connection) {
            return Err(HubError::AlreadySeated(room.to_string()));
        }
        if self.registry.identity_in_use(&identity.user_id) {
            return Err(HubError::AlreadyConnected(identity.user_id));
        }

        let name = match req.room_name {
            Some(name) => name,
            None => self.registry.find_or_create_room(req.capacity, req.kind)?,
        };

        let tournament = self.ensure_tournament(&name);
        self.registry.join_room(&name, connection, identity.clone())?;

        let mut bracket_full = false;
        if let Some(tid) = tournament {
            match self.tournaments.register(tid, &identity.user_id) {
                Ok(full) => bracket_full = full,
                Err(e) => {
                    self.remove_from_room(connection);
                    return Err(e.into());
                }
            }
        }

        info!("{} joined room {}", identity.display_name, name);
        self.announce_room(&name);

        if let Some(tid) = tournament {
            if bracket_full {
                self.start_tournament(tid, &name);
            }
        } else if self.registry.get(&name).map(|r| r.is_full()).unwrap_or(false) {
            self.start_session(&name);
        }

        Ok(())
    }

    /// Link a fresh tournament room to a new tournament. Returns the
    /// tournament id if the room is a tournament lobby.
    fn ensure_tournament(&mut self, name: &str) -> Option<Uuid> {
        let room = self.registry.get_mut(name)?;
        if room.kind != RoomKind::Tournament {
            return None;
        }
        match room.tournament {
            Some(link) if link.is_lobby() => Some(link.tournament_id),
            Some(_) => None,
            None => {
                let tid = self.tournaments.create();
                room.tournament = Some(TournamentLink {
                    tournament_id: tid,
                    match_id: None,
                });
                Some(tid)
            }
        }
    }

    /// Send `room_joined` to every member with their own binding.
    fn announce_room(&self, name: &str) {
        let room = match self.registry.get(name) {
            Some(room) => room,
            None => return,
        };
        let players = room.player_summaries();

        for member in room.members() {
            if let Some(paddle) = room.binding_of(*member) {
                self.send(
                    *member,
                    ServerMessage::RoomJoined(RoomJoinedInfo {
                        room: room.name.clone(),
                        paddle,
                        players: players.clone(),
                        max_players: room.capacity(),
                        kind: room.kind,
                    }),
                );
            }
        }
    }

    fn start_session(&mut self, name: &str) {
        let clock = self.services.clock.clone();
        let now = clock.now_ms();

        let room = match self.registry.get_mut(name) {
            Some(room) => room,
            None => return,
        };
        if room.is_started() {
            return;
        }

        let members: Vec<u64> = room.members().iter().map(|c| c.0).collect();
        let seed = derive_session_seed(name, now, &members);

        let mut session = GameSession::new(
            name,
            room.capacity() as usize,
            self.config.game.clone(),
            seed,
            clock,
            self.results_tx.clone(),
        );
        if room.kind == RoomKind::Ai {
            session = session.with_ai(AiConfig::new(self.config.ai_difficulty, PaddleSide::Right));
        }
        session.start();
        room.session = Some(session);
    }

    // =========================================================================
    // INPUT
    // =========================================================================

    /// Hold a direction on a paddle the connection controls.
    pub fn move_paddle(
        &mut self,
        connection: ConnectionId,
        side: PaddleSide,
        direction: Direction,
    ) -> Result<(), HubError> {
        let name = self
            .registry
            .room_of(connection)
            .ok_or(HubError::NotInRoom)?
            .to_string();
        let room = self.registry.get_mut(&name).ok_or(HubError::NotInRoom)?;

        let binding = room.binding_of(connection).ok_or(HubError::NotInRoom)?;
        if !binding.controls(side) {
            return Err(HubError::NotYourPaddle(side));
        }

        let session = room.session.as_mut().ok_or(SessionError::NotRunning)?;
        session.move_paddle(side, direction)?;
        Ok(())
    }

    // =========================================================================
    // LEAVING
    // =========================================================================

    /// Explicit `leave_room`.
    pub fn leave(&mut self, connection: ConnectionId) {
        self.depart(connection, DepartReason::Leave);
    }

    fn depart(&mut self, connection: ConnectionId, reason: DepartReason) {
        let name = match self.registry.room_of(connection) {
            Some(name) => name.to_string(),
            None => return,
        };

        let running = self.registry.get(&name).map(Room::is_running).unwrap_or(false);
        let forfeit = if running {
            info!("{:?} forfeits in room {} ({:?})", connection, name, reason);
            self.forfeit(&name, connection)
        } else {
            debug!("{:?} leaves room {} ({:?})", connection, name, reason);
            None
        };

        // Bindings go first so the connection can never be rematched
        let departure = self.remove_from_room(connection);

        if let Some(Forfeit {
            winner_user,
            link: Some(TournamentLink { tournament_id, match_id: Some(match_id) }),
        }) = forfeit
        {
            self.finish_tournament_match(&name, tournament_id, match_id, winner_user);
        }

        if let Some(departure) = departure {
            self.after_departure(departure);
        }
    }

    fn remove_from_room(&mut self, connection: ConnectionId) -> Option<Departure> {
        let book = &self.tournaments;
        self.registry.remove_player(connection, |link| {
            link.is_lobby() && book.is_active(link.tournament_id)
        })
    }

    fn after_departure(&mut self, departure: Departure) {
        if let Some(link) = departure.tournament.filter(TournamentLink::is_lobby) {
            let tid = link.tournament_id;
            if self.tournaments.is_registering(tid) {
                if let Some(identity) = &departure.identity {
                    if let Err(e) = self.tournaments.withdraw(tid, &identity.user_id) {
                        warn!("Withdraw from tournament {} failed: {}", tid, e);
                    }
                }
            }
            if departure.room_deleted {
                // Lobby gone: nobody can take part any more
                if let Err(e) = self.tournaments.cancel(tid, &self.notices) {
                    warn!("Cancel of tournament {} failed: {}", tid, e);
                }
                self.flush_notices();
                self.tournaments.remove(tid);
            }
        }

        if !departure.room_deleted {
            self.announce_room(&departure.room);
        }
    }

    /// Stop the game and award it to the best remaining player.
    fn forfeit(&mut self, name: &str, leaver: ConnectionId) -> Option<Forfeit> {
        if let Some(session) = self.registry.get_mut(name).and_then(|r| r.session.as_mut()) {
            session.stop();
        }

        let room = self.registry.get(name)?;
        let game = room.session.as_ref()?.game();
        let link = room.tournament;

        let leaver_identity = room.identity_of(leaver).cloned();
        let leaver_side = match room.binding_of(leaver).and_then(|b| b.single()) {
            Some(side) => side,
            None => {
                info!("Local game in room {} abandoned", name);
                return None;
            }
        };

        let loser = PlayerResult {
            side: leaver_side,
            score: game.paddle(leaver_side).map(|p| p.score).unwrap_or(0),
            identity: leaver_identity.as_ref().map(|i| i.display_name.clone()),
        };

        let remaining: Vec<(PaddleSide, u32, Option<Identity>)> = game
            .paddles
            .iter()
            .filter(|p| room.connection_for(p.side) != Some(leaver))
            .map(|p| {
                let identity = room
                    .connection_for(p.side)
                    .and_then(|c| room.identity_of(c))
                    .cloned();
                (p.side, p.score, identity)
            })
            .collect();

        let top = remaining.iter().map(|(_, score, _)| *score).max()?;
        let leaders: Vec<&(PaddleSide, u32, Option<Identity>)> =
            remaining.iter().filter(|(_, score, _)| *score == top).collect();
        let draw = leaders.len() > 1;
        let winner = if draw { None } else { leaders.first().copied() };

        let leaver_name = loser.identity.clone().unwrap_or_else(|| format!("{:?}", leaver_side));
        let message = match winner {
            Some((side, _, identity)) => format!(
                "{} left the game; {} wins by forfeit",
                leaver_name,
                display_name(room.kind, *side, identity.as_ref())
            ),
            None => format!("{} left the game; remaining players are tied, no winner", leaver_name),
        };

        let info = GameFinishedInfo {
            room: name.to_string(),
            winner: winner.map(|(side, score, identity)| PlayerResult {
                side: *side,
                score: *score,
                identity: identity.as_ref().map(|i| i.display_name.clone()),
            }),
            loser,
            forfeit: true,
            draw,
            mode: room.kind,
            num_players: room.capacity(),
            message,
        };

        let record = match (winner, &leaver_identity) {
            (Some((_, score, Some(w))), Some(l)) if w.user_id != l.user_id => Some(MatchRecord {
                winner: w.user_id.clone(),
                loser: l.user_id.clone(),
                winner_score: *score,
                loser_score: info.loser.score,
                match_type: match_type(room),
            }),
            _ => None,
        };
        let winner_user = winner.and_then(|(_, _, identity)| identity.as_ref().map(|i| i.user_id.clone()));

        self.broadcast(name, ServerMessage::GameFinished(info));
        if let Some(record) = record {
            self.record(record);
        }

        Some(Forfeit { winner_user, link })
    }

    // =========================================================================
    // TICK & GAME END
    // =========================================================================

    /// Advance every running game by `dt` seconds and broadcast snapshots.
    pub fn tick(&mut self, dt: f64) {
        let clients = &self.clients;

        for room in self.registry.rooms_mut() {
            let session = match room.session.as_mut() {
                Some(s) if s.is_running() => s,
                _ => continue,
            };

            session.tick(dt);
            let snapshot = ServerMessage::GameState(session.snapshot());
            for member in room.members() {
                deliver(clients, *member, snapshot.clone());
            }
        }

        self.process_results();
    }

    /// Handle every game that ended since the last call.
    pub fn process_results(&mut self) {
        while let Ok(ended) = self.results_rx.try_recv() {
            self.on_session_ended(ended);
        }
    }

    #[instrument(skip(self, ended), fields(room = %ended.room))]
    fn on_session_ended(&mut self, ended: SessionEnded) {
        let room = match self.registry.get(&ended.room) {
            Some(room) => room,
            None => return,
        };
        let outcome = ended.outcome;

        let identity_of = |side: PaddleSide| {
            room.connection_for(side)
                .and_then(|c| room.identity_of(c))
                .cloned()
        };
        let winner_identity = identity_of(outcome.winner.side);
        let loser_identity = identity_of(outcome.loser.side);

        let info = GameFinishedInfo {
            room: room.name.clone(),
            winner: Some(PlayerResult {
                side: outcome.winner.side,
                score: outcome.winner.score,
                identity: winner_identity.as_ref().map(|i| i.display_name.clone()),
            }),
            loser: PlayerResult {
                side: outcome.loser.side,
                score: outcome.loser.score,
                identity: loser_identity.as_ref().map(|i| i.display_name.clone()),
            },
            forfeit: false,
            draw: false,
            mode: room.kind,
            num_players: room.capacity(),
            message: format!(
                "{} wins {}-{}",
                display_name(room.kind, outcome.winner.side, winner_identity.as_ref()),
                outcome.winner.score,
                outcome.loser.score
            ),
        };

        let record = match (&winner_identity, &loser_identity) {
            (Some(w), Some(l)) if w.user_id != l.user_id => Some(MatchRecord {
                winner: w.user_id.clone(),
                loser: l.user_id.clone(),
                winner_score: outcome.winner.score,
                loser_score: outcome.loser.score,
                match_type: match_type(room),
            }),
            _ => None,
        };
        let link = room.tournament;

        self.broadcast(&ended.room, ServerMessage::GameFinished(info));
        if let Some(record) = record {
            self.record(record);
        }

        if let Some(TournamentLink { tournament_id, match_id: Some(match_id) }) = link {
            let winner_user = winner_identity.map(|i| i.user_id);
            self.finish_tournament_match(&ended.room, tournament_id, match_id, winner_user);
        }
    }

    fn record(&self, record: MatchRecord) {
        if let Err(e) = self.services.recorder.record_match(record) {
            error!("Failed to record match: {}", e);
        }
    }

    // =========================================================================
    // TOURNAMENTS
    // =========================================================================

    fn start_tournament(&mut self, tid: Uuid, lobby: &str) {
        if let Some(room) = self.registry.get_mut(lobby) {
            room.locked = true;
        }

        let semis = match self.tournaments.generate_bracket(tid, &self.notices) {
            Ok(semis) => semis,
            Err(e) => {
                error!("Bracket for tournament {} failed: {}", tid, e);
                return;
            }
        };
        self.flush_notices();

        for semi in semis {
            self.start_tournament_match(tid, semi.id);
        }
    }

    /// Move both participants from the lobby into a fresh match room, or
    /// settle the match if someone is missing.
    fn start_tournament_match(&mut self, tid: Uuid, match_id: Uuid) {
        let participants = match self.tournaments.get(tid).and_then(|t| t.match_by_id(match_id)) {
            Some(m) => m.participants(),
            None => return,
        };
        let lobby = match self.registry.lobby_of(tid) {
            Some(lobby) => lobby.to_string(),
            None => {
                warn!("Tournament {} has no lobby", tid);
                return;
            }
        };

        let present: Vec<(String, ConnectionId)> = participants
            .into_iter()
            .filter_map(|user| {
                let conn = self.registry.connection_of_user(&lobby, &user)?;
                Some((user, conn))
            })
            .collect();

        match present.as_slice() {
            [_, _] => self.open_match_room(tid, match_id, &lobby, &present),
            [(walkover, _)] => {
                info!("{} wins match {} by walkover", walkover, match_id);
                let winner = walkover.clone();
                self.apply_tournament_result(tid, match_id, &winner);
            }
            _ => {
                if let Err(e) = self.tournaments.cancel_match(tid, match_id, &self.notices) {
                    error!("Cancel of match {} failed: {}", match_id, e);
                }
                self.flush_notices();
            }
        }
    }

    fn open_match_room(&mut self, tid: Uuid, match_id: Uuid, lobby: &str, players: &[(String, ConnectionId)]) {
        let name = match self.registry.create_room(2, RoomKind::Tournament) {
            Ok(name) => name,
            Err(e) => {
                error!("Could not open match room: {}", e);
                return;
            }
        };
        if let Some(room) = self.registry.get_mut(&name) {
            room.tournament = Some(TournamentLink {
                tournament_id: tid,
                match_id: Some(match_id),
            });
        }

        for (_, conn) in players {
            let identity = match self.registry.get(lobby).and_then(|r| r.identity_of(*conn)).cloned() {
                Some(identity) => identity,
                None => continue,
            };
            self.remove_from_room(*conn);
            if let Err(e) = self.registry.join_room(&name, *conn, identity) {
                error!("Could not seat {:?} in match room {}: {}", conn, name, e);
            }
        }

        if let Some(room) = self.registry.get_mut(&name) {
            room.locked = true;
        }
        info!("Tournament {} match {} in room {}", tid, match_id, name);

        self.announce_room(lobby);
        self.announce_room(&name);
        self.start_session(&name);
    }

    /// Everyone left in a finished match room goes back to the lobby, then
    /// the result is applied.
    fn finish_tournament_match(&mut self, room: &str, tid: Uuid, match_id: Uuid, winner: Option<String>) {
        let members: Vec<(ConnectionId, Identity)> = match self.registry.get(room) {
            Some(r) => r
                .members()
                .iter()
                .filter_map(|c| r.identity_of(*c).cloned().map(|i| (*c, i)))
                .collect(),
            None => Vec::new(),
        };
        self.registry.delete_room(room);

        match self.registry.lobby_of(tid).map(str::to_string) {
            Some(lobby) => {
                for (conn, identity) in members {
                    if let Err(e) = self.registry.return_to_room(&lobby, conn, identity) {
                        warn!("Could not return {:?} to lobby: {}", conn, e);
                    }
                }
                self.announce_room(&lobby);
            }
            None => warn!("Tournament {} lobby is gone", tid),
        }

        match winner {
            Some(winner) => self.apply_tournament_result(tid, match_id, &winner),
            None => {
                error!("Match {} of tournament {} ended without a winner", match_id, tid);
            }
        }
    }

    fn apply_tournament_result(&mut self, tid: Uuid, match_id: Uuid, winner: &str) {
        let applied = self.tournaments.record_result(tid, match_id, winner, &self.notices);
        self.flush_notices();

        match applied {
            Ok(applied) => {
                if let Some(final_id) = applied.final_ready {
                    self.start_tournament_match(tid, final_id);
                }
                if let Some(champion) = applied.champion {
                    info!("Tournament {} won by {}", tid, champion);
                }
            }
            Err(e) => debug!("Result not applied: {}", e),
        }
    }

    /// Deliver queued tournament notifications to their audience and pass
    /// them on to the external publisher.
    fn flush_notices(&self) {
        for publication in self.notices.drain() {
            let recipients: Vec<ConnectionId> = match &publication.scope {
                PublishScope::Tournament(tid) => self
                    .tournaments
                    .get(*tid)
                    .map(|t| {
                        t.participants
                            .iter()
                            .filter_map(|u| self.registry.find_user(u))
                            .collect()
                    })
                    .unwrap_or_default(),
                PublishScope::Participants(users) => users
                    .iter()
                    .filter_map(|u| self.registry.find_user(u))
                    .collect(),
                PublishScope::Global => self.clients.keys().copied().collect(),
            };

            let msg = ServerMessage::Tournament {
                event: publication.event.clone(),
                payload: publication.payload.clone(),
            };
            for conn in recipients {
                self.send(conn, msg.clone());
            }

            self.services
                .publisher
                .publish(&publication.event, publication.payload, publication.scope);
        }
    }

    // =========================================================================
    // OUTBOUND
    // =========================================================================

    fn send(&self, connection: ConnectionId, msg: ServerMessage) {
        deliver(&self.clients, connection, msg);
    }

    fn broadcast(&self, room: &str, msg: ServerMessage) {
        if let Some(room) = self.registry.get(room) {
            for member in room.members() {
                self.send(*member, msg.clone());
            }
        }
    }

    /// Tell every client the server is going away and stop all games.
    pub fn shutdown(&mut self, reason: &str) {
        for room in self.registry.rooms_mut() {
            if let Some(session) = room.session.as_mut() {
                session.stop();
            }
        }
        for conn in self.clients.keys() {
            self.send(*conn, ServerMessage::Shutdown { reason: reason.to_string() });
        }
        info!("Hub shut down: {}", reason);
    }

    // =========================================================================
    // ACCESSORS
    // =========================================================================

    /// Room registry.
    pub fn registry(&self) -> &RoomRegistry {
        &self.registry
    }

    /// Mutable room registry.
    pub fn registry_mut(&mut self) -> &mut RoomRegistry {
        &mut self.registry
    }

    /// Tournament book.
    pub fn tournaments(&self) -> &TournamentBook {
        &self.tournaments
    }

    /// Connected clients.
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }
}

/// Queue a message without waiting; a full or closed channel drops it.
fn deliver(clients: &BTreeMap<ConnectionId, ClientSender>, connection: ConnectionId, msg: ServerMessage) {
    let sender = match clients.get(&connection) {
        Some(sender) => sender,
        None => return,
    };
    match sender.try_send(msg) {
        Ok(()) => {}
        Err(TrySendError::Full(_)) => warn!("Outbound queue full for {:?}, dropping message", connection),
        Err(TrySendError::Closed(_)) => debug!("{:?} outbound channel closed", connection),
    }
}

fn match_type(room: &Room) -> MatchType {
    if room.tournament.is_some() {
        MatchType::Tournament
    } else if room.capacity() == 4 {
        MatchType::FourPlayer
    } else {
        MatchType::OneVsOne
    }
}

fn display_name(kind: RoomKind, side: PaddleSide, identity: Option<&Identity>) -> String {
    match identity {
        Some(identity) => identity.display_name.clone(),
        None if kind == RoomKind::Ai => "AI".to_string(),
        None => format!("{:?}", side),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::ManualClock;
    use crate::services::{IdentityDirectory, InMemoryRecorder, LogPublisher};

    struct Harness {
        hub: GameHub,
        directory: Arc<IdentityDirectory>,
        recorder: Arc<InMemoryRecorder>,
        clock: Arc<ManualClock>,
        inboxes: BTreeMap<ConnectionId, mpsc::Receiver<ServerMessage>>,
    }

    impl Harness {
        fn new() -> Self {
            let directory = Arc::new(IdentityDirectory::new());
            let recorder = Arc::new(InMemoryRecorder::new());
            let clock = ManualClock::new(1_000);
            let services = HubServices {
                identities: directory.clone(),
                recorder: recorder.clone(),
                publisher: Arc::new(LogPublisher),
                clock: clock.clone(),
            };
            Self {
                hub: GameHub::new(services, HubConfig::default()),
                directory,
                recorder,
                clock,
                inboxes: BTreeMap::new(),
            }
        }

        fn connect(&mut self, id: u64, user: Option<&str>) -> ConnectionId {
            let conn = ConnectionId(id);
            let (tx, rx) = mpsc::channel(4096);
            self.hub.connect(conn, tx);
            if let Some(user) = user {
                self.directory.bind(conn, Identity::new(user, user.to_uppercase()));
            }
            self.inboxes.insert(conn, rx);
            conn
        }

        fn drain(&mut self, conn: ConnectionId) -> Vec<ServerMessage> {
            let mut out = Vec::new();
            if let Some(rx) = self.inboxes.get_mut(&conn) {
                while let Ok(msg) = rx.try_recv() {
                    out.push(msg);
                }
            }
            out
        }

        fn join(&mut self, conn: ConnectionId, capacity: u8, kind: RoomKind) {
            self.hub.handle_message(
                conn,
                ClientMessage::JoinRoom(JoinRequest { capacity, kind, room_name: None }),
            );
        }
    }

    fn errors(msgs: &[ServerMessage]) -> Vec<ErrorCode> {
        msgs.iter()
            .filter_map(|m| match m {
                ServerMessage::Error(e) => Some(e.code),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_join_requires_identity() {
        let mut h = Harness::new();
        let a = h.connect(1, None);
        h.join(a, 2, RoomKind::Online);
        assert_eq!(errors(&h.drain(a)), vec![ErrorCode::NotAuthenticated]);
        assert!(h.hub.registry().room_of(a).is_none());
    }

    #[test]
    fn test_invalid_capacity() {
        let mut h = Harness::new();
        let a = h.connect(1, Some("ann"));
        h.join(a, 3, RoomKind::Online);
        assert_eq!(errors(&h.drain(a)), vec![ErrorCode::InvalidInput]);
    }

    #[test]
    fn test_duplicate_user_rejected() {
        let mut h = Harness::new();
        let a = h.connect(1, Some("ann"));
        let a2 = h.connect(2, Some("ann"));
        h.join(a, 2, RoomKind::Online);
        h.join(a2, 2, RoomKind::Online);
        assert_eq!(errors(&h.drain(a2)), vec![ErrorCode::UserAlreadyConnected]);
        assert!(h.hub.registry().room_of(a2).is_none());
    }

    #[test]
    fn test_unknown_side_and_direction() {
        let mut h = Harness::new();
        let a = h.connect(1, Some("ann"));
        let b = h.connect(2, Some("bob"));
        h.join(a, 2, RoomKind::Online);
        h.join(b, 2, RoomKind::Online);
        h.drain(a);

        let msg = ClientMessage::from_json(
            r#"{"type":"move_paddle","player":"LEFT","direction":"sideways"}"#,
        )
        .unwrap();
        h.hub.handle_message(a, msg);
        assert_eq!(errors(&h.drain(a)), vec![ErrorCode::InvalidDirection]);

        let msg = ClientMessage::from_json(
            r#"{"type":"move_paddle","player":"MIDDLE","direction":"up"}"#,
        )
        .unwrap();
        h.hub.handle_message(a, msg);
        assert_eq!(errors(&h.drain(a)), vec![ErrorCode::InvalidPaddle]);

        // Bad input is not a forfeit
        let room = h.hub.registry().room_of(a).unwrap().to_string();
        assert!(h.hub.registry().get(&room).unwrap().is_running());
    }

    #[test]
    fn test_room_joined_and_start_when_full() {
        let mut h = Harness::new();
        let a = h.connect(1, Some("ann"));
        let b = h.connect(2, Some("bob"));
        h.join(a, 2, RoomKind::Online);

        let msgs = h.drain(a);
        assert!(matches!(&msgs[0], ServerMessage::RoomJoined(info) if info.max_players == 2));
        let room = h.hub.registry().room_of(a).unwrap().to_string();
        assert!(!h.hub.registry().get(&room).unwrap().is_started());

        h.join(b, 2, RoomKind::Online);
        assert!(h.hub.registry().get(&room).unwrap().is_running());

        let joined: Vec<_> = h
            .drain(b)
            .into_iter()
            .filter_map(|m| match m {
                ServerMessage::RoomJoined(info) => Some(info),
                _ => None,
            })
            .collect();
        assert_eq!(joined[0].players.len(), 2);
        assert_eq!(
            joined[0].paddle,
            crate::network::room::PaddleBinding::Single(PaddleSide::Right)
        );
    }

    #[test]
    fn test_move_paddle_checks_binding() {
        let mut h = Harness::new();
        let a = h.connect(1, Some("ann"));
        let b = h.connect(2, Some("bob"));

        assert!(matches!(
            h.hub.move_paddle(a, PaddleSide::Left, Direction::Up),
            Err(HubError::NotInRoom)
        ));

        h.join(a, 2, RoomKind::Online);
        assert_eq!(
            h.hub.move_paddle(a, PaddleSide::Left, Direction::Up).unwrap_err().code(),
            ErrorCode::GameNotRunning
        );

        h.join(b, 2, RoomKind::Online);
        assert!(h.hub.move_paddle(a, PaddleSide::Left, Direction::Up).is_ok());
        assert_eq!(
            h.hub.move_paddle(a, PaddleSide::Right, Direction::Up).unwrap_err().code(),
            ErrorCode::InvalidPaddle
        );
        assert_eq!(
            h.hub.move_paddle(b, PaddleSide::Right, Direction::Left).unwrap_err().code(),
            ErrorCode::InvalidDirection
        );
    }

    #[test]
    fn test_ai_room_starts_immediately() {
        let mut h = Harness::new();
        let a = h.connect(1, Some("ann"));
        h.join(a, 2, RoomKind::Ai);
        let room = h.hub.registry().room_of(a).unwrap().to_string();
        let room = h.hub.registry().get(&room).unwrap();
        assert!(room.is_running());
        assert!(room.session.as_ref().unwrap().game().ai.is_some());
    }

    #[test]
    fn test_leave_outside_game_is_plain_leave() {
        let mut h = Harness::new();
        let a = h.connect(1, Some("ann"));
        h.join(a, 2, RoomKind::Online);
        h.hub.handle_message(a, ClientMessage::LeaveRoom);
        assert!(h.hub.registry().is_empty());
        assert!(h.recorder.records().is_empty());
    }

    #[test]
    fn test_ping_pong() {
        let mut h = Harness::new();
        let a = h.connect(1, None);
        h.clock.set(5_000);
        h.hub.handle_message(a, ClientMessage::Ping { timestamp: 42 });
        assert_eq!(
            h.drain(a),
            vec![ServerMessage::Pong { timestamp: 42, server_time: 5_000 }]
        );
    }

    #[test]
    fn test_forfeit_two_players() {
        let mut h = Harness::new();
        let a = h.connect(1, Some("ann"));
        let b = h.connect(2, Some("bob"));
        h.join(a, 2, RoomKind::Online);
        h.join(b, 2, RoomKind::Online);

        let room = h.hub.registry().room_of(a).unwrap().to_string();
        if let Some(session) = h.hub.registry_mut().get_mut(&room).and_then(|r| r.session.as_mut()) {
            session.game_mut().paddles[0].score = 3;
            session.game_mut().paddles[1].score = 1;
        }
        h.drain(b);

        h.hub.disconnect(a);

        let finished: Vec<_> = h
            .drain(b)
            .into_iter()
            .filter_map(|m| match m {
                ServerMessage::GameFinished(info) => Some(info),
                _ => None,
            })
            .collect();
        assert_eq!(finished.len(), 1);
        let info = &finished[0];
        assert!(info.forfeit);
        assert!(!info.draw);
        assert_eq!(info.winner.as_ref().unwrap().side, PaddleSide::Right);
        assert_eq!(info.loser.side, PaddleSide::Left);
        assert_eq!(info.loser.score, 3);

        let records = h.recorder.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].winner, "bob");
        assert_eq!(records[0].loser, "ann");
        assert_eq!(records[0].winner_score, 1);
        assert_eq!(records[0].loser_score, 3);
        assert_eq!(records[0].match_type, MatchType::OneVsOne);

        // The leaver can never be rematched
        assert!(h.hub.registry().room_of(a).is_none());
        assert!(!h.hub.registry().get(&room).unwrap().is_running());
    }
}
