//! Room Registry
//!
//! Creates and destroys rooms, matches connections to an open room or
//! spawns one, and tracks membership, paddle bindings and identities.
//! Owned by the hub; nothing else touches the room set.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::game::state::PaddleSide;
use crate::network::protocol::{ErrorCode, PlayerSummary};
use crate::network::session::GameSession;
use crate::services::{ConnectionId, Identity};

/// What a room is for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomKind {
    /// Matchmade game between remote players.
    #[default]
    Online,
    /// One connection plays every paddle.
    Local,
    /// One human against the AI.
    Ai,
    /// Tournament lobby or tournament match.
    Tournament,
}

/// Paddles a connection controls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PaddleBinding {
    /// One paddle.
    Single(PaddleSide),
    /// Every paddle (local games).
    All(Vec<PaddleSide>),
}

impl PaddleBinding {
    /// Whether `side` is covered.
    pub fn controls(&self, side: PaddleSide) -> bool {
        match self {
            PaddleBinding::Single(s) => *s == side,
            PaddleBinding::All(sides) => sides.contains(&side),
        }
    }

    /// The side, if exactly one.
    pub fn single(&self) -> Option<PaddleSide> {
        match self {
            PaddleBinding::Single(s) => Some(*s),
            PaddleBinding::All(_) => None,
        }
    }
}

/// Link between a room and a tournament.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TournamentLink {
    /// Tournament.
    pub tournament_id: Uuid,
    /// Match played here; `None` for the lobby.
    pub match_id: Option<Uuid>,
}

impl TournamentLink {
    /// True for the tournament's lobby room.
    pub fn is_lobby(&self) -> bool {
        self.match_id.is_none()
    }
}

/// Room errors.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum RoomError {
    /// Unknown room name.
    #[error("room {0} not found")]
    NotFound(String),

    /// No free seat.
    #[error("room {0} is full")]
    Full(String),

    /// Connection is already seated somewhere.
    #[error("{0:?} is already in room {1}")]
    AlreadySeated(ConnectionId, String),

    /// Capacity other than 2 or 4.
    #[error("unsupported capacity {0}")]
    InvalidCapacity(u8),
}

impl RoomError {
    /// Wire code reported to the client.
    pub fn code(&self) -> ErrorCode {
        match self {
            RoomError::NotFound(_) => ErrorCode::RoomNotFound,
            RoomError::Full(_) => ErrorCode::RoomFull,
            RoomError::AlreadySeated(..) => ErrorCode::UserAlreadyConnected,
            RoomError::InvalidCapacity(_) => ErrorCode::InvalidInput,
        }
    }
}

// =============================================================================
// ROOM
// =============================================================================

/// A room.
pub struct Room {
    /// Unique name.
    pub name: String,
    /// Paddles in the game (2 or 4); never changes.
    capacity: u8,
    /// Purpose.
    pub kind: RoomKind,
    /// Members in arrival order.
    members: Vec<ConnectionId>,
    /// Paddle -> connection.
    paddles: BTreeMap<PaddleSide, ConnectionId>,
    /// Connection -> identity.
    identities: BTreeMap<ConnectionId, Identity>,
    /// Game, once started.
    pub session: Option<GameSession>,
    /// Tournament this room belongs to.
    pub tournament: Option<TournamentLink>,
    /// Closed to matchmaking (e.g. tournament lobby after the draw).
    pub locked: bool,
    /// When the room was created.
    pub created_at: DateTime<Utc>,
}

impl Room {
    fn new(capacity: u8, kind: RoomKind) -> Self {
        Self {
            name: Uuid::new_v4().to_string(),
            capacity,
            kind,
            members: Vec::new(),
            paddles: BTreeMap::new(),
            identities: BTreeMap::new(),
            session: None,
            tournament: None,
            locked: false,
            created_at: Utc::now(),
        }
    }

    /// Paddles in the game.
    pub fn capacity(&self) -> u8 {
        self.capacity
    }

    /// Connections the room seats: one for local and AI rooms.
    pub fn seats(&self) -> usize {
        match self.kind {
            RoomKind::Local | RoomKind::Ai => 1,
            RoomKind::Online | RoomKind::Tournament => self.capacity as usize,
        }
    }

    /// No free seat.
    pub fn is_full(&self) -> bool {
        self.members.len() >= self.seats()
    }

    /// A game has been created in this room.
    pub fn is_started(&self) -> bool {
        self.session.is_some()
    }

    /// A game is running right now.
    pub fn is_running(&self) -> bool {
        self.session.as_ref().map(|s| s.is_running()).unwrap_or(false)
    }

    /// Members in arrival order.
    pub fn members(&self) -> &[ConnectionId] {
        &self.members
    }

    /// True if nobody is seated.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Identity of a member.
    pub fn identity_of(&self, connection: ConnectionId) -> Option<&Identity> {
        self.identities.get(&connection)
    }

    /// Member controlling `side`.
    pub fn connection_for(&self, side: PaddleSide) -> Option<ConnectionId> {
        self.paddles.get(&side).copied()
    }

    /// Paddle(s) a member controls.
    pub fn binding_of(&self, connection: ConnectionId) -> Option<PaddleBinding> {
        if !self.members.contains(&connection) {
            return None;
        }
        let sides: Vec<PaddleSide> = self
            .paddles
            .iter()
            .filter(|(_, c)| **c == connection)
            .map(|(s, _)| *s)
            .collect();

        match (self.kind, sides.as_slice()) {
            (RoomKind::Local, _) => Some(PaddleBinding::All(sides)),
            (_, [side]) => Some(PaddleBinding::Single(*side)),
            _ => None,
        }
    }

    /// Everyone seated, for `room_joined`.
    pub fn player_summaries(&self) -> Vec<PlayerSummary> {
        self.members
            .iter()
            .filter_map(|c| {
                let identity = self.identities.get(c)?;
                let paddle = self.binding_of(*c)?;
                Some(PlayerSummary {
                    name: identity.display_name.clone(),
                    paddle,
                })
            })
            .collect()
    }

    /// Bind the next free paddle(s) to a new member.
    fn assign_paddle(&mut self, connection: ConnectionId) -> PaddleBinding {
        let order = PaddleSide::order_for(self.capacity as usize);

        match self.kind {
            RoomKind::Local => {
                for side in order {
                    self.paddles.insert(*side, connection);
                }
                let mut sides = order.to_vec();
                sides.sort();
                PaddleBinding::All(sides)
            }
            RoomKind::Ai => {
                self.paddles.insert(PaddleSide::Left, connection);
                PaddleBinding::Single(PaddleSide::Left)
            }
            RoomKind::Online | RoomKind::Tournament => {
                // Seats are checked before this runs, so a side is free
                let side = order
                    .iter()
                    .copied()
                    .find(|s| !self.paddles.contains_key(s))
                    .unwrap_or(order[0]);
                self.paddles.insert(side, connection);
                PaddleBinding::Single(side)
            }
        }
    }

    fn seat(&mut self, connection: ConnectionId, identity: Identity) -> PaddleBinding {
        self.members.push(connection);
        self.identities.insert(connection, identity);
        self.assign_paddle(connection)
    }

    fn unseat(&mut self, connection: ConnectionId) -> Option<Identity> {
        self.members.retain(|c| *c != connection);
        self.paddles.retain(|_, c| *c != connection);
        self.identities.remove(&connection)
    }
}

// =============================================================================
// REGISTRY
// =============================================================================

/// What `remove_player` did.
#[derive(Debug, Clone, PartialEq)]
pub struct Departure {
    /// Room left.
    pub room: String,
    /// Identity the connection had there.
    pub identity: Option<Identity>,
    /// The room was deleted because it became empty.
    pub room_deleted: bool,
    /// Tournament link of the room left.
    pub tournament: Option<TournamentLink>,
}

/// All rooms.
#[derive(Default)]
pub struct RoomRegistry {
    /// Rooms by name.
    rooms: BTreeMap<String, Room>,
    /// Connection -> room name.
    by_connection: BTreeMap<ConnectionId, String>,
}

impl RoomRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty room and return its name.
    pub fn create_room(&mut self, capacity: u8, kind: RoomKind) -> Result<String, RoomError> {
        if capacity != 2 && capacity != 4 {
            return Err(RoomError::InvalidCapacity(capacity));
        }
        let room = Room::new(capacity, kind);
        let name = room.name.clone();
        info!("Created {:?} room {} (capacity {})", kind, name, capacity);
        self.rooms.insert(name.clone(), room);
        Ok(name)
    }

    /// An open room of this capacity and kind, or a new one.
    ///
    /// Open means not full, not started, not locked. Local and AI rooms are
    /// never shared.
    pub fn find_or_create_room(&mut self, capacity: u8, kind: RoomKind) -> Result<String, RoomError> {
        let shareable = matches!(kind, RoomKind::Online | RoomKind::Tournament);

        if shareable {
            let open = self.rooms.values().find(|r| {
                r.kind == kind
                    && r.capacity == capacity
                    && !r.is_full()
                    && !r.is_started()
                    && !r.locked
            });
            if let Some(room) = open {
                debug!("Matched into open room {}", room.name);
                return Ok(room.name.clone());
            }
        }

        self.create_room(capacity, kind)
    }

    /// Seat a connection in a named room and bind its paddle.
    pub fn join_room(
        &mut self,
        name: &str,
        connection: ConnectionId,
        identity: Identity,
    ) -> Result<PaddleBinding, RoomError> {
        if let Some(current) = self.by_connection.get(&connection) {
            return Err(RoomError::AlreadySeated(connection, current.clone()));
        }

        let room = self
            .rooms
            .get_mut(name)
            .ok_or_else(|| RoomError::NotFound(name.to_string()))?;

        if room.is_full() || room.is_started() || room.locked {
            return Err(RoomError::Full(name.to_string()));
        }

        let binding = room.seat(connection, identity);
        self.by_connection.insert(connection, name.to_string());

        debug!("{:?} joined {} as {:?}", connection, name, binding);
        Ok(binding)
    }

    /// Seat a connection back in a locked room it belongs to (a tournament
    /// lobby after a match). Only the seat count is checked.
    pub fn return_to_room(
        &mut self,
        name: &str,
        connection: ConnectionId,
        identity: Identity,
    ) -> Result<PaddleBinding, RoomError> {
        if let Some(current) = self.by_connection.get(&connection) {
            return Err(RoomError::AlreadySeated(connection, current.clone()));
        }

        let room = self
            .rooms
            .get_mut(name)
            .ok_or_else(|| RoomError::NotFound(name.to_string()))?;

        if room.is_full() {
            return Err(RoomError::Full(name.to_string()));
        }

        let binding = room.seat(connection, identity);
        self.by_connection.insert(connection, name.to_string());
        Ok(binding)
    }

    /// Tear down a connection's membership, paddle and identity bindings.
    ///
    /// The room is deleted once empty, unless `keep_empty` says its
    /// tournament link still needs it.
    pub fn remove_player(
        &mut self,
        connection: ConnectionId,
        keep_empty: impl Fn(&TournamentLink) -> bool,
    ) -> Option<Departure> {
        let name = self.by_connection.remove(&connection)?;
        let room = self.rooms.get_mut(&name)?;

        let identity = room.unseat(connection);
        let tournament = room.tournament;
        let keep = tournament.as_ref().map(&keep_empty).unwrap_or(false);
        let room_deleted = room.is_empty() && !keep;

        if room_deleted {
            if let Some(mut room) = self.rooms.remove(&name) {
                if let Some(session) = room.session.as_mut() {
                    session.stop();
                }
            }
            info!("Deleted empty room {}", name);
        }

        Some(Departure {
            room: name,
            identity,
            room_deleted,
            tournament,
        })
    }

    /// Delete a room outright, returning its members.
    pub fn delete_room(&mut self, name: &str) -> Vec<ConnectionId> {
        match self.rooms.remove(name) {
            Some(room) => {
                for c in &room.members {
                    self.by_connection.remove(c);
                }
                info!("Deleted room {}", name);
                room.members
            }
            None => Vec::new(),
        }
    }

    /// Room a connection is seated in.
    pub fn room_of(&self, connection: ConnectionId) -> Option<&str> {
        self.by_connection.get(&connection).map(String::as_str)
    }

    /// Whether a user is seated in any room.
    pub fn identity_in_use(&self, user_id: &str) -> bool {
        self.rooms
            .values()
            .any(|r| r.identities.values().any(|i| i.user_id == user_id))
    }

    /// Connection of a user inside one room.
    pub fn connection_of_user(&self, room: &str, user_id: &str) -> Option<ConnectionId> {
        self.rooms.get(room)?.identities.iter().find_map(|(c, i)| {
            if i.user_id == user_id {
                Some(*c)
            } else {
                None
            }
        })
    }

    /// Connection of a user in any room.
    pub fn find_user(&self, user_id: &str) -> Option<ConnectionId> {
        self.rooms
            .keys()
            .find_map(|name| self.connection_of_user(name, user_id))
    }

    /// The lobby room of a tournament.
    pub fn lobby_of(&self, tournament_id: Uuid) -> Option<&str> {
        self.rooms
            .values()
            .find(|r| {
                r.tournament
                    .map(|l| l.tournament_id == tournament_id && l.is_lobby())
                    .unwrap_or(false)
            })
            .map(|r| r.name.as_str())
    }

    /// Room by name.
    pub fn get(&self, name: &str) -> Option<&Room> {
        self.rooms.get(name)
    }

    /// Mutable room by name.
    pub fn get_mut(&mut self, name: &str) -> Option<&mut Room> {
        self.rooms.get_mut(name)
    }

    /// Iterate rooms.
    pub fn rooms(&self) -> impl Iterator<Item = &Room> {
        self.rooms.values()
    }

    /// Iterate rooms mutably.
    pub fn rooms_mut(&mut self) -> impl Iterator<Item = &mut Room> {
        self.rooms.values_mut()
    }

    /// Number of rooms.
    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    /// True if no rooms exist.
    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }
}
