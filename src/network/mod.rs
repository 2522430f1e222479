//! Network Layer
//!
//! WebSocket transport, wire protocol, rooms and sessions. Everything here
//! runs on wall-clock time; the physics lives in `game/`.

pub mod auth;
pub mod protocol;
pub mod session;
pub mod room;
pub mod hub;
pub mod server;

pub use auth::{AuthConfig, AuthError};
pub use protocol::{
    ClientMessage, ServerMessage, JoinRequest, GameStateUpdate, GameFinishedInfo,
    PlayerResult, ErrorCode,
};
pub use session::{GameSession, SessionState, SessionEnded, SessionError};
pub use room::{PaddleBinding, Room, RoomError, RoomKind, RoomRegistry, TournamentLink};
pub use hub::{GameHub, HubConfig, HubError, HubServices};
pub use server::{GameServer, ServerConfig, GameServerError, ReactorEvent};
