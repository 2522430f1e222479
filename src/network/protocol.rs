//! Protocol Messages
//!
//! Wire format for client-server communication over WebSocket.
//! All messages are JSON with a `type` tag; per-tick snapshots can also be
//! sent as bincode when the server is configured for binary snapshots.

use serde::{Serialize, Deserialize};

use crate::game::ai::Difficulty;
use crate::game::input::Direction;
use crate::game::state::{GameState, PaddleSide};
use crate::network::room::{PaddleBinding, RoomKind};

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from client to server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Authenticate with a JWT.
    Auth(AuthRequest),

    /// Join or create a room.
    JoinRoom(JoinRequest),

    /// Hold a direction on a paddle (`stop` releases it).
    MovePaddle(MoveRequest),

    /// Leave the current room.
    LeaveRoom,

    /// Ping for latency measurement.
    Ping {
        /// Client timestamp, echoed back.
        timestamp: u64,
    },
}

/// Authentication request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthRequest {
    /// JWT issued by the identity service.
    pub token: String,
}

/// Room join request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinRequest {
    /// Paddles in the game (2 or 4).
    pub capacity: u8,
    /// Room kind.
    #[serde(default)]
    pub kind: RoomKind,
    /// Join this room instead of matchmaking.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_name: Option<String>,
}

/// Paddle move request.
///
/// Both fields stay raw so an unknown side or direction reaches the hub
/// and is rejected with its own error code instead of failing the parse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoveRequest {
    /// Paddle to move (`LEFT`, `RIGHT`, `TOP`, `DOWN`).
    pub player: String,
    /// Direction held (`up`, `down`, `left`, `right`, `stop`).
    pub direction: String,
}

impl MoveRequest {
    /// Request for a known side and direction.
    pub fn new(side: PaddleSide, direction: Direction) -> Self {
        Self {
            player: side.as_str().to_string(),
            direction: direction.as_str().to_string(),
        }
    }

    /// Requested side, or the raw value if unknown.
    pub fn side(&self) -> Result<PaddleSide, String> {
        self.player.parse()
    }

    /// Requested direction, or the raw value if unknown.
    pub fn direction(&self) -> Result<Direction, String> {
        self.direction.parse()
    }
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from server to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Authentication result.
    AuthResult(AuthResult),

    /// Room membership changed; sent to every member with their own paddle.
    RoomJoined(RoomJoinedInfo),

    /// Snapshot of the game (every tick).
    GameState(GameStateUpdate),

    /// Game over, by score or forfeit.
    GameFinished(GameFinishedInfo),

    /// Tournament notification.
    Tournament {
        /// `match_ready`, `match_finished`, `tournament_completed`, ...
        event: String,
        /// Event body.
        payload: serde_json::Value,
    },

    /// Pong response.
    Pong {
        /// Client timestamp.
        timestamp: u64,
        /// Server time in ms.
        server_time: u64,
    },

    /// Error message.
    Error(ServerError),

    /// Server is shutting down.
    Shutdown {
        /// Reason.
        reason: String,
    },
}

/// Authentication result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthResult {
    /// Whether auth succeeded.
    pub success: bool,
    /// User id if successful.
    pub user_id: Option<String>,
    /// Display name if successful.
    pub display_name: Option<String>,
    /// Error message if failed.
    pub error: Option<String>,
    /// Server version.
    pub server_version: String,
}

/// A room member as seen by other members.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerSummary {
    /// Display name.
    pub name: String,
    /// Paddle(s) controlled.
    pub paddle: PaddleBinding,
}

/// Reply to `join_room`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomJoinedInfo {
    /// Room name.
    pub room: String,
    /// Paddle(s) the recipient controls.
    pub paddle: PaddleBinding,
    /// Members in arrival order.
    pub players: Vec<PlayerSummary>,
    /// Seats in the room.
    pub max_players: u8,
    /// Room kind.
    pub kind: RoomKind,
}

/// Paddle in a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaddleView {
    /// Side.
    pub side: PaddleSide,
    /// Top-left x.
    pub x: f64,
    /// Top-left y.
    pub y: f64,
    /// Width.
    pub width: f64,
    /// Height.
    pub height: f64,
    /// Score.
    pub score: u32,
    /// Still in play.
    pub active: bool,
}

/// Ball in a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BallView {
    /// Center x.
    pub x: f64,
    /// Center y.
    pub y: f64,
    /// Velocity x.
    pub vx: f64,
    /// Velocity y.
    pub vy: f64,
    /// Radius.
    pub radius: f64,
}

/// AI counters, for tuning dashboards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiView {
    /// Side the AI plays.
    pub side: PaddleSide,
    /// Preset.
    pub difficulty: Difficulty,
    /// Decisions taken.
    pub decisions: u32,
    /// Decisions off by more than half a paddle.
    pub errors: u32,
    /// Panic decisions.
    pub panics: u32,
    /// errors / decisions.
    pub error_rate: f64,
}

/// Full game snapshot broadcast every tick.
///
/// Flat on purpose: bincode cannot encode the tagged `ServerMessage`, so
/// binary snapshots carry this struct directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameStateUpdate {
    /// Room name.
    pub room: String,
    /// Physics steps taken.
    pub tick: u64,
    /// Canvas width.
    pub width: f64,
    /// Canvas height.
    pub height: f64,
    /// Paddles in canonical order.
    pub paddles: Vec<PaddleView>,
    /// Ball.
    pub ball: BallView,
    /// Score needed to win.
    pub win_score: u32,
    /// Game running.
    pub running: bool,
    /// Whole seconds until the first serve.
    pub countdown: u32,
    /// AI counters, if an AI plays.
    pub ai: Option<AiView>,
}

impl GameStateUpdate {
    /// Build a snapshot of `state` for `room`.
    pub fn capture(room: &str, state: &GameState) -> Self {
        Self {
            room: room.to_string(),
            tick: state.tick,
            width: state.canvas.width,
            height: state.canvas.height,
            paddles: state
                .paddles
                .iter()
                .map(|p| PaddleView {
                    side: p.side,
                    x: p.position.x,
                    y: p.position.y,
                    width: p.width,
                    height: p.height,
                    score: p.score,
                    active: p.active,
                })
                .collect(),
            ball: BallView {
                x: state.ball.position.x,
                y: state.ball.position.y,
                vx: state.ball.velocity.x,
                vy: state.ball.velocity.y,
                radius: state.ball.radius,
            },
            win_score: state.win_score,
            running: state.running,
            countdown: state.countdown,
            ai: state.ai.as_ref().map(|ai| AiView {
                side: ai.side,
                difficulty: ai.difficulty,
                decisions: ai.decisions,
                errors: ai.errors,
                panics: ai.panics,
                error_rate: ai.error_rate(),
            }),
        }
    }

    /// Serialize to bincode.
    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    /// Deserialize from bincode.
    pub fn from_bytes(data: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(data)
    }
}

/// One side of a finished game.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerResult {
    /// Paddle side.
    pub side: PaddleSide,
    /// Final score.
    pub score: u32,
    /// Display name, if a human played it.
    pub identity: Option<String>,
}

/// Game over notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameFinishedInfo {
    /// Room name.
    pub room: String,
    /// Winner; `None` on a draw.
    pub winner: Option<PlayerResult>,
    /// Loser (the leaver on a forfeit).
    pub loser: PlayerResult,
    /// Ended because a player left.
    pub forfeit: bool,
    /// Remaining players tied on a forfeit.
    pub draw: bool,
    /// Room kind.
    pub mode: RoomKind,
    /// Paddles in the game.
    pub num_players: u8,
    /// Human readable summary.
    pub message: String,
}

/// Error message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerError {
    /// Error code.
    pub code: ErrorCode,
    /// Human readable message.
    pub message: String,
}

/// Error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Identity already bound in some room.
    UserAlreadyConnected,
    /// No such room, or not in a room.
    RoomNotFound,
    /// Paddle not bound to this connection.
    InvalidPaddle,
    /// Direction does not fit the paddle's axis.
    InvalidDirection,
    /// No game running in the room.
    GameNotRunning,
    /// Connection has not authenticated.
    NotAuthenticated,
    /// Room has no free seat.
    RoomFull,
    /// Malformed request.
    InvalidInput,
    /// Server-side failure.
    InternalError,
}

impl ServerMessage {
    /// Shorthand for an error reply.
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        ServerMessage::Error(ServerError {
            code,
            message: message.into(),
        })
    }
}

// =============================================================================
// SERIALIZATION HELPERS
// =============================================================================

impl ClientMessage {
    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl ServerMessage {
    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::state::GameConfig;

    #[test]
    fn test_join_room_wire_format() {
        let msg = ClientMessage::from_json(
            r#"{"type":"join_room","capacity":4,"kind":"tournament"}"#,
        )
        .unwrap();
        assert_eq!(
            msg,
            ClientMessage::JoinRoom(JoinRequest {
                capacity: 4,
                kind: RoomKind::Tournament,
                room_name: None,
            })
        );

        // kind defaults to online
        let msg = ClientMessage::from_json(r#"{"type":"join_room","capacity":2}"#).unwrap();
        if let ClientMessage::JoinRoom(req) = msg {
            assert_eq!(req.kind, RoomKind::Online);
        } else {
            panic!("Wrong message type");
        }
    }

    #[test]
    fn test_move_paddle_wire_format() {
        let msg = ClientMessage::from_json(
            r#"{"type":"move_paddle","player":"LEFT","direction":"up"}"#,
        )
        .unwrap();
        assert_eq!(
            msg,
            ClientMessage::MovePaddle(MoveRequest::new(PaddleSide::Left, Direction::Up))
        );
        if let ClientMessage::MovePaddle(req) = msg {
            assert_eq!(req.side(), Ok(PaddleSide::Left));
            assert_eq!(req.direction(), Ok(Direction::Up));
        }
    }

    #[test]
    fn test_move_paddle_unknown_values_still_parse() {
        let msg = ClientMessage::from_json(
            r#"{"type":"move_paddle","player":"MIDDLE","direction":"sideways"}"#,
        )
        .unwrap();
        let req = match msg {
            ClientMessage::MovePaddle(req) => req,
            other => panic!("Wrong message type: {:?}", other),
        };
        assert_eq!(req.side(), Err("MIDDLE".to_string()));
        assert_eq!(req.direction(), Err("sideways".to_string()));
    }

    #[test]
    fn test_error_code_wire_names() {
        let msg = ServerMessage::error(ErrorCode::UserAlreadyConnected, "dup");
        let json = msg.to_json().unwrap();
        assert!(json.contains("\"type\":\"error\""));
        assert!(json.contains("\"USER_ALREADY_CONNECTED\""));
    }

    #[test]
    fn test_room_joined_local_binding() {
        let msg = ServerMessage::RoomJoined(RoomJoinedInfo {
            room: "r".into(),
            paddle: PaddleBinding::All(vec![PaddleSide::Left, PaddleSide::Right]),
            players: vec![],
            max_players: 1,
            kind: RoomKind::Local,
        });
        let json = msg.to_json().unwrap();
        assert!(json.contains("\"paddle\":[\"LEFT\",\"RIGHT\"]"));

        let parsed = ServerMessage::from_json(&json).unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn test_snapshot_binary_roundtrip() {
        let mut state = GameState::new(4, GameConfig::default(), 3);
        state.paddles[2].score = 2;
        let update = GameStateUpdate::capture("room-1", &state);
        assert_eq!(update.paddles.len(), 4);

        let bytes = update.to_bytes().unwrap();
        let parsed = GameStateUpdate::from_bytes(&bytes).unwrap();
        assert_eq!(parsed, update);
    }

    #[test]
    fn test_game_finished_json() {
        let msg = ServerMessage::GameFinished(GameFinishedInfo {
            room: "r".into(),
            winner: None,
            loser: PlayerResult {
                side: PaddleSide::Left,
                score: 1,
                identity: Some("Ada".into()),
            },
            forfeit: true,
            draw: true,
            mode: RoomKind::Online,
            num_players: 4,
            message: "draw".into(),
        });
        let json = msg.to_json().unwrap();
        assert!(json.contains("\"type\":\"game_finished\""));
        assert!(json.contains("\"winner\":null"));
    }
}
