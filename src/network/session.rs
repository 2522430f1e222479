//! Game Session
//!
//! One simulation instance per room. The session is driven by an external
//! tick, exposes paddle-move mutators, and reports the end of the game on
//! its result channel, which is the only way it talks upward.
//!
//! ```text
//!   Idle --start()--> Running --stop() / win--> Idle
//! ```

use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::core::clock::{Clock, Millis};
use crate::game::ai::{self, AiConfig};
use crate::game::events::GameOutcome;
use crate::game::input::Direction;
use crate::game::state::{BallRoundState, GameConfig, GameState, PaddleSide};
use crate::game::tick::{advance, begin_serving, TickResult};
use crate::network::protocol::{ErrorCode, GameStateUpdate};

/// Session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Not ticking.
    Idle,
    /// Ticking.
    Running,
}

/// Sent once when a game is won.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionEnded {
    /// Room the session belongs to.
    pub room: String,
    /// Winner and loser.
    pub outcome: GameOutcome,
}

/// Session errors.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum SessionError {
    /// Command needs a running game.
    #[error("game is not running")]
    NotRunning,

    /// No such paddle in this game.
    #[error("no {0:?} paddle in this game")]
    InvalidPaddle(PaddleSide),

    /// Direction does not match the paddle's axis.
    #[error("{direction:?} does not move the {side:?} paddle")]
    InvalidDirection {
        /// Paddle.
        side: PaddleSide,
        /// Rejected direction.
        direction: Direction,
    },
}

impl SessionError {
    /// Wire code reported to the client.
    pub fn code(&self) -> ErrorCode {
        match self {
            SessionError::NotRunning => ErrorCode::GameNotRunning,
            SessionError::InvalidPaddle(_) => ErrorCode::InvalidPaddle,
            SessionError::InvalidDirection { .. } => ErrorCode::InvalidDirection,
        }
    }
}

/// A game session.
pub struct GameSession {
    /// Room name.
    room: String,
    /// Current state.
    state: SessionState,
    /// Simulation.
    game: GameState,
    /// Per-rally bookkeeping.
    round: BallRoundState,
    /// Time source for the serve delay.
    clock: Arc<dyn Clock>,
    /// Clock reading at the last start.
    started_at: Option<Millis>,
    /// Set once the end has been reported.
    ended: bool,
    /// Upward channel.
    results: mpsc::UnboundedSender<SessionEnded>,
}

impl GameSession {
    /// Create an idle session for 2 or 4 paddles.
    pub fn new(
        room: impl Into<String>,
        num_players: usize,
        config: GameConfig,
        seed: u64,
        clock: Arc<dyn Clock>,
        results: mpsc::UnboundedSender<SessionEnded>,
    ) -> Self {
        Self {
            room: room.into(),
            state: SessionState::Idle,
            game: GameState::new(num_players, config, seed),
            round: BallRoundState::default(),
            clock,
            started_at: None,
            ended: false,
            results,
        }
    }

    /// Let an AI drive one paddle.
    pub fn with_ai(mut self, ai: AiConfig) -> Self {
        self.game.ai = Some(ai);
        self
    }

    /// Idle -> Running. Arms the delayed first serve on the first start;
    /// later starts serve at once. No-op while running.
    pub fn start(&mut self) {
        if self.state == SessionState::Running || self.ended {
            return;
        }

        let now = self.clock.now_ms();
        self.started_at = Some(now);
        self.state = SessionState::Running;
        self.game.running = true;
        begin_serving(&mut self.game, &mut self.round, now);

        info!(
            "Session {} started ({} paddles, countdown {}s)",
            self.room,
            self.game.paddles.len(),
            self.game.countdown
        );
    }

    /// Running -> Idle. Idempotent.
    pub fn stop(&mut self) {
        if self.state == SessionState::Idle {
            return;
        }
        self.state = SessionState::Idle;
        self.game.running = false;
        debug!("Session {} stopped at tick {}", self.room, self.game.tick);
    }

    /// Advance by `dt` seconds: AI first, then physics. No-op unless running.
    pub fn tick(&mut self, dt: f64) -> TickResult {
        if self.state != SessionState::Running {
            return TickResult::default();
        }

        let now = self.clock.now_ms();
        ai::drive(&mut self.game, now);
        let result = advance(&mut self.game, &mut self.round, dt, now);

        if let Some(outcome) = result.outcome {
            self.stop();
            self.report(outcome);
        }

        result
    }

    fn report(&mut self, outcome: GameOutcome) {
        if self.ended {
            return;
        }
        self.ended = true;

        info!(
            "Session {} won by {:?} {}-{}",
            self.room, outcome.winner.side, outcome.winner.score, outcome.loser.score
        );

        // Receiver gone means the hub is shutting down
        let _ = self.results.send(SessionEnded {
            room: self.room.clone(),
            outcome,
        });
    }

    /// Hold `direction` on `side` until another direction (or `Stop`).
    pub fn move_paddle(&mut self, side: PaddleSide, direction: Direction) -> Result<(), SessionError> {
        if self.state != SessionState::Running {
            return Err(SessionError::NotRunning);
        }

        let paddle = self
            .game
            .paddle_mut(side)
            .ok_or(SessionError::InvalidPaddle(side))?;

        if !direction.fits(side.axis()) {
            return Err(SessionError::InvalidDirection { side, direction });
        }

        paddle.direction = direction;
        Ok(())
    }

    /// Broadcast snapshot.
    pub fn snapshot(&self) -> GameStateUpdate {
        GameStateUpdate::capture(&self.room, &self.game)
    }

    /// Current state.
    pub fn get_state(&self) -> SessionState {
        self.state
    }

    /// True while ticking.
    pub fn is_running(&self) -> bool {
        self.state == SessionState::Running
    }

    /// True once the win has been reported.
    pub fn has_ended(&self) -> bool {
        self.ended
    }

    /// Clock reading at the last start.
    pub fn started_at(&self) -> Option<Millis> {
        self.started_at
    }

    /// Score of one side.
    pub fn score_of(&self, side: PaddleSide) -> Option<u32> {
        self.game.paddle(side).map(|p| p.score)
    }

    /// Simulation state.
    pub fn game(&self) -> &GameState {
        &self.game
    }

    /// Mutable simulation state.
    pub fn game_mut(&mut self) -> &mut GameState {
        &mut self.game
    }

    /// Per-rally bookkeeping.
    pub fn round(&self) -> &BallRoundState {
        &self.round
    }

    /// Room name.
    pub fn room(&self) -> &str {
        &self.room
    }
}
