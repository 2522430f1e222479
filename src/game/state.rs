//! Game State Definitions
//!
//! Everything one match needs: canvas, paddles, ball, serve bookkeeping
//! and the per-rally [`BallRoundState`]. Mutated only by the physics step
//! and by paddle-move commands.

use std::f64::consts::FRAC_PI_4;
use std::str::FromStr;
use serde::{Serialize, Deserialize};

use crate::core::clock::Millis;
use crate::core::rng::DeterministicRng;
use crate::core::vec2::Vec2;
use crate::game::ai::AiConfig;
use crate::game::input::{Axis, Direction};

// =============================================================================
// CONFIGURATION
// =============================================================================

/// Tunable constants of a match.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GameConfig {
    /// First paddle to reach this score wins.
    pub win_score: u32,
    /// Canvas width for 2-paddle games.
    pub canvas_width: f64,
    /// Canvas height for 2-paddle games.
    pub canvas_height: f64,
    /// Side of the square arena for 4-paddle games.
    pub arena_size: f64,
    /// Paddle length along its axis.
    pub paddle_length: f64,
    /// Paddle thickness across its axis.
    pub paddle_thickness: f64,
    /// Gap between a paddle and its edge of the canvas.
    pub paddle_margin: f64,
    /// Paddle speed in units per 1/60 s.
    pub paddle_speed: f64,
    /// Ball radius.
    pub ball_radius: f64,
    /// Serve speed in units per 1/60 s.
    pub ball_speed: f64,
    /// Speed multiplier applied on each paddle hit.
    pub acceleration_factor: f64,
    /// Paddle hits that still accelerate the ball within one rally.
    pub max_accelerations: u32,
    /// Hold time before the first serve of a session.
    pub serve_delay_ms: Millis,
    /// Largest serve / bounce angle off the paddle normal (radians).
    pub max_angle: f64,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            win_score: crate::DEFAULT_WIN_SCORE,
            canvas_width: 800.0,
            canvas_height: 600.0,
            arena_size: 600.0,
            paddle_length: 100.0,
            paddle_thickness: 10.0,
            paddle_margin: 10.0,
            paddle_speed: 6.0,
            ball_radius: 8.0,
            ball_speed: 5.0,
            acceleration_factor: 1.08,
            max_accelerations: 8,
            serve_delay_ms: 3000,
            max_angle: FRAC_PI_4,
        }
    }
}

impl GameConfig {
    /// Fastest the ball can ever travel (units per 1/60 s).
    pub fn max_ball_speed(&self) -> f64 {
        self.ball_speed * self.acceleration_factor.powi(self.max_accelerations as i32)
    }
}

// =============================================================================
// PADDLES
// =============================================================================

/// Edge of the arena a paddle guards.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PaddleSide {
    /// x = 0 edge.
    Left,
    /// x = width edge.
    Right,
    /// y = 0 edge (4-paddle only).
    Top,
    /// y = height edge (4-paddle only).
    Down,
}

impl PaddleSide {
    /// Arrival order for 2-paddle online rooms.
    pub const TWO_PLAYER_ORDER: [PaddleSide; 2] = [PaddleSide::Left, PaddleSide::Right];

    /// Arrival order for 4-paddle online rooms.
    pub const FOUR_PLAYER_ORDER: [PaddleSide; 4] =
        [PaddleSide::Left, PaddleSide::Down, PaddleSide::Right, PaddleSide::Top];

    /// Wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            PaddleSide::Left => "LEFT",
            PaddleSide::Right => "RIGHT",
            PaddleSide::Top => "TOP",
            PaddleSide::Down => "DOWN",
        }
    }

    /// Axis this paddle moves along.
    #[inline]
    pub fn axis(self) -> Axis {
        match self {
            PaddleSide::Left | PaddleSide::Right => Axis::Vertical,
            PaddleSide::Top | PaddleSide::Down => Axis::Horizontal,
        }
    }

    /// Sides in play for a player count, in arrival order.
    pub fn order_for(num_players: usize) -> &'static [PaddleSide] {
        if num_players >= 4 {
            &Self::FOUR_PLAYER_ORDER
        } else {
            &Self::TWO_PLAYER_ORDER
        }
    }
}

impl FromStr for PaddleSide {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "LEFT" => Ok(PaddleSide::Left),
            "RIGHT" => Ok(PaddleSide::Right),
            "TOP" => Ok(PaddleSide::Top),
            "DOWN" => Ok(PaddleSide::Down),
            other => Err(other.to_string()),
        }
    }
}

/// A paddle and its owner's score.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Paddle {
    /// Edge guarded.
    pub side: PaddleSide,
    /// Top-left corner.
    pub position: Vec2,
    /// Extent along x.
    pub width: f64,
    /// Extent along y.
    pub height: f64,
    /// Points scored.
    pub score: u32,
    /// False once eliminated (4-paddle); the edge then acts as a wall.
    pub active: bool,
    /// Currently held direction.
    pub direction: Direction,
    /// Order of elimination, 0-based (4-paddle only).
    pub eliminated_order: Option<u32>,
}

impl Paddle {
    /// Place a paddle centered on its edge.
    pub fn new(side: PaddleSide, canvas: Canvas, config: &GameConfig) -> Self {
        let len = config.paddle_length;
        let thick = config.paddle_thickness;
        let margin = config.paddle_margin;

        let (position, width, height) = match side {
            PaddleSide::Left => (Vec2::new(margin, (canvas.height - len) / 2.0), thick, len),
            PaddleSide::Right => (
                Vec2::new(canvas.width - margin - thick, (canvas.height - len) / 2.0),
                thick,
                len,
            ),
            PaddleSide::Top => (Vec2::new((canvas.width - len) / 2.0, margin), len, thick),
            PaddleSide::Down => (
                Vec2::new((canvas.width - len) / 2.0, canvas.height - margin - thick),
                len,
                thick,
            ),
        };

        Self {
            side,
            position,
            width,
            height,
            score: 0,
            active: true,
            direction: Direction::Stop,
            eliminated_order: None,
        }
    }

    /// Center of the paddle rectangle.
    #[inline]
    pub fn center(&self) -> Vec2 {
        Vec2::new(self.position.x + self.width / 2.0, self.position.y + self.height / 2.0)
    }

    /// Half of the paddle's length along its axis.
    #[inline]
    pub fn half_length(&self) -> f64 {
        match self.side.axis() {
            Axis::Vertical => self.height / 2.0,
            Axis::Horizontal => self.width / 2.0,
        }
    }
}

// =============================================================================
// BALL
// =============================================================================

/// The ball.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Ball {
    /// Center.
    pub position: Vec2,
    /// Units per 1/60 s; its length always equals `speed` once served.
    pub velocity: Vec2,
    /// Radius.
    pub radius: f64,
    /// Current speed.
    pub speed: f64,
}

/// Canvas dimensions.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Canvas {
    /// Width.
    pub width: f64,
    /// Height.
    pub height: f64,
}

impl Canvas {
    /// Center point.
    #[inline]
    pub fn center(&self) -> Vec2 {
        Vec2::new(self.width / 2.0, self.height / 2.0)
    }
}

/// Arena layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Topology {
    /// LEFT vs RIGHT, top and bottom are walls.
    TwoPaddle,
    /// All four edges guarded.
    FourPaddle,
}

// =============================================================================
// ROUND STATE
// =============================================================================

/// Per-rally bookkeeping, reset on every serve.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BallRoundState {
    /// Paddle hits that sped the ball up this rally.
    pub accelerations: u32,
    /// Set when the current exit has been scored.
    pub point_scored: bool,
    /// Index into `GameState::paddles` of the last paddle to touch the ball.
    pub last_contact: Option<usize>,
}

impl BallRoundState {
    /// Clear everything for a fresh rally.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Serve bookkeeping.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ServeState {
    /// When set, the ball is held at center until this time.
    pub launch_at: Option<Millis>,
    /// Serves performed so far this session.
    pub serves: u32,
}

// =============================================================================
// GAME STATE
// =============================================================================

/// Complete state of one match.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GameState {
    /// Canvas dimensions.
    pub canvas: Canvas,
    /// Paddles in canonical order (LEFT, RIGHT, TOP, DOWN).
    pub paddles: Vec<Paddle>,
    /// The ball.
    pub ball: Ball,
    /// Score needed to win.
    pub win_score: u32,
    /// True while the physics step has effect.
    pub running: bool,
    /// Whole seconds left before the first serve (0 otherwise).
    pub countdown: u32,
    /// Virtual player, if any.
    pub ai: Option<AiConfig>,
    /// Serve scheduling.
    pub serve: ServeState,
    /// Physics steps taken.
    pub tick: u64,
    /// Source of serve angles and AI error.
    pub rng: DeterministicRng,
    /// Constants this match was built with.
    pub config: GameConfig,
    /// Eliminations so far (4-paddle).
    pub eliminations: u32,
}

impl GameState {
    /// Build a fresh match for 2 or 4 players.
    pub fn new(num_players: usize, config: GameConfig, seed: u64) -> Self {
        let four = num_players >= 4;
        let canvas = if four {
            Canvas { width: config.arena_size, height: config.arena_size }
        } else {
            Canvas { width: config.canvas_width, height: config.canvas_height }
        };

        let sides: &[PaddleSide] = if four {
            &[PaddleSide::Left, PaddleSide::Right, PaddleSide::Top, PaddleSide::Down]
        } else {
            &[PaddleSide::Left, PaddleSide::Right]
        };

        let paddles = sides.iter().map(|side| Paddle::new(*side, canvas, &config)).collect();

        let ball = Ball {
            position: canvas.center(),
            velocity: Vec2::ZERO,
            radius: config.ball_radius,
            speed: config.ball_speed,
        };

        Self {
            canvas,
            paddles,
            ball,
            win_score: config.win_score,
            running: false,
            countdown: 0,
            ai: None,
            serve: ServeState::default(),
            tick: 0,
            rng: DeterministicRng::new(seed),
            config,
            eliminations: 0,
        }
    }

    /// 2- or 4-paddle layout.
    #[inline]
    pub fn topology(&self) -> Topology {
        if self.paddles.len() >= 4 {
            Topology::FourPaddle
        } else {
            Topology::TwoPaddle
        }
    }

    /// Index of a side's paddle.
    pub fn paddle_index(&self, side: PaddleSide) -> Option<usize> {
        self.paddles.iter().position(|p| p.side == side)
    }

    /// Paddle for a side.
    pub fn paddle(&self, side: PaddleSide) -> Option<&Paddle> {
        self.paddles.iter().find(|p| p.side == side)
    }

    /// Mutable paddle for a side.
    pub fn paddle_mut(&mut self, side: PaddleSide) -> Option<&mut Paddle> {
        self.paddles.iter_mut().find(|p| p.side == side)
    }

    /// Sides still in play.
    pub fn active_count(&self) -> usize {
        self.paddles.iter().filter(|p| p.active).count()
    }

    /// Put the ball back at center, motionless.
    pub fn center_ball(&mut self) {
        self.ball.position = self.canvas.center();
        self.ball.velocity = Vec2::ZERO;
        self.ball.speed = self.config.ball_speed;
    }

    /// Scores in canonical paddle order.
    pub fn scores(&self) -> Vec<(PaddleSide, u32)> {
        self.paddles.iter().map(|p| (p.side, p.score)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_two_paddle_layout() {
        let state = GameState::new(2, GameConfig::default(), 1);
        assert_eq!(state.topology(), Topology::TwoPaddle);
        assert_eq!(state.paddles.len(), 2);

        let left = state.paddle(PaddleSide::Left).unwrap();
        let right = state.paddle(PaddleSide::Right).unwrap();
        assert!(left.position.x < right.position.x);
        assert_eq!(left.center().y, state.canvas.height / 2.0);
        assert!(state.paddle(PaddleSide::Top).is_none());
    }

    #[test]
    fn test_four_paddle_layout_is_square() {
        let state = GameState::new(4, GameConfig::default(), 1);
        assert_eq!(state.topology(), Topology::FourPaddle);
        assert_eq!(state.canvas.width, state.canvas.height);

        let top = state.paddle(PaddleSide::Top).unwrap();
        assert_eq!(top.side.axis(), Axis::Horizontal);
        assert!(top.width > top.height);
        assert_eq!(top.half_length(), 50.0);
    }

    #[test]
    fn test_ball_starts_centered_and_still() {
        let state = GameState::new(2, GameConfig::default(), 1);
        assert_eq!(state.ball.position, state.canvas.center());
        assert!(state.ball.velocity.is_zero());
        assert!(!state.running);
    }

    #[test]
    fn test_round_state_reset() {
        let mut round = BallRoundState {
            accelerations: 3,
            point_scored: true,
            last_contact: Some(1),
        };
        round.reset();
        assert_eq!(round, BallRoundState::default());
    }

    #[test]
    fn test_arrival_orders() {
        assert_eq!(PaddleSide::order_for(2), &[PaddleSide::Left, PaddleSide::Right]);
        assert_eq!(
            PaddleSide::order_for(4),
            &[PaddleSide::Left, PaddleSide::Down, PaddleSide::Right, PaddleSide::Top]
        );
    }

    #[test]
    fn test_max_ball_speed() {
        let config = GameConfig::default();
        assert!(config.max_ball_speed() > config.ball_speed);
    }
}
