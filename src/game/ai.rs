//! AI Opponent
//!
//! Synthesizes a virtual player's input. Once per reaction interval the AI
//! predicts where the ball will cross its paddle's face, perturbs that with
//! a random error, and stores it as the target. Every tick it holds the
//! up/down key toward the target, so the paddle moves through the normal
//! movement path instead of teleporting.

use serde::{Serialize, Deserialize};

use crate::core::clock::Millis;
use crate::game::input::{Axis, Direction};
use crate::game::state::{GameState, PaddleSide};

/// Default simulated reaction latency.
pub const DEFAULT_REACTION_MS: Millis = 1000;

/// AI strength presets.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    /// Wide error margin, panics early.
    Easy,
    /// Balanced.
    #[default]
    Medium,
    /// Tight error margin.
    Hard,
}

impl Difficulty {
    /// (error margin, panic window ms, panic multiplier, dead zone)
    fn preset(self) -> (f64, Millis, f64, f64) {
        match self {
            Difficulty::Easy => (120.0, 450, 2.0, 12.0),
            Difficulty::Medium => (60.0, 300, 1.6, 8.0),
            Difficulty::Hard => (20.0, 200, 1.25, 4.0),
        }
    }
}

/// Simulated key state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AiKeys {
    /// Toward the low end of the paddle axis.
    pub up: bool,
    /// Toward the high end of the paddle axis.
    pub down: bool,
}

/// Virtual player attached to a [`GameState`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AiConfig {
    /// Master switch.
    pub enabled: bool,
    /// Preset the tunables were taken from.
    pub difficulty: Difficulty,
    /// Paddle the AI drives.
    pub side: PaddleSide,
    /// Time between decisions.
    pub reaction_ms: Millis,
    /// Largest random error added to a prediction.
    pub error_margin: f64,
    /// Arrival time under which the AI panics.
    pub panic_window_ms: Millis,
    /// Error multiplier applied while panicking.
    pub panic_multiplier: f64,
    /// No key is held when the paddle center is this close to the target.
    pub dead_zone: f64,
    /// Where the paddle center should go, along the paddle axis.
    pub target: Option<f64>,
    /// Keys currently held.
    pub keys: AiKeys,
    /// Clock reading of the last decision.
    pub last_decision_ms: Option<Millis>,
    /// Decisions taken.
    pub decisions: u32,
    /// Decisions whose error was larger than half a paddle.
    pub errors: u32,
    /// Decisions taken in panic mode.
    pub panics: u32,
}

impl AiConfig {
    /// Enabled AI for `side` using a difficulty preset.
    pub fn new(difficulty: Difficulty, side: PaddleSide) -> Self {
        let (error_margin, panic_window_ms, panic_multiplier, dead_zone) = difficulty.preset();
        Self {
            enabled: true,
            difficulty,
            side,
            reaction_ms: DEFAULT_REACTION_MS,
            error_margin,
            panic_window_ms,
            panic_multiplier,
            dead_zone,
            target: None,
            keys: AiKeys::default(),
            last_decision_ms: None,
            decisions: 0,
            errors: 0,
            panics: 0,
        }
    }

    /// Fraction of decisions that missed by more than half a paddle.
    pub fn error_rate(&self) -> f64 {
        if self.decisions == 0 {
            0.0
        } else {
            self.errors as f64 / self.decisions as f64
        }
    }

    fn decision_due(&self, now: Millis) -> bool {
        match self.last_decision_ms {
            None => true,
            Some(last) => now.saturating_sub(last) >= self.reaction_ms,
        }
    }
}

/// Update the AI's keys and the paddle direction it controls.
///
/// Runs before the physics step. Does nothing without an enabled AI or
/// once its paddle has been eliminated.
pub fn drive(state: &mut GameState, now: Millis) {
    let mut ai = match state.ai.take() {
        Some(ai) => ai,
        None => return,
    };

    if ai.enabled {
        steer(state, &mut ai, now);
    }

    state.ai = Some(ai);
}

fn steer(state: &mut GameState, ai: &mut AiConfig, now: Millis) {
    let (center, half, axis) = match state.paddle(ai.side) {
        Some(p) if p.active => {
            let c = p.center();
            let along = match p.side.axis() {
                Axis::Vertical => c.y,
                Axis::Horizontal => c.x,
            };
            (along, p.half_length(), p.side.axis())
        }
        _ => return,
    };

    if ai.decision_due(now) {
        decide(state, ai, half, now);
    }

    let target = ai.target.unwrap_or(center);
    let diff = target - center;
    ai.keys = AiKeys {
        up: diff < -ai.dead_zone,
        down: diff > ai.dead_zone,
    };

    let direction = match (ai.keys.up, ai.keys.down, axis) {
        (true, false, Axis::Vertical) => Direction::Up,
        (false, true, Axis::Vertical) => Direction::Down,
        (true, false, Axis::Horizontal) => Direction::Left,
        (false, true, Axis::Horizontal) => Direction::Right,
        _ => Direction::Stop,
    };

    if let Some(paddle) = state.paddle_mut(ai.side) {
        paddle.direction = direction;
    }
}

fn decide(state: &mut GameState, ai: &mut AiConfig, half: f64, now: Millis) {
    let (extent, _) = axis_extents(state, ai.side);

    let (base, arrival_ms) = match predict_intercept(state, ai.side) {
        Some(hit) => hit,
        // Ball going away: drift back to the middle
        None => (extent / 2.0, Millis::MAX),
    };

    let mut error = state.rng.next_f64_range(-ai.error_margin, ai.error_margin);
    if arrival_ms <= ai.panic_window_ms {
        error *= ai.panic_multiplier;
        ai.panics += 1;
    }
    if error.abs() > half {
        ai.errors += 1;
    }
    ai.decisions += 1;
    ai.last_decision_ms = Some(now);

    let lo = half;
    let hi = (extent - half).max(lo);
    ai.target = Some((base + error).clamp(lo, hi));
}

/// (length of the paddle axis, length of the approach axis)
fn axis_extents(state: &GameState, side: PaddleSide) -> (f64, f64) {
    match side.axis() {
        Axis::Vertical => (state.canvas.height, state.canvas.width),
        Axis::Horizontal => (state.canvas.width, state.canvas.height),
    }
}

/// Where along its axis the ball will reach `side`'s paddle face, and in
/// how many milliseconds. `None` if the ball is not heading there.
pub fn predict_intercept(state: &GameState, side: PaddleSide) -> Option<(f64, Millis)> {
    let paddle = state.paddle(side)?;
    let ball = &state.ball;
    let r = ball.radius;

    // (approach pos, approach vel, along pos, along vel, face)
    let (ap, av, lp, lv, face) = match side {
        PaddleSide::Left => (
            ball.position.x, ball.velocity.x, ball.position.y, ball.velocity.y,
            paddle.position.x + paddle.width + r,
        ),
        PaddleSide::Right => (
            ball.position.x, ball.velocity.x, ball.position.y, ball.velocity.y,
            paddle.position.x - r,
        ),
        PaddleSide::Top => (
            ball.position.y, ball.velocity.y, ball.position.x, ball.velocity.x,
            paddle.position.y + paddle.height + r,
        ),
        PaddleSide::Down => (
            ball.position.y, ball.velocity.y, ball.position.x, ball.velocity.x,
            paddle.position.y - r,
        ),
    };

    let distance = face - ap;
    if av == 0.0 || distance.signum() != av.signum() {
        return None;
    }

    // Frames of 1/60 s until the face is reached
    let frames = distance / av;
    let (extent, _) = axis_extents(state, side);
    let along = fold_into(lp + lv * frames, r, extent - r);
    let arrival_ms = (frames * 1000.0 / 60.0).round() as Millis;

    Some((along, arrival_ms))
}

/// Reflect `p` back into `[lo, hi]` as if bouncing off both walls.
fn fold_into(p: f64, lo: f64, hi: f64) -> f64 {
    let span = hi - lo;
    if span <= 0.0 {
        return lo;
    }
    let m = (p - lo).rem_euclid(2.0 * span);
    if m > span {
        lo + 2.0 * span - m
    } else {
        lo + m
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::vec2::Vec2;
    use crate::game::state::GameConfig;

    fn ai_game(difficulty: Difficulty) -> GameState {
        let mut state = GameState::new(2, GameConfig::default(), 42);
        state.ai = Some(AiConfig::new(difficulty, PaddleSide::Right));
        state.running = true;
        state
    }

    #[test]
    fn test_fold_into() {
        assert_eq!(fold_into(50.0, 0.0, 100.0), 50.0);
        assert_eq!(fold_into(130.0, 0.0, 100.0), 70.0);
        assert_eq!(fold_into(-20.0, 0.0, 100.0), 20.0);
        assert_eq!(fold_into(230.0, 0.0, 100.0), 30.0);
    }

    #[test]
    fn test_predict_straight_and_banked() {
        let mut state = ai_game(Difficulty::Hard);
        state.ball.position = Vec2::new(400.0, 300.0);
        state.ball.velocity = Vec2::new(5.0, 0.0);
        let (y, ms) = predict_intercept(&state, PaddleSide::Right).unwrap();
        assert!((y - 300.0).abs() < 1e-9);
        assert!(ms > 0);

        // Heading down steeply: must bounce off the bottom wall
        state.ball.velocity = Vec2::new(1.0, 4.0);
        let (y, _) = predict_intercept(&state, PaddleSide::Right).unwrap();
        assert!(y >= state.ball.radius && y <= state.canvas.height - state.ball.radius);
    }

    #[test]
    fn test_no_prediction_when_ball_leaves() {
        let mut state = ai_game(Difficulty::Hard);
        state.ball.velocity = Vec2::new(-5.0, 1.0);
        assert!(predict_intercept(&state, PaddleSide::Right).is_none());
    }

    #[test]
    fn test_decides_once_per_reaction_interval() {
        let mut state = ai_game(Difficulty::Medium);
        state.ball.velocity = Vec2::new(5.0, 0.0);

        drive(&mut state, 0);
        drive(&mut state, 500);
        drive(&mut state, 999);
        assert_eq!(state.ai.as_ref().unwrap().decisions, 1);

        drive(&mut state, 1000);
        assert_eq!(state.ai.as_ref().unwrap().decisions, 2);
    }

    #[test]
    fn test_holds_key_instead_of_teleporting() {
        let mut state = ai_game(Difficulty::Hard);
        if let Some(ai) = state.ai.as_mut() {
            ai.target = Some(50.0);
            ai.last_decision_ms = Some(0);
        }
        let before = state.paddle(PaddleSide::Right).unwrap().position;

        drive(&mut state, 10);
        let ai = state.ai.as_ref().unwrap();
        assert!(ai.keys.up && !ai.keys.down);
        let paddle = state.paddle(PaddleSide::Right).unwrap();
        assert_eq!(paddle.direction, Direction::Up);
        assert_eq!(paddle.position, before);
    }

    #[test]
    fn test_dead_zone_releases_keys() {
        let mut state = ai_game(Difficulty::Hard);
        let center = state.paddle(PaddleSide::Right).unwrap().center().y;
        if let Some(ai) = state.ai.as_mut() {
            ai.target = Some(center + 1.0);
            ai.last_decision_ms = Some(0);
        }
        drive(&mut state, 10);
        assert_eq!(state.ai.as_ref().unwrap().keys, AiKeys::default());
        assert_eq!(state.paddle(PaddleSide::Right).unwrap().direction, Direction::Stop);
    }

    #[test]
    fn test_panic_when_ball_is_close() {
        let mut state = ai_game(Difficulty::Easy);
        let face = state.paddle(PaddleSide::Right).unwrap().position.x;
        state.ball.position = Vec2::new(face - 30.0, 300.0);
        state.ball.velocity = Vec2::new(5.0, 0.0);

        drive(&mut state, 0);
        assert_eq!(state.ai.as_ref().unwrap().panics, 1);
    }

    #[test]
    fn test_error_rate_counts() {
        let mut ai = AiConfig::new(Difficulty::Easy, PaddleSide::Right);
        assert_eq!(ai.error_rate(), 0.0);
        ai.decisions = 4;
        ai.errors = 1;
        assert_eq!(ai.error_rate(), 0.25);
    }

    #[test]
    fn test_easy_errs_more_than_hard() {
        let run = |difficulty| {
            let mut state = ai_game(difficulty);
            state.ball.velocity = Vec2::new(5.0, 0.0);
            for i in 0..400u64 {
                drive(&mut state, i * 1000);
            }
            state.ai.unwrap().error_rate()
        };
        // Hard's margin never exceeds half a paddle
        assert_eq!(run(Difficulty::Hard), 0.0);
        assert!(run(Difficulty::Easy) > 0.2);
    }

    #[test]
    fn test_disabled_does_nothing() {
        let mut state = ai_game(Difficulty::Hard);
        if let Some(ai) = state.ai.as_mut() {
            ai.enabled = false;
        }
        state.ball.velocity = Vec2::new(5.0, 0.0);
        drive(&mut state, 0);
        assert_eq!(state.ai.as_ref().unwrap().decisions, 0);
    }
}
