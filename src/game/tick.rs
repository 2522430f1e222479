//! Authoritative Simulation Tick
//!
//! [`advance`] moves one match forward by `dt` seconds. The caller drives
//! the cadence; all motion is scaled by `dt * 60`, so speeds are expressed
//! per 1/60 s regardless of tick rate.
//!
//! Given the same initial state (including RNG seed), the same sequence of
//! paddle commands, `dt` values and clock readings, the result is identical.

use crate::core::clock::Millis;
use crate::core::vec2::Vec2;
use crate::game::collision::{
    approaching, ball_touches_paddle, bounce_off_paddle, exited_through, reflect_off_edge,
};
use crate::game::events::{GameEvent, GameEventData, GameOutcome, SideScore};
use crate::game::input::Axis;
use crate::game::state::{BallRoundState, GameState, PaddleSide, Topology};

/// Result of a tick.
#[derive(Debug, Default)]
pub struct TickResult {
    /// Events generated this tick
    pub events: Vec<GameEvent>,
    /// Set on the tick the match ends
    pub outcome: Option<GameOutcome>,
}

impl TickResult {
    /// Whether a point or elimination happened this tick.
    pub fn scored(&self) -> bool {
        self.events.iter().any(|e| {
            matches!(
                e.data,
                GameEventData::PointScored { .. } | GameEventData::SideEliminated { .. }
            )
        })
    }
}

/// Arm the delayed first serve (or serve at once if this session has
/// already served before).
pub fn begin_serving(state: &mut GameState, round: &mut BallRoundState, now: Millis) -> TickResult {
    let mut result = TickResult::default();
    round.reset();
    state.center_ball();

    if state.serve.serves == 0 {
        let delay = state.config.serve_delay_ms;
        state.serve.launch_at = Some(now + delay);
        state.countdown = whole_seconds(delay);
    } else {
        serve(state, round, &mut result, false);
    }

    result
}

/// Run one simulation step.
///
/// No-op unless `state.running`. On the tick a winner is found the state
/// stops running and `TickResult::outcome` is filled.
pub fn advance(
    state: &mut GameState,
    round: &mut BallRoundState,
    dt: f64,
    now: Millis,
) -> TickResult {
    let mut result = TickResult::default();

    if !state.running {
        return result;
    }

    state.tick += 1;
    let step = dt * 60.0;

    // 1. Paddles move while a direction is held
    move_paddles(state, step);

    // 2. Hold the ball during the first-serve countdown
    if let Some(launch_at) = state.serve.launch_at {
        if now < launch_at {
            state.countdown = whole_seconds(launch_at - now);
            return result;
        }
        state.serve.launch_at = None;
        serve(state, round, &mut result, true);
    }

    // 3. Integrate ball
    let ball = &mut state.ball;
    ball.position = ball.position + ball.velocity.scale(step);

    // 4. Walls
    bounce_off_walls(state);

    // 5. Paddles
    bounce_off_paddles(state, round, &mut result);

    // 6. Exits, scoring, win
    match state.topology() {
        Topology::TwoPaddle => score_two_paddle(state, round, &mut result),
        Topology::FourPaddle => score_four_paddle(state, round, &mut result),
    }

    result
}

/// Move every active paddle along its axis, clamped to the arena.
fn move_paddles(state: &mut GameState, step: f64) {
    let speed = state.config.paddle_speed * step;
    let canvas = state.canvas;

    for paddle in state.paddles.iter_mut().filter(|p| p.active) {
        let axis = paddle.side.axis();
        let sign = match paddle.direction.sign_on(axis) {
            Some(s) => s,
            None => continue,
        };
        if sign == 0.0 {
            continue;
        }

        match axis {
            Axis::Vertical => {
                let max_y = (canvas.height - paddle.height).max(0.0);
                paddle.position.y = (paddle.position.y + sign * speed).clamp(0.0, max_y);
            }
            Axis::Horizontal => {
                let max_x = (canvas.width - paddle.width).max(0.0);
                paddle.position.x = (paddle.position.x + sign * speed).clamp(0.0, max_x);
            }
        }
    }
}

/// Launch the ball from center at serve speed, angle within the configured
/// cone, random horizontal direction.
fn serve(state: &mut GameState, round: &mut BallRoundState, result: &mut TickResult, first: bool) {
    round.reset();
    state.center_ball();

    let max_angle = state.config.max_angle;
    let angle = state.rng.next_f64_range(-max_angle, max_angle);
    let direction = state.rng.next_sign();
    let speed = state.config.ball_speed;

    state.ball.velocity = Vec2::new(direction * angle.cos(), angle.sin()).scale(speed);
    state.ball.speed = speed;
    state.countdown = 0;
    state.serve.serves += 1;

    result.events.push(GameEvent::new(state.tick, GameEventData::Served { first }));
}

fn bounce_off_walls(state: &mut GameState) {
    let canvas = state.canvas;
    match state.topology() {
        Topology::TwoPaddle => {
            reflect_off_edge(&mut state.ball, canvas, PaddleSide::Top);
            reflect_off_edge(&mut state.ball, canvas, PaddleSide::Down);
        }
        Topology::FourPaddle => {
            // Eliminated sides are closed off
            for i in 0..state.paddles.len() {
                if !state.paddles[i].active {
                    let side = state.paddles[i].side;
                    reflect_off_edge(&mut state.ball, canvas, side);
                }
            }
        }
    }
}

fn bounce_off_paddles(state: &mut GameState, round: &mut BallRoundState, result: &mut TickResult) {
    let hit = state.paddles.iter().position(|p| {
        p.active && approaching(&state.ball, p.side) && ball_touches_paddle(&state.ball, p)
    });

    let index = match hit {
        Some(i) => i,
        None => return,
    };

    if round.accelerations < state.config.max_accelerations {
        round.accelerations += 1;
        state.ball.speed *= state.config.acceleration_factor;
    }
    round.last_contact = Some(index);

    let paddle = &state.paddles[index];
    let velocity = bounce_off_paddle(&state.ball, paddle, state.ball.speed, state.config.max_angle);
    let side = paddle.side;
    state.ball.velocity = velocity;

    result.events.push(GameEvent::new(
        state.tick,
        GameEventData::PaddleHit { side, speed: state.ball.speed },
    ));
}

fn score_two_paddle(state: &mut GameState, round: &mut BallRoundState, result: &mut TickResult) {
    let canvas = state.canvas;

    // First matching exit wins
    let exit = if exited_through(&state.ball, canvas, PaddleSide::Left) {
        Some((PaddleSide::Left, PaddleSide::Right))
    } else if exited_through(&state.ball, canvas, PaddleSide::Right) {
        Some((PaddleSide::Right, PaddleSide::Left))
    } else {
        None
    };

    let (conceded, scorer) = match exit {
        Some(pair) => pair,
        None => return,
    };

    if round.point_scored {
        return;
    }
    round.point_scored = true;

    let new_score = match state.paddle_mut(scorer) {
        Some(paddle) => {
            paddle.score += 1;
            paddle.score
        }
        None => return,
    };

    result.events.push(GameEvent::new(
        state.tick,
        GameEventData::PointScored { scorer, conceded, new_score },
    ));

    if new_score >= state.win_score {
        finish(state, result);
    } else {
        serve(state, round, result, false);
    }
}

fn score_four_paddle(state: &mut GameState, round: &mut BallRoundState, result: &mut TickResult) {
    let canvas = state.canvas;

    let exited = state
        .paddles
        .iter()
        .position(|p| p.active && exited_through(&state.ball, canvas, p.side));

    let index = match exited {
        Some(i) => i,
        None => return,
    };

    if round.point_scored {
        return;
    }
    round.point_scored = true;

    let side = state.paddles[index].side;
    state.paddles[index].active = false;
    state.paddles[index].direction = Default::default();
    state.paddles[index].eliminated_order = Some(state.eliminations);
    state.eliminations += 1;

    // Credit the last toucher, never the side that just went out
    let credited = round
        .last_contact
        .filter(|&i| i != index && state.paddles[i].active)
        .map(|i| {
            state.paddles[i].score += 1;
            state.paddles[i].side
        });

    result.events.push(GameEvent::new(
        state.tick,
        GameEventData::SideEliminated { side, credited },
    ));

    let threshold_reached = state.paddles.iter().any(|p| p.score >= state.win_score);
    if threshold_reached || state.active_count() <= 1 {
        finish(state, result);
    } else {
        serve(state, round, result, false);
    }
}

/// Stop the match and rank the sides.
fn finish(state: &mut GameState, result: &mut TickResult) {
    state.running = false;
    state.ball.velocity = Vec2::ZERO;

    if let Some(outcome) = rank_outcome(state) {
        result.events.push(GameEvent::new(state.tick, GameEventData::GameWon(outcome)));
        result.outcome = Some(outcome);
    }
}

/// Rank paddles by (score, still active, later elimination).
///
/// The survivor breaks score ties, then whoever was eliminated later.
pub fn rank_outcome(state: &GameState) -> Option<GameOutcome> {
    let key = |p: &crate::game::state::Paddle| {
        (p.score, p.active, p.eliminated_order.map(|o| o + 1).unwrap_or(0))
    };

    let winner = state.paddles.iter().max_by_key(|p| key(p))?;
    let loser = state
        .paddles
        .iter()
        .filter(|p| p.side != winner.side)
        .min_by_key(|p| key(p))?;

    Some(GameOutcome {
        winner: SideScore { side: winner.side, score: winner.score },
        loser: SideScore { side: loser.side, score: loser.score },
    })
}

/// Ceil of milliseconds to whole seconds.
#[inline]
fn whole_seconds(ms: Millis) -> u32 {
    ms.div_ceil(1000) as u32
}
