//! Collision Detection
//!
//! Box-vs-circle paddle checks and wall reflection. Deliberately simple:
//! no continuous sweep, no spin.

use crate::core::vec2::Vec2;
use crate::game::state::{Ball, Canvas, Paddle, PaddleSide};

/// Check if a circle overlaps an axis-aligned box.
#[inline]
pub fn circle_overlaps_box(center: Vec2, radius: f64, min: Vec2, max: Vec2) -> bool {
    let closest = center.clamp(min, max);
    center.distance_squared(closest) <= radius * radius
}

/// Check if the ball overlaps a paddle's rectangle.
#[inline]
pub fn ball_touches_paddle(ball: &Ball, paddle: &Paddle) -> bool {
    let min = paddle.position;
    let max = Vec2::new(paddle.position.x + paddle.width, paddle.position.y + paddle.height);
    circle_overlaps_box(ball.position, ball.radius, min, max)
}

/// True when the ball is travelling toward the paddle's field of play
/// side, i.e. a hit should bounce it back. Prevents double hits while the
/// ball is still overlapping after a bounce.
#[inline]
pub fn approaching(ball: &Ball, side: PaddleSide) -> bool {
    match side {
        PaddleSide::Left => ball.velocity.x < 0.0,
        PaddleSide::Right => ball.velocity.x > 0.0,
        PaddleSide::Top => ball.velocity.y < 0.0,
        PaddleSide::Down => ball.velocity.y > 0.0,
    }
}

/// New velocity after bouncing off a paddle.
///
/// The outgoing angle depends on where the ball struck: center hits leave
/// along the paddle normal, edge hits leave at `max_angle`.
pub fn bounce_off_paddle(ball: &Ball, paddle: &Paddle, speed: f64, max_angle: f64) -> Vec2 {
    let center = paddle.center();
    let half = paddle.half_length().max(f64::EPSILON);

    let offset = match paddle.side {
        PaddleSide::Left | PaddleSide::Right => (ball.position.y - center.y) / half,
        PaddleSide::Top | PaddleSide::Down => (ball.position.x - center.x) / half,
    };
    let angle = offset.clamp(-1.0, 1.0) * max_angle;
    let (along_normal, along_face) = (angle.cos() * speed, angle.sin() * speed);

    match paddle.side {
        PaddleSide::Left => Vec2::new(along_normal, along_face),
        PaddleSide::Right => Vec2::new(-along_normal, along_face),
        PaddleSide::Top => Vec2::new(along_face, along_normal),
        PaddleSide::Down => Vec2::new(along_face, -along_normal),
    }
}

/// Reflect the ball off the edge belonging to `side` if it has reached it.
///
/// Only the velocity component perpendicular to that edge flips; the ball
/// is clamped back inside. Returns true on a bounce.
pub fn reflect_off_edge(ball: &mut Ball, canvas: Canvas, side: PaddleSide) -> bool {
    let r = ball.radius;
    match side {
        PaddleSide::Left if ball.position.x - r <= 0.0 && ball.velocity.x < 0.0 => {
            ball.velocity.x = -ball.velocity.x;
            ball.position.x = ball.position.x.max(r);
            true
        }
        PaddleSide::Right if ball.position.x + r >= canvas.width && ball.velocity.x > 0.0 => {
            ball.velocity.x = -ball.velocity.x;
            ball.position.x = ball.position.x.min(canvas.width - r);
            true
        }
        PaddleSide::Top if ball.position.y - r <= 0.0 && ball.velocity.y < 0.0 => {
            ball.velocity.y = -ball.velocity.y;
            ball.position.y = ball.position.y.max(r);
            true
        }
        PaddleSide::Down if ball.position.y + r >= canvas.height && ball.velocity.y > 0.0 => {
            ball.velocity.y = -ball.velocity.y;
            ball.position.y = ball.position.y.min(canvas.height - r);
            true
        }
        _ => false,
    }
}

/// True once the whole ball has left the arena through `side`'s edge.
#[inline]
pub fn exited_through(ball: &Ball, canvas: Canvas, side: PaddleSide) -> bool {
    let r = ball.radius;
    match side {
        PaddleSide::Left => ball.position.x + r < 0.0,
        PaddleSide::Right => ball.position.x - r > canvas.width,
        PaddleSide::Top => ball.position.y + r < 0.0,
        PaddleSide::Down => ball.position.y - r > canvas.height,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::state::GameConfig;

    fn ball_at(x: f64, y: f64, vx: f64, vy: f64) -> Ball {
        Ball {
            position: Vec2::new(x, y),
            velocity: Vec2::new(vx, vy),
            radius: 8.0,
            speed: Vec2::new(vx, vy).length(),
        }
    }

    fn canvas() -> Canvas {
        Canvas { width: 800.0, height: 600.0 }
    }

    #[test]
    fn test_circle_box_overlap() {
        let min = Vec2::new(0.0, 0.0);
        let max = Vec2::new(10.0, 100.0);
        assert!(circle_overlaps_box(Vec2::new(15.0, 50.0), 6.0, min, max));
        assert!(!circle_overlaps_box(Vec2::new(17.0, 50.0), 6.0, min, max));
        // Corner uses true distance, not box expansion
        assert!(!circle_overlaps_box(Vec2::new(15.0, 105.0), 6.0, min, max));
    }

    #[test]
    fn test_paddle_hit_detection() {
        let config = GameConfig::default();
        let paddle = Paddle::new(PaddleSide::Left, canvas(), &config);
        let ball = ball_at(paddle.position.x + paddle.width + 5.0, 300.0, -5.0, 0.0);
        assert!(ball_touches_paddle(&ball, &paddle));
        assert!(approaching(&ball, PaddleSide::Left));
    }

    #[test]
    fn test_center_hit_leaves_along_normal() {
        let config = GameConfig::default();
        let paddle = Paddle::new(PaddleSide::Right, canvas(), &config);
        let ball = ball_at(paddle.position.x - 5.0, paddle.center().y, 5.0, 0.0);

        let v = bounce_off_paddle(&ball, &paddle, 5.0, config.max_angle);
        assert!((v.x + 5.0).abs() < 1e-9);
        assert!(v.y.abs() < 1e-9);
    }

    #[test]
    fn test_edge_hit_is_capped_at_max_angle() {
        let config = GameConfig::default();
        let paddle = Paddle::new(PaddleSide::Top, Canvas { width: 600.0, height: 600.0 }, &config);
        let ball = ball_at(paddle.position.x + paddle.width + 50.0, 30.0, 0.0, -5.0);

        let v = bounce_off_paddle(&ball, &paddle, 5.0, config.max_angle);
        assert!(v.y > 0.0, "ball must leave the TOP paddle downward");
        assert!((v.x - v.y).abs() < 1e-9, "45 degree exit");
        assert!((v.length() - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_wall_reflects_perpendicular_only() {
        let mut ball = ball_at(400.0, 3.0, 4.0, -3.0);
        assert!(reflect_off_edge(&mut ball, canvas(), PaddleSide::Top));
        assert_eq!(ball.velocity, Vec2::new(4.0, 3.0));
        assert_eq!(ball.position.y, 8.0);

        // Moving away: no bounce
        assert!(!reflect_off_edge(&mut ball, canvas(), PaddleSide::Top));
    }

    #[test]
    fn test_exit_requires_whole_ball() {
        let half_out = ball_at(-4.0, 300.0, -5.0, 0.0);
        assert!(!exited_through(&half_out, canvas(), PaddleSide::Left));

        let out = ball_at(-9.0, 300.0, -5.0, 0.0);
        assert!(exited_through(&out, canvas(), PaddleSide::Left));
        assert!(!exited_through(&out, canvas(), PaddleSide::Right));
    }
}
