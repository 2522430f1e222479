//! Paddle Input
//!
//! Keydown/keyup semantics: a direction is held until `Stop` arrives,
//! and the paddle keeps moving every tick while it is held.

use std::str::FromStr;

use serde::{Serialize, Deserialize};

/// Axis a paddle slides along.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Axis {
    /// LEFT and RIGHT paddles move up and down.
    Vertical,
    /// TOP and DOWN paddles move left and right.
    Horizontal,
}

/// Direction carried by a `move_paddle` command.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Toward y = 0.
    Up,
    /// Toward y = height.
    Down,
    /// Toward x = 0.
    Left,
    /// Toward x = width.
    Right,
    /// Key released.
    #[default]
    Stop,
}

impl FromStr for Direction {
    type Err = String;

    /// Parse the lowercase wire name.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "up" => Ok(Direction::Up),
            "down" => Ok(Direction::Down),
            "left" => Ok(Direction::Left),
            "right" => Ok(Direction::Right),
            "stop" => Ok(Direction::Stop),
            other => Err(other.to_string()),
        }
    }
}

impl Direction {
    /// Wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Up => "up",
            Direction::Down => "down",
            Direction::Left => "left",
            Direction::Right => "right",
            Direction::Stop => "stop",
        }
    }

    /// Signed unit of motion along `axis`, or `None` if the direction
    /// does not belong to that axis.
    pub fn sign_on(self, axis: Axis) -> Option<f64> {
        match (self, axis) {
            (Direction::Stop, _) => Some(0.0),
            (Direction::Up, Axis::Vertical) | (Direction::Left, Axis::Horizontal) => Some(-1.0),
            (Direction::Down, Axis::Vertical) | (Direction::Right, Axis::Horizontal) => Some(1.0),
            _ => None,
        }
    }

    /// Whether this direction can drive a paddle on `axis`.
    #[inline]
    pub fn fits(self, axis: Axis) -> bool {
        self.sign_on(axis).is_some()
    }
}
