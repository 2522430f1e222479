//! Game Events
//!
//! Facts produced by the physics step, plus the terminal outcome of a match.

use serde::{Serialize, Deserialize};
use crate::game::state::PaddleSide;

/// A side and its final score.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SideScore {
    /// Paddle side.
    pub side: PaddleSide,
    /// Score at the end of the match.
    pub score: u32,
}

/// How a match ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameOutcome {
    /// Best-ranked side.
    pub winner: SideScore,
    /// Worst-ranked side.
    pub loser: SideScore,
}

/// Game event data.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum GameEventData {
    /// Ball launched from center.
    Served {
        /// True for the delayed first serve of a session.
        first: bool,
    },

    /// Ball bounced off a paddle.
    PaddleHit {
        side: PaddleSide,
        speed: f64,
    },

    /// Ball left through a side in a 2-paddle game.
    PointScored {
        scorer: PaddleSide,
        conceded: PaddleSide,
        new_score: u32,
    },

    /// Ball left through a side in a 4-paddle game.
    SideEliminated {
        side: PaddleSide,
        credited: Option<PaddleSide>,
    },

    /// Match finished.
    GameWon(GameOutcome),
}

/// A game event stamped with the tick it happened on.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GameEvent {
    /// Physics step the event belongs to.
    pub tick: u64,
    /// Event data.
    pub data: GameEventData,
}

impl GameEvent {
    /// Create a new event.
    pub fn new(tick: u64, data: GameEventData) -> Self {
        Self { tick, data }
    }
}
