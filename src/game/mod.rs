//! Game Logic Module
//!
//! The Pong simulation. Deterministic given the same seed, inputs, `dt`
//! values and clock readings.
//!
//! ## Module Structure
//!
//! - `input`: Held paddle directions
//! - `state`: Match state, paddles, ball, per-rally bookkeeping
//! - `tick`: Authoritative simulation step
//! - `collision`: Paddle and wall collision
//! - `ai`: Virtual opponent
//! - `events`: Game events and match outcome

pub mod input;
pub mod state;
pub mod tick;
pub mod collision;
pub mod ai;
pub mod events;

// Re-export key types
pub use input::{Axis, Direction};
pub use state::{BallRoundState, GameConfig, GameState, PaddleSide, Topology};
pub use tick::{advance, TickResult};
pub use events::{GameEvent, GameOutcome, SideScore};
pub use ai::{AiConfig, Difficulty};
