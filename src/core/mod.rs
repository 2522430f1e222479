//! Core primitives.
//!
//! Vector math, the seeded RNG and the injected clock. Nothing in here
//! touches the network or global state.

pub mod vec2;
pub mod rng;
pub mod clock;

// Re-export core types
pub use vec2::Vec2;
pub use rng::DeterministicRng;
pub use clock::{Clock, ManualClock, Millis, SystemClock};
