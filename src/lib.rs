//! # Pong Arena Server
//!
//! Authoritative real-time Pong server: 2- and 4-paddle games, an AI
//! opponent, matchmade rooms and 4-player single-elimination tournaments.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    PONG ARENA SERVER                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Primitives                                │
//! │  ├── vec2.rs     - 2D vector math                            │
//! │  ├── rng.rs      - Seeded Xorshift128+ PRNG                  │
//! │  └── clock.rs    - Injected millisecond clock                │
//! │                                                              │
//! │  game/           - Simulation (deterministic)                │
//! │  ├── input.rs    - Held paddle directions                    │
//! │  ├── state.rs    - Paddles, ball, canvas, rally state        │
//! │  ├── tick.rs     - Authoritative simulation step             │
//! │  ├── collision.rs- Paddle and wall collision                 │
//! │  ├── ai.rs       - Virtual opponent                          │
//! │  └── events.rs   - Game events and outcome                   │
//! │                                                              │
//! │  network/        - Networking                                │
//! │  ├── server.rs   - WebSocket server and reactor              │
//! │  ├── hub.rs      - Connection bindings, forfeits, brackets   │
//! │  ├── room.rs     - Room registry                             │
//! │  ├── session.rs  - Game session lifecycle                    │
//! │  ├── protocol.rs - Message types                             │
//! │  └── auth.rs     - JWT validation                            │
//! │                                                              │
//! │  tournament/     - 4-player bracket                          │
//! │  services.rs     - Identity, match records, notifications    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Determinism
//!
//! Given the same seed, inputs, `dt` values and clock readings, `game/`
//! produces identical states. Maps are `BTreeMap` so iteration order never
//! depends on hashing, and time only enters through [`core::Clock`].

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod game;
pub mod network;
pub mod services;
pub mod tournament;

// Re-export commonly used types
pub use core::rng::DeterministicRng;
pub use core::vec2::Vec2;
pub use game::state::{GameConfig, GameState, PaddleSide};
pub use network::hub::{GameHub, HubConfig, HubServices};
pub use network::server::{GameServer, ServerConfig};
pub use services::{ConnectionId, Identity};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Simulation tick rate (Hz)
pub const TICK_RATE: u32 = 120;

/// Points needed to win unless configured otherwise
pub const DEFAULT_WIN_SCORE: u32 = 5;
