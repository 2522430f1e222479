//! Tournaments
//!
//! - `bracket`: single-elimination bracket for 4 participants
//! - `book`: owner of all tournaments, applies results atomically

pub mod bracket;
pub mod book;

pub use bracket::{
    BracketError, MatchStatus, ResultApplied, Tournament, TournamentMatch, TournamentStatus,
    FINAL, SEMIFINAL,
};
pub use book::TournamentBook;
