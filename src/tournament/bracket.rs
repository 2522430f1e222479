//! Tournament Bracket
//!
//! Single-elimination bracket for 4 participants: two semifinals feeding a
//! final whose slots start empty.
//!
//! ```text
//!   Registration --4 joined--> Active --final recorded--> Completed
//!         \                        \
//!          `--------cancel----------`--> Cancelled
//! ```
//!
//! Methods never publish directly. They return the notifications a
//! successful mutation produces, so the caller can publish only after the
//! change is committed.

use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use crate::core::rng::DeterministicRng;

/// Participants in a bracket.
pub const BRACKET_SIZE: usize = 4;

/// Round of the semifinals.
pub const SEMIFINAL: u8 = 1;

/// Round of the final.
pub const FINAL: u8 = 2;

/// Tournament lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TournamentStatus {
    /// Collecting participants.
    Registration,
    /// Bracket drawn, matches being played.
    Active,
    /// Champion known.
    Completed,
    /// Abandoned.
    Cancelled,
}

/// Match lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    /// Waiting to be played.
    Scheduled,
    /// Winner recorded.
    Finished,
    /// Will never be played.
    Cancelled,
}

/// One bracket match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TournamentMatch {
    /// Match id.
    pub id: Uuid,
    /// 1 = semifinal, 2 = final.
    pub round: u8,
    /// First slot.
    pub player_a: Option<String>,
    /// Second slot.
    pub player_b: Option<String>,
    /// Winner once finished.
    pub winner: Option<String>,
    /// Status.
    pub status: MatchStatus,
}

impl TournamentMatch {
    fn new(round: u8, player_a: Option<String>, player_b: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            round,
            player_a,
            player_b,
            winner: None,
            status: MatchStatus::Scheduled,
        }
    }

    /// Scheduled with both slots filled.
    pub fn is_playable(&self) -> bool {
        self.status == MatchStatus::Scheduled && self.player_a.is_some() && self.player_b.is_some()
    }

    /// Whether `user` occupies a slot.
    pub fn has_participant(&self, user: &str) -> bool {
        self.player_a.as_deref() == Some(user) || self.player_b.as_deref() == Some(user)
    }

    /// The other slot's occupant.
    pub fn opponent_of(&self, user: &str) -> Option<&str> {
        if self.player_a.as_deref() == Some(user) {
            self.player_b.as_deref()
        } else if self.player_b.as_deref() == Some(user) {
            self.player_a.as_deref()
        } else {
            None
        }
    }

    /// Both occupants, in slot order.
    pub fn participants(&self) -> Vec<String> {
        self.player_a.iter().chain(self.player_b.iter()).cloned().collect()
    }
}

/// Bracket errors. Each one aborts only the offending mutation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BracketError {
    /// Unknown tournament.
    #[error("tournament {0} not found")]
    TournamentNotFound(Uuid),

    /// Operation needs the registration phase.
    #[error("tournament {0} is not accepting participants")]
    NotRegistering(Uuid),

    /// Operation needs an active tournament.
    #[error("tournament {0} is not active")]
    NotActive(Uuid),

    /// Participant already registered.
    #[error("{0} is already registered")]
    AlreadyRegistered(String),

    /// Participant never registered.
    #[error("{0} is not registered")]
    NotRegistered(String),

    /// Registration is full.
    #[error("tournament is full")]
    Full,

    /// Bracket needs exactly the full field.
    #[error("need {BRACKET_SIZE} participants, have {0}")]
    NotEnoughParticipants(usize),

    /// Unknown match.
    #[error("match {0} not found")]
    MatchNotFound(Uuid),

    /// Match already finished or cancelled.
    #[error("match {0} is already finished")]
    MatchAlreadyFinished(Uuid),

    /// Winner is not one of the match's two participants.
    #[error("{user} is not a participant of match {match_id}")]
    NotAParticipant {
        /// Match.
        match_id: Uuid,
        /// Rejected winner.
        user: String,
    },

    /// Final has no empty slot left.
    #[error("final of tournament {0} is already full")]
    FinalFull(Uuid),
}

/// Notification produced by a mutation, published after commit.
#[derive(Debug, Clone, PartialEq)]
pub struct Notice {
    /// Event name.
    pub event: &'static str,
    /// Event body.
    pub payload: serde_json::Value,
}

impl Notice {
    fn new(event: &'static str, payload: serde_json::Value) -> Self {
        Self { event, payload }
    }
}

/// What a recorded result changed.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultApplied {
    /// Match that finished.
    pub match_id: Uuid,
    /// Its round.
    pub round: u8,
    /// Winner.
    pub winner: String,
    /// Loser, if the match had one.
    pub loser: Option<String>,
    /// Set when this result made the final playable.
    pub final_ready: Option<Uuid>,
    /// Set when this result decided the tournament.
    pub champion: Option<String>,
    /// Notifications to publish.
    pub notices: Vec<Notice>,
}

/// A 4-participant single-elimination tournament.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tournament {
    /// Tournament id.
    pub id: Uuid,
    /// Status.
    pub status: TournamentStatus,
    /// Participants needed.
    pub capacity: usize,
    /// Registered user ids in arrival order.
    pub participants: Vec<String>,
    /// Semifinals first, then the final.
    pub matches: Vec<TournamentMatch>,
    /// Champion.
    pub winner: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Completion or cancellation time.
    pub completed_at: Option<DateTime<Utc>>,
}

impl Tournament {
    /// Open a tournament for registration.
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            status: TournamentStatus::Registration,
            capacity: BRACKET_SIZE,
            participants: Vec::new(),
            matches: Vec::new(),
            winner: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Add a participant. Returns true once the field is full.
    pub fn register(&mut self, user: &str) -> Result<bool, BracketError> {
        if self.status != TournamentStatus::Registration {
            return Err(BracketError::NotRegistering(self.id));
        }
        if self.participants.iter().any(|p| p == user) {
            return Err(BracketError::AlreadyRegistered(user.to_string()));
        }
        if self.participants.len() >= self.capacity {
            return Err(BracketError::Full);
        }
        self.participants.push(user.to_string());
        Ok(self.participants.len() == self.capacity)
    }

    /// Remove a participant before the draw.
    pub fn withdraw(&mut self, user: &str) -> Result<(), BracketError> {
        if self.status != TournamentStatus::Registration {
            return Err(BracketError::NotRegistering(self.id));
        }
        let before = self.participants.len();
        self.participants.retain(|p| p != user);
        if self.participants.len() == before {
            return Err(BracketError::NotRegistered(user.to_string()));
        }
        Ok(())
    }

    /// Draw the bracket: shuffle the field, pair it into two semifinals and
    /// add an empty final.
    pub fn generate_bracket(&mut self, rng: &mut DeterministicRng) -> Result<Vec<Notice>, BracketError> {
        if self.status != TournamentStatus::Registration {
            return Err(BracketError::NotRegistering(self.id));
        }
        if self.participants.len() != self.capacity {
            return Err(BracketError::NotEnoughParticipants(self.participants.len()));
        }

        let mut seeds = self.participants.clone();
        rng.shuffle(&mut seeds);

        self.matches = seeds
            .chunks(2)
            .map(|pair| TournamentMatch::new(SEMIFINAL, pair.first().cloned(), pair.get(1).cloned()))
            .collect();
        self.matches.push(TournamentMatch::new(FINAL, None, None));
        self.status = TournamentStatus::Active;

        Ok(vec![Notice::new(
            "tournament_started",
            json!({ "tournament_id": self.id, "matches": self.matches }),
        )])
    }

    /// Record a match winner and advance the bracket.
    ///
    /// Validates everything before touching state: a finished or cancelled
    /// match, or a winner who is not one of its two participants, leaves the
    /// tournament unchanged.
    pub fn record_result(&mut self, match_id: Uuid, winner: &str) -> Result<ResultApplied, BracketError> {
        if self.status != TournamentStatus::Active {
            return Err(BracketError::NotActive(self.id));
        }

        let index = self
            .matches
            .iter()
            .position(|m| m.id == match_id)
            .ok_or(BracketError::MatchNotFound(match_id))?;

        let m = &self.matches[index];
        if m.status != MatchStatus::Scheduled {
            return Err(BracketError::MatchAlreadyFinished(match_id));
        }
        if !m.has_participant(winner) {
            return Err(BracketError::NotAParticipant {
                match_id,
                user: winner.to_string(),
            });
        }
        let round = m.round;
        let loser = m.opponent_of(winner).map(str::to_string);

        if round == SEMIFINAL {
            let has_slot = self
                .final_match()
                .map(|f| f.player_a.is_none() || f.player_b.is_none())
                .unwrap_or(false);
            if !has_slot {
                return Err(BracketError::FinalFull(self.id));
            }
        }

        // Validated; apply
        let m = &mut self.matches[index];
        m.status = MatchStatus::Finished;
        m.winner = Some(winner.to_string());

        let mut applied = ResultApplied {
            match_id,
            round,
            winner: winner.to_string(),
            loser: loser.clone(),
            final_ready: None,
            champion: None,
            notices: vec![Notice::new(
                "match_finished",
                json!({
                    "tournament_id": self.id,
                    "match_id": match_id,
                    "round": round,
                    "winner": winner,
                    "loser": loser,
                }),
            )],
        };

        if round == SEMIFINAL {
            let tournament_id = self.id;
            if let Some(fin) = self.final_match_mut() {
                if fin.player_a.is_none() {
                    fin.player_a = Some(winner.to_string());
                } else {
                    fin.player_b = Some(winner.to_string());
                }

                if fin.is_playable() {
                    applied.final_ready = Some(fin.id);
                    applied.notices.push(Notice::new(
                        "match_ready",
                        json!({
                            "tournament_id": tournament_id,
                            "match_id": fin.id,
                            "round": FINAL,
                            "player_a": fin.player_a,
                            "player_b": fin.player_b,
                        }),
                    ));
                }
            }
        } else {
            self.status = TournamentStatus::Completed;
            self.winner = Some(winner.to_string());
            self.completed_at = Some(Utc::now());
            applied.champion = Some(winner.to_string());
            applied.notices.push(Notice::new(
                "tournament_completed",
                json!({ "tournament_id": self.id, "winner": winner }),
            ));
        }

        Ok(applied)
    }

    /// Cancel a match nobody can play; the tournament is cancelled with it.
    pub fn cancel_match(&mut self, match_id: Uuid) -> Result<Vec<Notice>, BracketError> {
        let m = self
            .matches
            .iter_mut()
            .find(|m| m.id == match_id)
            .ok_or(BracketError::MatchNotFound(match_id))?;

        if m.status != MatchStatus::Scheduled {
            return Err(BracketError::MatchAlreadyFinished(match_id));
        }
        m.status = MatchStatus::Cancelled;

        Ok(self.cancel())
    }

    /// Cancel the tournament and every unplayed match.
    pub fn cancel(&mut self) -> Vec<Notice> {
        if matches!(self.status, TournamentStatus::Completed | TournamentStatus::Cancelled) {
            return Vec::new();
        }
        for m in self.matches.iter_mut().filter(|m| m.status == MatchStatus::Scheduled) {
            m.status = MatchStatus::Cancelled;
        }
        self.status = TournamentStatus::Cancelled;
        self.completed_at = Some(Utc::now());
        vec![Notice::new("tournament_cancelled", json!({ "tournament_id": self.id }))]
    }

    /// First playable match of a round, in bracket order.
    pub fn next_match(&self, round: u8) -> Option<&TournamentMatch> {
        self.matches.iter().find(|m| m.round == round && m.is_playable())
    }

    /// Match by id.
    pub fn match_by_id(&self, match_id: Uuid) -> Option<&TournamentMatch> {
        self.matches.iter().find(|m| m.id == match_id)
    }

    /// The final.
    pub fn final_match(&self) -> Option<&TournamentMatch> {
        self.matches.iter().find(|m| m.round == FINAL)
    }

    fn final_match_mut(&mut self) -> Option<&mut TournamentMatch> {
        self.matches.iter_mut().find(|m| m.round == FINAL)
    }

    /// The semifinals.
    pub fn semifinals(&self) -> impl Iterator<Item = &TournamentMatch> {
        self.matches.iter().filter(|m| m.round == SEMIFINAL)
    }

    /// Bracket drawn and not yet decided.
    pub fn is_active(&self) -> bool {
        self.status == TournamentStatus::Active
    }
}

impl Default for Tournament {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn full_tournament(seed: u64) -> Tournament {
        let mut t = Tournament::new();
        for p in ["ana", "ben", "cy", "dee"] {
            t.register(p).unwrap();
        }
        t.generate_bracket(&mut DeterministicRng::new(seed)).unwrap();
        t
    }

    fn semis(t: &Tournament) -> Vec<TournamentMatch> {
        t.semifinals().cloned().collect()
    }

    #[test]
    fn test_registration_fills_up() {
        let mut t = Tournament::new();
        assert_eq!(t.register("a"), Ok(false));
        assert_eq!(t.register("a"), Err(BracketError::AlreadyRegistered("a".into())));
        assert_eq!(t.register("b"), Ok(false));
        assert_eq!(t.register("c"), Ok(false));
        assert_eq!(t.register("d"), Ok(true));
        assert_eq!(t.register("e"), Err(BracketError::Full));

        t.withdraw("b").unwrap();
        assert_eq!(t.participants, vec!["a", "c", "d"]);
    }

    #[test]
    fn test_bracket_needs_full_field() {
        let mut t = Tournament::new();
        t.register("a").unwrap();
        assert_eq!(
            t.generate_bracket(&mut DeterministicRng::new(1)),
            Err(BracketError::NotEnoughParticipants(1))
        );
    }

    #[test]
    fn test_bracket_shape() {
        let t = full_tournament(5);
        assert_eq!(t.status, TournamentStatus::Active);
        assert_eq!(t.matches.len(), 3);

        let s = semis(&t);
        assert_eq!(s.len(), 2);
        assert!(s.iter().all(|m| m.is_playable()));

        let fin = t.final_match().unwrap();
        assert_eq!(fin.round, FINAL);
        assert!(fin.player_a.is_none() && fin.player_b.is_none());

        // Everyone plays exactly one semifinal
        let mut seen: Vec<String> = s.iter().flat_map(|m| m.participants()).collect();
        seen.sort();
        assert_eq!(seen, vec!["ana", "ben", "cy", "dee"]);
    }

    #[test]
    fn test_semifinals_fill_final_and_fire_match_ready_once() {
        let mut t = full_tournament(11);
        let s = semis(&t);

        let w1 = s[0].player_a.clone().unwrap();
        let first = t.record_result(s[0].id, &w1).unwrap();
        assert_eq!(first.final_ready, None);
        assert!(first.notices.iter().all(|n| n.event != "match_ready"));
        assert_eq!(t.final_match().unwrap().player_a.as_deref(), Some(w1.as_str()));

        let w2 = s[1].player_b.clone().unwrap();
        let second = t.record_result(s[1].id, &w2).unwrap();
        let fin = t.final_match().unwrap();
        assert_eq!(second.final_ready, Some(fin.id));
        assert_eq!(fin.player_b.as_deref(), Some(w2.as_str()));

        let ready: Vec<_> = first
            .notices
            .iter()
            .chain(second.notices.iter())
            .filter(|n| n.event == "match_ready")
            .collect();
        assert_eq!(ready.len(), 1);
        assert!(second.notices.iter().any(|n| n.event == "match_finished"));

        assert_eq!(t.next_match(FINAL).map(|m| m.id), Some(fin.id));
        assert!(t.next_match(SEMIFINAL).is_none());
    }

    #[test]
    fn test_final_completes_tournament() {
        let mut t = full_tournament(3);
        let s = semis(&t);
        t.record_result(s[0].id, s[0].player_a.as_deref().unwrap()).unwrap();
        t.record_result(s[1].id, s[1].player_a.as_deref().unwrap()).unwrap();

        let fin = t.final_match().unwrap().clone();
        let champ = fin.player_b.clone().unwrap();
        let applied = t.record_result(fin.id, &champ).unwrap();

        assert_eq!(applied.champion.as_deref(), Some(champ.as_str()));
        assert_eq!(t.status, TournamentStatus::Completed);
        assert_eq!(t.winner.as_deref(), Some(champ.as_str()));
        assert!(t.completed_at.is_some());
        assert!(applied.notices.iter().any(|n| n.event == "tournament_completed"));
    }

    #[test]
    fn test_double_record_fails_without_mutation() {
        let mut t = full_tournament(8);
        let s = semis(&t);
        let w = s[0].player_a.clone().unwrap();
        t.record_result(s[0].id, &w).unwrap();

        let before = t.clone();
        assert_eq!(
            t.record_result(s[0].id, &w),
            Err(BracketError::MatchAlreadyFinished(s[0].id))
        );
        assert_eq!(t, before);
    }

    #[test]
    fn test_non_participant_rejected_without_mutation() {
        let mut t = full_tournament(8);
        let s = semis(&t);
        let outsider = s[1].player_a.clone().unwrap();

        let before = t.clone();
        assert!(matches!(
            t.record_result(s[0].id, &outsider),
            Err(BracketError::NotAParticipant { .. })
        ));
        assert_eq!(t, before);
    }

    #[test]
    fn test_cancel_match_cancels_tournament() {
        let mut t = full_tournament(2);
        let s = semis(&t);
        let notices = t.cancel_match(s[0].id).unwrap();
        assert_eq!(notices[0].event, "tournament_cancelled");
        assert_eq!(t.status, TournamentStatus::Cancelled);
        assert!(t.matches.iter().all(|m| m.status == MatchStatus::Cancelled));
        assert!(t.cancel().is_empty());
    }

    proptest! {
        #[test]
        fn prop_bracket_always_well_formed(seed in any::<u64>(), first in 0usize..2, pick_a in any::<[bool; 2]>()) {
            let mut t = full_tournament(seed);
            prop_assert_eq!(t.semifinals().count(), 2);
            prop_assert_eq!(t.matches.iter().filter(|m| m.round == FINAL).count(), 1);

            // Report semis in either order, either slot winning
            let s = semis(&t);
            let order = if first == 0 { [0, 1] } else { [1, 0] };
            let mut ready = 0;
            for i in order {
                let w = if pick_a[i] { s[i].player_a.clone() } else { s[i].player_b.clone() };
                let applied = t.record_result(s[i].id, &w.unwrap()).unwrap();
                ready += applied.notices.iter().filter(|n| n.event == "match_ready").count();
            }
            prop_assert_eq!(ready, 1);
            prop_assert!(t.final_match().unwrap().is_playable());
        }
    }
}
