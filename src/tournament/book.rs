//! Tournament Book
//!
//! Owns every tournament and is the only writer of match results. A result
//! and the bracket advance it causes are applied to a staged copy that is
//! swapped in only when the whole mutation succeeded; notifications go out
//! after the swap.

use std::collections::BTreeMap;

use tracing::{error, info};
use uuid::Uuid;

use crate::core::rng::DeterministicRng;
use crate::services::{PublishScope, Publisher};
use crate::tournament::bracket::{
    BracketError, Notice, ResultApplied, Tournament, TournamentMatch, TournamentStatus, SEMIFINAL,
};

/// All tournaments.
pub struct TournamentBook {
    tournaments: BTreeMap<Uuid, Tournament>,
    rng: DeterministicRng,
}

impl TournamentBook {
    /// Empty book; `seed` drives bracket shuffles.
    pub fn new(seed: u64) -> Self {
        Self {
            tournaments: BTreeMap::new(),
            rng: DeterministicRng::new(seed),
        }
    }

    /// Open a new tournament for registration.
    pub fn create(&mut self) -> Uuid {
        let tournament = Tournament::new();
        let id = tournament.id;
        info!("Tournament {} open for registration", id);
        self.tournaments.insert(id, tournament);
        id
    }

    /// Tournament by id.
    pub fn get(&self, id: Uuid) -> Option<&Tournament> {
        self.tournaments.get(&id)
    }

    /// Bracket drawn and champion not yet known.
    pub fn is_active(&self, id: Uuid) -> bool {
        self.get(id).map(Tournament::is_active).unwrap_or(false)
    }

    /// Still accepting participants.
    pub fn is_registering(&self, id: Uuid) -> bool {
        self.get(id)
            .map(|t| t.status == TournamentStatus::Registration)
            .unwrap_or(false)
    }

    /// Register a participant. Returns true once the field is full.
    pub fn register(&mut self, id: Uuid, user: &str) -> Result<bool, BracketError> {
        self.get_mut(id)?.register(user)
    }

    /// Withdraw a participant before the draw.
    pub fn withdraw(&mut self, id: Uuid, user: &str) -> Result<(), BracketError> {
        self.get_mut(id)?.withdraw(user)
    }

    /// Draw the bracket and return the semifinals.
    pub fn generate_bracket(
        &mut self,
        id: Uuid,
        publisher: &dyn Publisher,
    ) -> Result<Vec<TournamentMatch>, BracketError> {
        let tournament = self
            .tournaments
            .get_mut(&id)
            .ok_or(BracketError::TournamentNotFound(id))?;

        let notices = tournament.generate_bracket(&mut self.rng)?;
        let semis: Vec<TournamentMatch> = tournament.semifinals().cloned().collect();

        info!("Tournament {} bracket drawn", id);
        publish_all(publisher, id, notices);
        Ok(semis)
    }

    /// Record a result and advance the bracket as one unit.
    pub fn record_result(
        &mut self,
        id: Uuid,
        match_id: Uuid,
        winner: &str,
        publisher: &dyn Publisher,
    ) -> Result<ResultApplied, BracketError> {
        let current = self
            .tournaments
            .get(&id)
            .ok_or(BracketError::TournamentNotFound(id))?;

        let mut staged = current.clone();
        let applied = match staged.record_result(match_id, winner) {
            Ok(applied) => applied,
            Err(e) => {
                error!("Rejected result for match {} of tournament {}: {}", match_id, id, e);
                return Err(e);
            }
        };
        self.tournaments.insert(id, staged);

        info!(
            "Tournament {} {} {} won by {}",
            id,
            if applied.round == SEMIFINAL { "semifinal" } else { "final" },
            match_id,
            winner
        );
        publish_all(publisher, id, applied.notices.clone());
        Ok(applied)
    }

    /// Cancel a match and its tournament.
    pub fn cancel_match(
        &mut self,
        id: Uuid,
        match_id: Uuid,
        publisher: &dyn Publisher,
    ) -> Result<(), BracketError> {
        let notices = self.get_mut(id)?.cancel_match(match_id)?;
        info!("Tournament {} cancelled: match {} cannot be played", id, match_id);
        publish_all(publisher, id, notices);
        Ok(())
    }

    /// Cancel a tournament outright.
    pub fn cancel(&mut self, id: Uuid, publisher: &dyn Publisher) -> Result<(), BracketError> {
        let notices = self.get_mut(id)?.cancel();
        if !notices.is_empty() {
            info!("Tournament {} cancelled", id);
        }
        publish_all(publisher, id, notices);
        Ok(())
    }

    /// Forget a tournament.
    pub fn remove(&mut self, id: Uuid) -> Option<Tournament> {
        self.tournaments.remove(&id)
    }

    /// Number of tournaments.
    pub fn len(&self) -> usize {
        self.tournaments.len()
    }

    /// True if there are none.
    pub fn is_empty(&self) -> bool {
        self.tournaments.is_empty()
    }

    fn get_mut(&mut self, id: Uuid) -> Result<&mut Tournament, BracketError> {
        self.tournaments
            .get_mut(&id)
            .ok_or(BracketError::TournamentNotFound(id))
    }
}

fn publish_all(publisher: &dyn Publisher, id: Uuid, notices: Vec<Notice>) {
    for notice in notices {
        publisher.publish(notice.event, notice.payload, PublishScope::Tournament(id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::Outbox;

    fn drawn_book() -> (TournamentBook, Uuid, Vec<TournamentMatch>, Outbox) {
        let mut book = TournamentBook::new(77);
        let outbox = Outbox::new();
        let id = book.create();
        for p in ["p1", "p2", "p3", "p4"] {
            book.register(id, p).unwrap();
        }
        let semis = book.generate_bracket(id, &outbox).unwrap();
        (book, id, semis, outbox)
    }

    #[test]
    fn test_generate_publishes_start() {
        let (book, id, semis, outbox) = drawn_book();
        assert_eq!(semis.len(), 2);
        assert!(book.is_active(id));
        assert!(!book.is_registering(id));

        let events = outbox.drain();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, "tournament_started");
        assert_eq!(events[0].scope, PublishScope::Tournament(id));
    }

    #[test]
    fn test_record_publishes_after_commit() {
        let (mut book, id, semis, outbox) = drawn_book();
        outbox.drain();

        let w = semis[0].player_a.clone().unwrap();
        book.record_result(id, semis[0].id, &w, &outbox).unwrap();
        let events: Vec<String> = outbox.drain().into_iter().map(|p| p.event).collect();
        assert_eq!(events, vec!["match_finished"]);

        let w = semis[1].player_b.clone().unwrap();
        book.record_result(id, semis[1].id, &w, &outbox).unwrap();
        let events: Vec<String> = outbox.drain().into_iter().map(|p| p.event).collect();
        assert_eq!(events, vec!["match_finished", "match_ready"]);
    }

    #[test]
    fn test_rejected_result_leaves_book_untouched() {
        let (mut book, id, semis, outbox) = drawn_book();
        outbox.drain();
        let before = book.get(id).cloned();

        let err = book.record_result(id, semis[0].id, "stranger", &outbox);
        assert!(matches!(err, Err(BracketError::NotAParticipant { .. })));
        assert_eq!(book.get(id).cloned(), before);
        assert!(outbox.is_empty());
    }

    #[test]
    fn test_unknown_tournament() {
        let mut book = TournamentBook::new(1);
        let ghost = Uuid::new_v4();
        assert_eq!(book.register(ghost, "x"), Err(BracketError::TournamentNotFound(ghost)));
        assert!(!book.is_active(ghost));
    }

    #[test]
    fn test_cancel_match() {
        let (mut book, id, semis, outbox) = drawn_book();
        outbox.drain();
        book.cancel_match(id, semis[1].id, &outbox).unwrap();
        assert_eq!(book.get(id).unwrap().status, TournamentStatus::Cancelled);
        assert_eq!(outbox.drain()[0].event, "tournament_cancelled");
        assert!(book.remove(id).is_some());
        assert!(book.is_empty());
    }
}
