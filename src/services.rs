//! External Collaborators
//!
//! Narrow capabilities the server consumes but does not own: who is behind
//! a connection, where finished matches are persisted, and where coarse
//! notifications go. Each comes with an in-process implementation used by
//! the binary and by tests.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Mutex, RwLock};

use serde::{Serialize, Deserialize};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

// =============================================================================
// CONNECTIONS & IDENTITY
// =============================================================================

/// Opaque handle of one transport connection.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConnectionId(pub u64);

impl fmt::Debug for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Authenticated user behind a connection.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    /// Stable user id (token subject).
    pub user_id: String,
    /// Name shown to other players.
    pub display_name: String,
}

impl Identity {
    /// Create an identity.
    pub fn new(user_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            display_name: display_name.into(),
        }
    }
}

/// Resolves the identity bound to a connection.
pub trait IdentityProvider: Send + Sync {
    /// `None` if the connection has not authenticated.
    fn identity_for_connection(&self, connection: ConnectionId) -> Option<Identity>;
}

/// Identities bound by the auth handshake.
#[derive(Debug, Default)]
pub struct IdentityDirectory {
    entries: RwLock<BTreeMap<ConnectionId, Identity>>,
}

impl IdentityDirectory {
    /// Empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind (or rebind) a connection to an identity.
    pub fn bind(&self, connection: ConnectionId, identity: Identity) {
        if let Ok(mut entries) = self.entries.write() {
            debug!("Bound {:?} to user {}", connection, identity.user_id);
            entries.insert(connection, identity);
        }
    }

    /// Forget a connection.
    pub fn unbind(&self, connection: ConnectionId) -> Option<Identity> {
        self.entries.write().ok()?.remove(&connection)
    }

    /// Number of bound connections.
    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    /// True if nothing is bound.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl IdentityProvider for IdentityDirectory {
    fn identity_for_connection(&self, connection: ConnectionId) -> Option<Identity> {
        self.entries.read().ok()?.get(&connection).cloned()
    }
}

// =============================================================================
// MATCH RECORDS
// =============================================================================

/// Kind of match being recorded.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MatchType {
    /// Online 2-player game.
    #[serde(rename = "1v1")]
    OneVsOne,
    /// Online 4-player game.
    #[serde(rename = "4p")]
    FourPlayer,
    /// Tournament semifinal or final.
    #[serde(rename = "tournament")]
    Tournament,
}

impl MatchType {
    /// Wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            MatchType::OneVsOne => "1v1",
            MatchType::FourPlayer => "4p",
            MatchType::Tournament => "tournament",
        }
    }
}

/// One finished match between two distinct users.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchRecord {
    /// Winner's user id.
    pub winner: String,
    /// Loser's user id.
    pub loser: String,
    /// Winner's final score.
    pub winner_score: u32,
    /// Loser's final score.
    pub loser_score: u32,
    /// What kind of match it was.
    pub match_type: MatchType,
}

/// Collaborator failures.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Backend could not be reached or refused the write.
    #[error("service unavailable: {0}")]
    Unavailable(String),
}

/// Persists finished matches.
pub trait MatchRecorder: Send + Sync {
    /// Store one result.
    fn record_match(&self, record: MatchRecord) -> Result<(), ServiceError>;
}

/// Keeps results in memory and logs them.
#[derive(Debug, Default)]
pub struct InMemoryRecorder {
    records: Mutex<Vec<MatchRecord>>,
}

impl InMemoryRecorder {
    /// Empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything recorded so far.
    pub fn records(&self) -> Vec<MatchRecord> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

impl MatchRecorder for InMemoryRecorder {
    fn record_match(&self, record: MatchRecord) -> Result<(), ServiceError> {
        info!(
            "Match recorded: {} beat {} {}-{} ({})",
            record.winner,
            record.loser,
            record.winner_score,
            record.loser_score,
            record.match_type.as_str()
        );
        self.records
            .lock()
            .map_err(|e| ServiceError::Unavailable(e.to_string()))?
            .push(record);
        Ok(())
    }
}

// =============================================================================
// NOTIFICATIONS
// =============================================================================

/// Audience of a notification.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "target", rename_all = "snake_case")]
pub enum PublishScope {
    /// Everyone following a tournament.
    Tournament(Uuid),
    /// Specific users.
    Participants(Vec<String>),
    /// Everyone.
    Global,
}

/// One published notification.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Publication {
    /// Event name, e.g. `match_ready`.
    pub event: String,
    /// Event body.
    pub payload: serde_json::Value,
    /// Audience.
    pub scope: PublishScope,
}

/// Coarse notification sink.
pub trait Publisher: Send + Sync {
    /// Publish one event.
    fn publish(&self, event: &str, payload: serde_json::Value, scope: PublishScope);
}

/// Buffers publications until drained.
#[derive(Debug, Default)]
pub struct Outbox {
    queue: Mutex<Vec<Publication>>,
}

impl Outbox {
    /// Empty outbox.
    pub fn new() -> Self {
        Self::default()
    }

    /// Take everything queued so far.
    pub fn drain(&self) -> Vec<Publication> {
        self.queue
            .lock()
            .map(|mut q| std::mem::take(&mut *q))
            .unwrap_or_default()
    }

    /// Number of queued publications.
    pub fn len(&self) -> usize {
        self.queue.lock().map(|q| q.len()).unwrap_or(0)
    }

    /// True if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Publisher for Outbox {
    fn publish(&self, event: &str, payload: serde_json::Value, scope: PublishScope) {
        if let Ok(mut queue) = self.queue.lock() {
            queue.push(Publication {
                event: event.to_string(),
                payload,
                scope,
            });
        }
    }
}

/// Logs every publication.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogPublisher;

impl Publisher for LogPublisher {
    fn publish(&self, event: &str, payload: serde_json::Value, scope: PublishScope) {
        info!("Published {} to {:?}: {}", event, scope, payload);
    }
}
