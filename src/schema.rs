use anyhow::{anyhow, Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::Type;

/// A lobby seats at most this many players, host excluded.
pub const MAX_PLAYERS: usize = 4;

/// The point-in-time set of matches delivered by one feed snapshot, newest first.
pub type MatchSet = Vec<Match>;

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Type)]
#[serde(rename_all = "kebab-case")]
#[sqlx(type_name = "match_status", rename_all = "kebab-case")]
pub enum Status {
    Matchmaking,
    InProgress,
    Complete,
    Abandoned,
}

impl Status {
    /// Statuses the lobby treats as "active".
    pub const ACTIVE: [Status; 2] = [Status::Matchmaking, Status::InProgress];

    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Matchmaking => "matchmaking",
            Status::InProgress => "in-progress",
            Status::Complete => "complete",
            Status::Abandoned => "abandoned",
        }
    }
}

impl TryFrom<&str> for Status {
    type Error = Error;

    fn try_from(s: &str) -> Result<Self> {
        match s {
            "matchmaking" => Ok(Status::Matchmaking),
            "in-progress" => Ok(Status::InProgress),
            "complete" => Ok(Status::Complete),
            "abandoned" => Ok(Status::Abandoned),
            _ => Err(anyhow!("Invalid status: {}", s)),
        }
    }
}

// For String
impl TryFrom<String> for Status {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Status::try_from(s.as_str())
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A resolved user profile.
///
/// `id` is assigned by the store, `uid` is the external identity token the
/// profile was provisioned for.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct User {
    pub id: String,
    pub uid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub name: String,
}

/// Snapshot of the creator taken when the match was hosted.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct HostRef {
    pub uid: String,
    pub username: String,
}

impl From<&User> for HostRef {
    fn from(user: &User) -> Self {
        Self {
            uid: user.id.clone(),
            username: user.name.clone(),
        }
    }
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct Match {
    pub id: String,
    pub host: HostRef,
    pub name: Option<String>,
    pub players: Vec<User>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub winner: Option<String>,
    pub status: Status,
}

impl Match {
    pub fn is_hosted_by(&self, user: &User) -> bool {
        self.host.uid == user.id
    }

    pub fn has_player(&self, user: &User) -> bool {
        self.players.iter().any(|p| p.id == user.id)
    }

    pub fn is_full(&self) -> bool {
        self.players.len() >= MAX_PLAYERS
    }
}

/// Fields the caller supplies when hosting; the store fills in the rest.
#[derive(Clone, Debug)]
pub struct NewMatch {
    pub host: HostRef,
    pub name: Option<String>,
}

/// A record paired with the store version it was read at.
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<T> {
    pub data: T,
    pub version: u64,
}

/// Filtered, ordered live query over the matches collection.
///
/// Ordering is always `created_at` descending.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MatchQuery {
    pub statuses: Vec<Status>,
    pub limit: usize,
}

impl MatchQuery {
    pub fn matches(&self, m: &Match) -> bool {
        self.statuses.contains(&m.status)
    }
}

/// One complete result set from a live query.
#[derive(Clone, Debug, PartialEq)]
pub struct StoreSnapshot {
    pub matches: MatchSet,
    /// Served from the client's local cache before the server answered.
    pub from_cache: bool,
}

// For json response
#[derive(Debug, Deserialize, Serialize)]
pub struct MatchIdResponse {
    pub match_id: String,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct CreateMatchSchema {
    #[serde(default)]
    pub name: Option<String>,
}
