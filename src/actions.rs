//! Mutations of shared match state: hosting and joining.

use std::sync::Arc;

use crate::commitment;
use crate::error::{ConflictReason, LobbyError, Result, StoreError};
use crate::feed::FeedConfig;
use crate::schema::{HostRef, Match, NewMatch, Status, User, MAX_PLAYERS};
use crate::store::DocumentStore;

pub const DEFAULT_JOIN_ATTEMPTS: usize = 3;

/// Whether hosting is gated on the single-active-commitment rule.
///
/// Joining always is. Hosting historically was not, and `Unconditional`
/// keeps that behavior.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum HostingPolicy {
    #[default]
    Unconditional,
    RequireUncommitted,
}

impl TryFrom<&str> for HostingPolicy {
    type Error = String;

    fn try_from(s: &str) -> std::result::Result<Self, Self::Error> {
        match s {
            "unconditional" => Ok(HostingPolicy::Unconditional),
            "require-uncommitted" => Ok(HostingPolicy::RequireUncommitted),
            other => Err(format!("unknown hosting policy: {}", other)),
        }
    }
}

#[derive(Clone)]
pub struct MatchActions {
    store: Arc<dyn DocumentStore>,
    active: FeedConfig,
    hosting: HostingPolicy,
    join_attempts: usize,
}

impl MatchActions {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            active: FeedConfig::default(),
            hosting: HostingPolicy::default(),
            join_attempts: DEFAULT_JOIN_ATTEMPTS,
        }
    }

    pub fn with_hosting_policy(mut self, policy: HostingPolicy) -> Self {
        self.hosting = policy;
        self
    }

    pub fn with_join_attempts(mut self, attempts: usize) -> Self {
        self.join_attempts = attempts.max(1);
        self
    }

    /// The statuses (and limit) that count as "active" for commitment checks.
    pub fn with_active_matches(mut self, config: FeedConfig) -> Self {
        self.active = config;
        self
    }

    /// Insert a fresh `matchmaking` lobby hosted by `user`. Returns its id.
    pub async fn create_lobby(&self, user: &User) -> Result<String> {
        self.create_named_lobby(user, None).await
    }

    pub async fn create_named_lobby(&self, user: &User, name: Option<String>) -> Result<String> {
        if self.hosting == HostingPolicy::RequireUncommitted
            && self.committed_elsewhere(user, None).await?
        {
            tracing::warn!(user_id = %user.id, "host rejected: already committed");
            return Err(LobbyError::conflict(ConflictReason::CommittedElsewhere));
        }

        let id = self
            .store
            .insert_match(NewMatch {
                host: HostRef::from(user),
                name,
            })
            .await?;
        tracing::info!(match_id = %id, host = %user.id, "lobby created");
        Ok(id)
    }

    /// Append `user` to the match's players.
    ///
    /// Capacity, membership and status are re-validated against the stored
    /// record and the write is conditioned on the version that was read, so
    /// concurrent joins cannot overfill a match or add a player twice. The
    /// cross-match commitment check is re-run against a fresh query before
    /// writing; it is best-effort, since it spans several records.
    pub async fn join_match(&self, match_id: &str, user: &User) -> Result<String> {
        for attempt in 1..=self.join_attempts {
            let current = self
                .store
                .get_match(match_id)
                .await?
                .ok_or(LobbyError::Conflict(ConflictReason::MatchGone))?;

            if let Err(reason) = validate_join(&current.data, user) {
                tracing::warn!(match_id, user_id = %user.id, %reason, "join rejected");
                return Err(LobbyError::conflict(reason));
            }

            if self.committed_elsewhere(user, Some(match_id)).await? {
                tracing::warn!(match_id, user_id = %user.id, "join rejected: committed elsewhere");
                return Err(LobbyError::conflict(ConflictReason::CommittedElsewhere));
            }

            let mut players = current.data.players.clone();
            players.push(user.clone());

            match self
                .store
                .update_players(match_id, &players, current.version)
                .await
            {
                Ok(updated) => {
                    tracing::info!(
                        match_id,
                        user_id = %user.id,
                        players = updated.data.players.len(),
                        "joined match"
                    );
                    return Ok(match_id.to_string());
                }
                Err(StoreError::VersionConflict {
                    expected, actual, ..
                }) => {
                    tracing::debug!(match_id, attempt, expected, actual, "join lost a write race");
                }
                Err(e) => return Err(e.into()),
            }
        }

        tracing::warn!(match_id, user_id = %user.id, "join gave up after repeated races");
        Err(LobbyError::conflict(ConflictReason::Contended))
    }

    async fn committed_elsewhere(&self, user: &User, except: Option<&str>) -> Result<bool> {
        let active = self.store.query_matches(&self.active.query()).await?;
        let others: Vec<Match> = active
            .into_iter()
            .filter(|m| Some(m.id.as_str()) != except)
            .collect();
        Ok(commitment::compute(&others, user))
    }
}

/// Per-match join rules, checked against the authoritative record.
pub fn validate_join(m: &Match, user: &User) -> std::result::Result<(), ConflictReason> {
    if m.status != Status::Matchmaking {
        return Err(ConflictReason::NotMatchmaking);
    }
    if m.is_hosted_by(user) {
        return Err(ConflictReason::IsHost);
    }
    if m.has_player(user) {
        return Err(ConflictReason::AlreadyJoined);
    }
    if m.players.len() >= MAX_PLAYERS {
        return Err(ConflictReason::Full);
    }
    Ok(())
}
