//! Live, filtered view of the active matches.

use std::sync::Arc;

use futures::stream::BoxStream;
use futures::StreamExt;

use crate::error::{LobbyError, Result};
use crate::schema::{MatchQuery, MatchSet, Status, StoreSnapshot};
use crate::store::DocumentStore;

pub const DEFAULT_FEED_LIMIT: usize = 100;

/// What the lobby considers an "active" match. The store evaluates it; the
/// feed never sorts or filters on its own.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FeedConfig {
    pub statuses: Vec<Status>,
    pub limit: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            statuses: Status::ACTIVE.to_vec(),
            limit: DEFAULT_FEED_LIMIT,
        }
    }
}

impl FeedConfig {
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit,
            ..Self::default()
        }
    }

    pub fn query(&self) -> MatchQuery {
        MatchQuery {
            statuses: self.statuses.clone(),
            limit: self.limit,
        }
    }
}

/// Snapshots delivered to the lobby. Dropping the stream cancels the
/// subscription.
pub type FeedSubscription = BoxStream<'static, Result<MatchSet>>;

#[derive(Clone)]
pub struct MatchFeed {
    store: Arc<dyn DocumentStore>,
    config: FeedConfig,
}

impl MatchFeed {
    pub fn new(store: Arc<dyn DocumentStore>, config: FeedConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &FeedConfig {
        &self.config
    }

    pub fn subscribe(&self) -> FeedSubscription {
        let stream = self.store.watch_matches(self.config.query());
        stream
            .filter_map(|item| async move {
                match item {
                    Ok(snapshot) if is_transient_glitch(&snapshot) => {
                        tracing::warn!("suppressing empty snapshot served from local cache");
                        None
                    }
                    Ok(snapshot) => {
                        tracing::debug!(count = snapshot.matches.len(), "match snapshot");
                        Some(Ok(snapshot.matches))
                    }
                    Err(e) => {
                        tracing::warn!("match feed transport failure: {}", e);
                        Some(Err(LobbyError::TransportFailure(e.to_string())))
                    }
                }
            })
            .boxed()
    }
}

/// An empty result that never reached the server. Every other snapshot,
/// empty ones included, is delivered.
pub fn is_transient_glitch(snapshot: &StoreSnapshot) -> bool {
    snapshot.from_cache && snapshot.matches.is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{HostRef, Match};
    use chrono::Utc;

    fn sample() -> Match {
        Match {
            id: "m".into(),
            host: HostRef {
                uid: "a".into(),
                username: "a".into(),
            },
            name: None,
            players: vec![],
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
            winner: None,
            status: Status::Matchmaking,
        }
    }

    #[test]
    fn only_cached_empty_snapshots_are_glitches() {
        let server_empty = StoreSnapshot {
            matches: vec![],
            from_cache: false,
        };
        let cached_empty = StoreSnapshot {
            matches: vec![],
            from_cache: true,
        };
        let cached_full = StoreSnapshot {
            matches: vec![sample()],
            from_cache: true,
        };
        assert!(!is_transient_glitch(&server_empty));
        assert!(is_transient_glitch(&cached_empty));
        assert!(!is_transient_glitch(&cached_full));
    }

    #[test]
    fn default_config_covers_active_statuses() {
        let config = FeedConfig::default();
        assert_eq!(config.limit, 100);
        assert_eq!(config.statuses, vec![Status::Matchmaking, Status::InProgress]);
        assert_eq!(FeedConfig::with_limit(7).query().limit, 7);
    }
}
