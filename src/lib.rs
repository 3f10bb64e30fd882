//! Matchmaking lobby core for the ultimate tic-tac-toe client.
//!
//! Discovers live matches, decides whether the signed-in user may host,
//! join or re-enter one, and mutates shared match state in the document
//! store without letting concurrent joins overfill a lobby.

pub mod actions;
pub mod commitment;
pub mod config;
pub mod eligibility;
pub mod error;
pub mod feed;
pub mod handler;
pub mod home;
pub mod lobby;
pub mod model;
pub mod navigator;
pub mod route;
pub mod schema;
pub mod session;
pub mod store;

use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

pub use actions::{HostingPolicy, MatchActions};
pub use commitment::{Commitment, CommitmentTracker};
pub use config::Config;
pub use error::{ConflictReason, LobbyError, StoreError};
pub use feed::{FeedConfig, MatchFeed};
pub use lobby::{LobbyScreen, LobbyView};
pub use navigator::LobbyNavigator;
pub use schema::{Match, Status, User};
pub use store::{DocumentStore, InMemoryStore, PgStore};

use session::SessionCache;

pub struct AppState {
    pub store: Arc<dyn DocumentStore>,
    pub feed: MatchFeed,
    pub actions: MatchActions,
    pub sessions: SessionCache,
    pub connection_count: AtomicUsize,
}

impl AppState {
    pub fn new(store: Arc<dyn DocumentStore>, config: &Config) -> Self {
        let feed = MatchFeed::new(store.clone(), config.feed());
        let actions = MatchActions::new(store.clone())
            .with_active_matches(config.feed())
            .with_hosting_policy(config.hosting_policy)
            .with_join_attempts(config.join_attempts);

        Self {
            store,
            feed,
            actions,
            sessions: SessionCache::with_ttl(config.session_ttl),
            connection_count: AtomicUsize::new(0),
        }
    }

    pub async fn resolve(&self, token: &str) -> Result<User, LobbyError> {
        self.sessions.resolve(self.store.as_ref(), token).await
    }
}
