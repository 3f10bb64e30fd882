//! Resolves an external identity token into the user's profile record.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::error::{LobbyError, Result};
use crate::schema::User;
use crate::store::DocumentStore;

/// Uncached lookup of the unique profile for `token`.
pub async fn lookup_user(store: &dyn DocumentStore, token: &str) -> Result<User> {
    let mut users = store.find_users_by_uid(token).await?;
    match users.len() {
        0 => Err(LobbyError::NotFound {
            token: token.to_string(),
        }),
        1 => Ok(users.remove(0)),
        count => {
            tracing::error!(token, count, "identity token maps to several user profiles");
            Err(LobbyError::Ambiguous {
                token: token.to_string(),
                count,
            })
        }
    }
}

/// Session-scoped resolver. Holds on to the resolved profile until the
/// identity token changes.
pub struct SessionResolver {
    store: Arc<dyn DocumentStore>,
    cached: Mutex<Option<(String, User)>>,
}

impl SessionResolver {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            cached: Mutex::new(None),
        }
    }

    pub async fn resolve(&self, token: &str) -> Result<User> {
        let mut cached = self.cached.lock().await;
        if let Some((cached_token, user)) = cached.as_ref() {
            if cached_token == token {
                tracing::debug!(user_id = %user.id, "session cache hit");
                return Ok(user.clone());
            }
        }

        // Failures are not cached so a later provisioning is picked up.
        *cached = None;
        let user = lookup_user(self.store.as_ref(), token).await?;
        *cached = Some((token.to_string(), user.clone()));
        Ok(user)
    }

    /// The profile for the current token, if one has been resolved.
    pub async fn current(&self) -> Option<User> {
        self.cached.lock().await.as_ref().map(|(_, u)| u.clone())
    }
}

pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(60);

/// Above this many entries, expired ones are swept on insert.
const SWEEP_THRESHOLD: usize = 4096;

struct CachedUser {
    user: User,
    resolved_at: Instant,
}

/// Token-keyed cache shared by every session on the server. Entries are
/// re-checked against the store once they are older than `ttl`, which also
/// catches profiles that became ambiguous after the first lookup.
pub struct SessionCache {
    users: DashMap<String, CachedUser>,
    ttl: Duration,
}

impl Default for SessionCache {
    fn default() -> Self {
        Self::with_ttl(DEFAULT_SESSION_TTL)
    }
}

impl SessionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            users: DashMap::new(),
            ttl,
        }
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    pub async fn resolve(&self, store: &dyn DocumentStore, token: &str) -> Result<User> {
        let fresh = self
            .users
            .get(token)
            .filter(|entry| entry.resolved_at.elapsed() < self.ttl)
            .map(|entry| entry.user.clone());
        if let Some(user) = fresh {
            return Ok(user);
        }

        let user = match lookup_user(store, token).await {
            Ok(user) => user,
            Err(e) => {
                self.users.remove(token);
                return Err(e);
            }
        };

        if self.users.len() >= SWEEP_THRESHOLD {
            self.sweep();
        }
        self.users.insert(
            token.to_string(),
            CachedUser {
                user: user.clone(),
                resolved_at: Instant::now(),
            },
        );
        Ok(user)
    }

    fn sweep(&self) {
        let ttl = self.ttl;
        self.users.retain(|_, entry| entry.resolved_at.elapsed() < ttl);
        tracing::debug!(remaining = self.users.len(), "swept expired sessions");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;

    #[tokio::test]
    async fn resolves_unique_profile() {
        let store = InMemoryStore::new();
        let ada = store.insert_user("tok-ada", Some("ada@example.com"), "ada").await.unwrap();

        let user = lookup_user(&store, "tok-ada").await.unwrap();
        assert_eq!(user, ada);
    }

    #[tokio::test]
    async fn missing_profile_is_not_found() {
        let store = InMemoryStore::new();
        let err = lookup_user(&store, "nobody").await.unwrap_err();
        assert!(matches!(err, LobbyError::NotFound { token } if token == "nobody"));
    }

    #[tokio::test]
    async fn duplicate_profiles_are_ambiguous() {
        let store = InMemoryStore::new();
        store.insert_user("tok", None, "one").await.unwrap();
        store.insert_user("tok", None, "two").await.unwrap();

        let err = lookup_user(&store, "tok").await.unwrap_err();
        assert!(matches!(err, LobbyError::Ambiguous { count: 2, .. }));
    }

    #[tokio::test]
    async fn resolver_caches_until_token_changes() {
        let store = InMemoryStore::new();
        let ada = store.insert_user("tok-ada", None, "ada").await.unwrap();
        let bo = store.insert_user("tok-bo", None, "bo").await.unwrap();
        let resolver = SessionResolver::new(Arc::new(store.clone()));

        assert_eq!(resolver.resolve("tok-ada").await.unwrap(), ada);

        // Cached: an outage does not affect the current session.
        store.set_reachable(false);
        assert_eq!(resolver.resolve("tok-ada").await.unwrap(), ada);

        // A different token forces a fresh lookup.
        let err = resolver.resolve("tok-bo").await.unwrap_err();
        assert!(matches!(err, LobbyError::TransportFailure(_)));
        assert!(resolver.current().await.is_none());

        store.set_reachable(true);
        assert_eq!(resolver.resolve("tok-bo").await.unwrap(), bo);
        assert_eq!(resolver.current().await, Some(bo));
    }

    #[tokio::test]
    async fn shared_cache_serves_fresh_entries() {
        let store = InMemoryStore::new();
        let ada = store.insert_user("tok-ada", None, "ada").await.unwrap();
        let cache = SessionCache::new();

        assert_eq!(cache.resolve(&store, "tok-ada").await.unwrap(), ada);
        store.set_reachable(false);
        assert_eq!(cache.resolve(&store, "tok-ada").await.unwrap(), ada);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn expired_entries_are_revalidated() {
        let store = InMemoryStore::new();
        store.insert_user("tok-ada", None, "ada").await.unwrap();
        let cache = SessionCache::with_ttl(Duration::ZERO);
        cache.resolve(&store, "tok-ada").await.unwrap();

        // A second profile for the same identity shows up later.
        store.insert_user("tok-ada", None, "imposter").await.unwrap();
        let err = cache.resolve(&store, "tok-ada").await.unwrap_err();
        assert!(matches!(err, LobbyError::Ambiguous { count: 2, .. }));
        assert!(cache.is_empty());
    }
}
