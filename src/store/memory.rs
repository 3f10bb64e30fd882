//! InMemoryStore - DashMap-backed document store for tests and local development.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::watch;
use uuid::Uuid;

use super::{DocumentStore, SnapshotStream, MATCHES};
use crate::error::StoreError;
use crate::schema::{Match, MatchQuery, NewMatch, Status, StoreSnapshot, User, Versioned};

struct Inner {
    users: DashMap<String, User>,
    matches: DashMap<String, Versioned<Match>>,
    /// Bumped on every committed write; live queries re-evaluate on change.
    revision: watch::Sender<u64>,
    /// Last assigned `created_at`, in microseconds.
    clock: AtomicI64,
    reachable: AtomicBool,
}

/// Clone-friendly via Arc; clones share the same collections.
#[derive(Clone)]
pub struct InMemoryStore {
    inner: Arc<Inner>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                users: DashMap::new(),
                matches: DashMap::new(),
                revision,
                clock: AtomicI64::new(i64::MIN),
                reachable: AtomicBool::new(true),
            }),
        }
    }

    /// Simulate losing (or regaining) the connection to the store. Live
    /// queries re-evaluate on every toggle.
    pub fn set_reachable(&self, reachable: bool) {
        self.inner.reachable.store(reachable, Ordering::SeqCst);
        self.commit();
    }

    /// Lifecycle transition owned by the in-match flow.
    pub fn set_status(&self, id: &str, status: Status) -> Result<Versioned<Match>, StoreError> {
        self.ensure_reachable()?;
        let updated = {
            let mut entry = self
                .inner
                .matches
                .get_mut(id)
                .ok_or_else(|| not_found(id))?;
            entry.data.status = status;
            if status == Status::InProgress && entry.data.started_at.is_none() {
                entry.data.started_at = Some(Utc::now());
            }
            if matches!(status, Status::Complete | Status::Abandoned) {
                entry.data.ended_at = Some(Utc::now());
            }
            entry.version += 1;
            entry.value().clone()
        };
        self.commit();
        Ok(updated)
    }

    fn commit(&self) {
        self.inner.revision.send_modify(|rev| *rev += 1);
    }

    fn ensure_reachable(&self) -> Result<(), StoreError> {
        if self.inner.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Transport("store unreachable".into()))
        }
    }

    /// Server time, strictly increasing across calls.
    fn next_timestamp(&self) -> Result<DateTime<Utc>, StoreError> {
        let now = Utc::now().timestamp_micros();
        let prev = match self.inner.clock.fetch_update(
            Ordering::SeqCst,
            Ordering::SeqCst,
            |last| Some(now.max(last.saturating_add(1))),
        ) {
            Ok(prev) | Err(prev) => prev,
        };
        let micros = now.max(prev.saturating_add(1));
        DateTime::from_timestamp_micros(micros)
            .ok_or_else(|| StoreError::Serde(format!("timestamp out of range: {}", micros)))
    }

    fn run_query(&self, query: &MatchQuery) -> Result<Vec<Match>, StoreError> {
        self.ensure_reachable()?;
        let mut results: Vec<Match> = self
            .inner
            .matches
            .iter()
            .filter(|entry| query.matches(&entry.data))
            .map(|entry| entry.data.clone())
            .collect();
        results.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        results.truncate(query.limit);
        Ok(results)
    }
}

fn not_found(id: &str) -> StoreError {
    StoreError::NotFound {
        collection: MATCHES,
        id: id.to_string(),
    }
}

struct WatchState {
    store: InMemoryStore,
    rx: watch::Receiver<u64>,
    query: MatchQuery,
    last: Option<Vec<Match>>,
    started: bool,
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn find_users_by_uid(&self, uid: &str) -> Result<Vec<User>, StoreError> {
        self.ensure_reachable()?;
        Ok(self
            .inner
            .users
            .iter()
            .filter(|u| u.uid == uid)
            .map(|u| u.value().clone())
            .collect())
    }

    async fn insert_user(
        &self,
        uid: &str,
        email: Option<&str>,
        name: &str,
    ) -> Result<User, StoreError> {
        self.ensure_reachable()?;
        let user = User {
            id: Uuid::new_v4().to_string(),
            uid: uid.to_string(),
            email: email.map(str::to_string),
            name: name.to_string(),
        };
        self.inner.users.insert(user.id.clone(), user.clone());
        Ok(user)
    }

    async fn get_match(&self, id: &str) -> Result<Option<Versioned<Match>>, StoreError> {
        self.ensure_reachable()?;
        Ok(self.inner.matches.get(id).map(|m| m.value().clone()))
    }

    async fn query_matches(&self, query: &MatchQuery) -> Result<Vec<Match>, StoreError> {
        self.run_query(query)
    }

    fn watch_matches(&self, query: MatchQuery) -> SnapshotStream {
        let state = WatchState {
            store: self.clone(),
            rx: self.inner.revision.subscribe(),
            query,
            last: None,
            started: false,
        };

        Box::pin(futures::stream::unfold(state, |mut st| async move {
            loop {
                if st.started && st.rx.changed().await.is_err() {
                    return None;
                }
                st.started = true;
                st.rx.borrow_and_update();

                match st.store.run_query(&st.query) {
                    Ok(matches) => {
                        // Commits outside the query's result set are not changes to it.
                        if st.last.as_ref() == Some(&matches) {
                            continue;
                        }
                        st.last = Some(matches.clone());
                        let snapshot = StoreSnapshot {
                            matches,
                            from_cache: false,
                        };
                        return Some((Ok(snapshot), st));
                    }
                    Err(e) => {
                        st.last = None;
                        return Some((Err(e), st));
                    }
                }
            }
        }))
    }

    async fn insert_match(&self, new: NewMatch) -> Result<String, StoreError> {
        self.ensure_reachable()?;
        let id = Uuid::new_v4().to_string();
        let record = Match {
            id: id.clone(),
            host: new.host,
            name: new.name,
            players: Vec::new(),
            created_at: self.next_timestamp()?,
            started_at: None,
            ended_at: None,
            winner: None,
            status: Status::Matchmaking,
        };
        self.inner.matches.insert(
            id.clone(),
            Versioned {
                data: record,
                version: 1,
            },
        );
        self.commit();
        tracing::debug!(match_id = %id, "match inserted");
        Ok(id)
    }

    async fn update_players(
        &self,
        id: &str,
        players: &[User],
        expected_version: u64,
    ) -> Result<Versioned<Match>, StoreError> {
        self.ensure_reachable()?;
        let updated = {
            // The entry guard holds the shard lock, so check-and-write is atomic.
            let mut entry = self
                .inner
                .matches
                .get_mut(id)
                .ok_or_else(|| not_found(id))?;
            if entry.version != expected_version {
                return Err(StoreError::VersionConflict {
                    id: id.to_string(),
                    expected: expected_version,
                    actual: entry.version,
                });
            }
            entry.data.players = players.to_vec();
            entry.version += 1;
            entry.value().clone()
        };
        self.commit();
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::HostRef;
    use futures::StreamExt;

    fn host(id: &str) -> NewMatch {
        NewMatch {
            host: HostRef {
                uid: id.into(),
                username: id.into(),
            },
            name: None,
        }
    }

    fn active(limit: usize) -> MatchQuery {
        MatchQuery {
            statuses: Status::ACTIVE.to_vec(),
            limit,
        }
    }

    #[tokio::test]
    async fn insert_assigns_defaults_and_version_one() {
        let store = InMemoryStore::new();
        let id = store.insert_match(host("a")).await.unwrap();

        let m = store.get_match(&id).await.unwrap().unwrap();
        assert_eq!(m.version, 1);
        assert_eq!(m.data.status, Status::Matchmaking);
        assert!(m.data.players.is_empty());
        assert!(m.data.winner.is_none());
        assert!(m.data.started_at.is_none());
    }

    #[tokio::test]
    async fn created_at_is_strictly_increasing() {
        let store = InMemoryStore::new();
        let mut stamps = Vec::new();
        for _ in 0..20 {
            let id = store.insert_match(host("a")).await.unwrap();
            stamps.push(store.get_match(&id).await.unwrap().unwrap().data.created_at);
        }
        assert!(stamps.windows(2).all(|w| w[0] < w[1]));
    }

    #[tokio::test]
    async fn update_with_stale_version_fails() {
        let store = InMemoryStore::new();
        let id = store.insert_match(host("a")).await.unwrap();
        let player = store.insert_user("tok", None, "bo").await.unwrap();

        let updated = store
            .update_players(&id, std::slice::from_ref(&player), 1)
            .await
            .unwrap();
        assert_eq!(updated.version, 2);

        let err = store.update_players(&id, &[], 1).await.unwrap_err();
        assert_eq!(
            err,
            StoreError::VersionConflict {
                id: id.clone(),
                expected: 1,
                actual: 2
            }
        );
    }

    #[tokio::test]
    async fn update_missing_match_is_not_found() {
        let store = InMemoryStore::new();
        let err = store.update_players("nope", &[], 1).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn query_filters_orders_and_limits() {
        let store = InMemoryStore::new();
        let mut ids = Vec::new();
        for _ in 0..5 {
            ids.push(store.insert_match(host("a")).await.unwrap());
        }
        store.set_status(&ids[4], Status::Complete).unwrap();

        let result = store.query_matches(&active(3)).await.unwrap();
        let got: Vec<_> = result.iter().map(|m| m.id.clone()).collect();
        assert_eq!(got, vec![ids[3].clone(), ids[2].clone(), ids[1].clone()]);
    }

    #[tokio::test]
    async fn watch_emits_initial_then_changes() {
        let store = InMemoryStore::new();
        let mut stream = store.watch_matches(active(100));

        let first = stream.next().await.unwrap().unwrap();
        assert!(first.matches.is_empty());

        let id = store.insert_match(host("a")).await.unwrap();
        let second = stream.next().await.unwrap().unwrap();
        assert_eq!(second.matches.len(), 1);
        assert_eq!(second.matches[0].id, id);
    }

    #[tokio::test]
    async fn watch_reports_unreachable_store() {
        let store = InMemoryStore::new();
        let mut stream = store.watch_matches(active(100));
        stream.next().await.unwrap().unwrap();

        store.set_reachable(false);
        let err = stream.next().await.unwrap().unwrap_err();
        assert!(matches!(err, StoreError::Transport(_)));

        store.set_reachable(true);
        let recovered = stream.next().await.unwrap().unwrap();
        assert!(recovered.matches.is_empty());
    }
}
