mod support;

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::StreamExt;
use tokio::time::timeout;

use ttt_lobby::schema::{HostRef, MatchQuery, NewMatch, StoreSnapshot, Versioned};
use ttt_lobby::store::SnapshotStream;
use ttt_lobby::{
    DocumentStore, FeedConfig, InMemoryStore, LobbyError, Match, MatchActions, MatchFeed,
    Status, StoreError, User,
};

use support::{provision, WAIT};

fn feed(store: &InMemoryStore, config: FeedConfig) -> MatchFeed {
    MatchFeed::new(Arc::new(store.clone()), config)
}

#[tokio::test]
async fn empty_result_is_delivered() {
    let store = InMemoryStore::new();
    let mut snapshots = feed(&store, FeedConfig::default()).subscribe();

    let first = timeout(WAIT, snapshots.next()).await.unwrap().unwrap().unwrap();
    assert!(first.is_empty());
}

#[tokio::test]
async fn becoming_empty_is_delivered() {
    let store = InMemoryStore::new();
    let users = provision(&store, &["ana"]).await;
    let id = MatchActions::new(Arc::new(store.clone()))
        .create_lobby(&users[0])
        .await
        .unwrap();

    let mut snapshots = feed(&store, FeedConfig::default()).subscribe();
    let first = timeout(WAIT, snapshots.next()).await.unwrap().unwrap().unwrap();
    assert_eq!(first.len(), 1);

    store.set_status(&id, Status::Abandoned).unwrap();
    let next = timeout(WAIT, snapshots.next()).await.unwrap().unwrap().unwrap();
    assert!(next.is_empty());
}

#[tokio::test]
async fn snapshots_are_active_newest_first_and_limited() {
    let store = InMemoryStore::new();
    let users = provision(&store, &["ana"]).await;
    let actions = MatchActions::new(Arc::new(store.clone()));

    let mut ids = Vec::new();
    for _ in 0..110 {
        ids.push(actions.create_lobby(&users[0]).await.unwrap());
    }
    store.set_status(&ids[109], Status::Complete).unwrap();
    store.set_status(&ids[108], Status::InProgress).unwrap();
    store.set_status(&ids[107], Status::Abandoned).unwrap();

    let mut snapshots = feed(&store, FeedConfig::default()).subscribe();
    let snapshot = timeout(WAIT, snapshots.next()).await.unwrap().unwrap().unwrap();

    assert_eq!(snapshot.len(), 100);
    assert!(snapshot
        .iter()
        .all(|m| matches!(m.status, Status::Matchmaking | Status::InProgress)));
    assert!(snapshot
        .windows(2)
        .all(|w| w[0].created_at > w[1].created_at));
    assert_eq!(snapshot[0].id, ids[108]);
    assert_eq!(snapshot[1].id, ids[106]);
}

#[tokio::test]
async fn dropping_the_subscription_releases_it() {
    let store = InMemoryStore::new();
    let users = provision(&store, &["ana"]).await;
    let mut snapshots = feed(&store, FeedConfig::with_limit(5)).subscribe();
    timeout(WAIT, snapshots.next()).await.unwrap().unwrap().unwrap();
    drop(snapshots);

    // Writes keep working with nobody listening.
    MatchActions::new(Arc::new(store.clone()))
        .create_lobby(&users[0])
        .await
        .unwrap();
}

/// Replays a fixed sequence of live-query results.
struct ScriptedStore {
    inner: InMemoryStore,
    script: Mutex<Vec<Result<StoreSnapshot, StoreError>>>,
}

#[async_trait]
impl DocumentStore for ScriptedStore {
    async fn find_users_by_uid(&self, uid: &str) -> Result<Vec<User>, StoreError> {
        self.inner.find_users_by_uid(uid).await
    }

    async fn insert_user(
        &self,
        uid: &str,
        email: Option<&str>,
        name: &str,
    ) -> Result<User, StoreError> {
        self.inner.insert_user(uid, email, name).await
    }

    async fn get_match(&self, id: &str) -> Result<Option<Versioned<Match>>, StoreError> {
        self.inner.get_match(id).await
    }

    async fn query_matches(&self, query: &MatchQuery) -> Result<Vec<Match>, StoreError> {
        self.inner.query_matches(query).await
    }

    fn watch_matches(&self, _query: MatchQuery) -> SnapshotStream {
        let script = std::mem::take(&mut *self.script.lock().unwrap());
        futures::stream::iter(script).boxed()
    }

    async fn insert_match(&self, new: NewMatch) -> Result<String, StoreError> {
        self.inner.insert_match(new).await
    }

    async fn update_players(
        &self,
        id: &str,
        players: &[User],
        expected_version: u64,
    ) -> Result<Versioned<Match>, StoreError> {
        self.inner.update_players(id, players, expected_version).await
    }
}

#[tokio::test]
async fn only_cached_empty_glitches_are_suppressed() {
    let inner = InMemoryStore::new();
    let id = inner
        .insert_match(NewMatch {
            host: HostRef {
                uid: "a".into(),
                username: "ana".into(),
            },
            name: None,
        })
        .await
        .unwrap();
    let one = inner.get_match(&id).await.unwrap().unwrap().data;

    let store = ScriptedStore {
        inner,
        script: Mutex::new(vec![
            Ok(StoreSnapshot {
                matches: vec![],
                from_cache: true,
            }),
            Ok(StoreSnapshot {
                matches: vec![one.clone()],
                from_cache: true,
            }),
            Err(StoreError::Transport("reset".into())),
            Ok(StoreSnapshot {
                matches: vec![],
                from_cache: false,
            }),
        ]),
    };

    let delivered: Vec<_> = MatchFeed::new(Arc::new(store), FeedConfig::default())
        .subscribe()
        .collect()
        .await;

    assert_eq!(delivered.len(), 3);
    assert_eq!(delivered[0].as_ref().unwrap(), &vec![one]);
    assert!(matches!(delivered[1], Err(LobbyError::TransportFailure(_))));
    assert!(delivered[2].as_ref().unwrap().is_empty());
}
