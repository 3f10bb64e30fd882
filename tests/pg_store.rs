//! PgStore against a live database. Set `LOBBY_TEST_DATABASE_URL` to run;
//! without it these tests return early.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use sqlx::postgres::PgPoolOptions;
use tokio::time::timeout;

use ttt_lobby::schema::{HostRef, NewMatch};
use ttt_lobby::{DocumentStore, FeedConfig, MatchActions, MatchFeed, PgStore};

const WAIT: Duration = Duration::from_secs(10);

async fn connect(max_connections: u32) -> Option<PgStore> {
    let url = std::env::var("LOBBY_TEST_DATABASE_URL").ok()?;
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(3))
        .connect(&url)
        .await
        .unwrap();
    let store = PgStore::new(pool);
    store.migrate().await.unwrap();
    Some(store)
}

fn host(name: &str) -> NewMatch {
    NewMatch {
        host: HostRef {
            uid: format!("uid-{}", name),
            username: name.to_string(),
        },
        name: None,
    }
}

#[tokio::test]
async fn live_queries_share_one_listener() {
    let Some(store) = connect(3).await else {
        return;
    };
    let shared: Arc<dyn DocumentStore> = Arc::new(store.clone());
    let feed = MatchFeed::new(shared.clone(), FeedConfig::default());

    // Well past the pool size.
    let mut subscriptions = Vec::new();
    for i in 0..8 {
        let mut sub = feed.subscribe();
        let first = timeout(WAIT, sub.next()).await.unwrap().unwrap();
        assert!(first.is_ok(), "subscription {} failed: {:?}", i, first);
        subscriptions.push(sub);
    }

    // Writes still get a connection while every feed stays open.
    let user = shared
        .insert_user("tok-pg-host", None, "pg-host")
        .await
        .unwrap();
    let id = MatchActions::new(shared.clone())
        .create_named_lobby(&user, Some("pool".into()))
        .await
        .unwrap();

    for sub in subscriptions.iter_mut() {
        loop {
            let snapshot = timeout(WAIT, sub.next()).await.unwrap().unwrap().unwrap();
            if snapshot.iter().any(|m| m.id == id) {
                break;
            }
        }
    }
}

#[tokio::test]
async fn concurrent_creates_get_distinct_timestamps() {
    let Some(store) = connect(10).await else {
        return;
    };

    let mut handles = Vec::new();
    for i in 0..20 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            store.insert_match(host(&format!("racer-{}", i))).await
        }));
    }

    let mut stamps = Vec::new();
    for handle in handles {
        let id = handle.await.unwrap().unwrap();
        let m = store.get_match(&id).await.unwrap().unwrap();
        stamps.push(m.data.created_at);
    }
    stamps.sort();
    stamps.dedup();
    assert_eq!(stamps.len(), 20);
}
