#![allow(dead_code)]

use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::timeout;

use ttt_lobby::{DocumentStore, InMemoryStore, LobbyView, User};

pub const WAIT: Duration = Duration::from_secs(5);

pub async fn provision(store: &InMemoryStore, names: &[&str]) -> Vec<User> {
    let mut users = Vec::new();
    for name in names {
        users.push(
            store
                .insert_user(&token(name), Some(&format!("{}@example.com", name)), name)
                .await
                .unwrap(),
        );
    }
    users
}

pub fn token(name: &str) -> String {
    format!("tok-{}", name)
}

pub async fn wait_for_view<F>(rx: &mut watch::Receiver<LobbyView>, mut predicate: F) -> LobbyView
where
    F: FnMut(&LobbyView) -> bool,
{
    let view = timeout(WAIT, rx.wait_for(|v| predicate(v)))
        .await
        .expect("timed out waiting for lobby view")
        .expect("lobby closed");
    (*view).clone()
}

pub async fn next_navigation(rx: &mut mpsc::UnboundedReceiver<String>) -> String {
    timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for navigation")
        .expect("navigator dropped")
}
