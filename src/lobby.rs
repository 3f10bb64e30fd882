//! The multiplayer lobby screen.
//!
//! Opening a lobby spawns one background task that owns the match feed
//! subscription and the session lookup, reduces both into a [`LobbyView`]
//! and publishes it on a watch channel. Host and join intents run as
//! detached requests: they always finish, but once the screen is torn down
//! their result no longer navigates anywhere.

use std::sync::Arc;

use futures::StreamExt;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::actions::MatchActions;
use crate::commitment::{Commitment, CommitmentTracker};
use crate::eligibility::{self, LobbyEntry};
use crate::error::{ConflictReason, LobbyError, Result};
use crate::feed::MatchFeed;
use crate::navigator::LobbyNavigator;
use crate::schema::User;
use crate::session::SessionResolver;
use crate::store::DocumentStore;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "lowercase")]
pub enum SessionState {
    Pending,
    Resolved,
    /// No usable profile. Match-dependent UI stays blocked.
    Unavailable(String),
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LobbyView {
    pub session: SessionState,
    pub user: Option<User>,
    pub commitment: Commitment,
    /// At least one feed snapshot has arrived.
    pub loaded: bool,
    /// The most recent refresh failed; entries are from the last good snapshot.
    pub stale: bool,
    pub entries: Vec<LobbyEntry>,
}

impl LobbyView {
    fn initial() -> Self {
        Self {
            session: SessionState::Pending,
            user: None,
            commitment: Commitment::Unknown,
            loaded: false,
            stale: false,
            entries: Vec::new(),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.session == SessionState::Resolved && self.loaded
    }

    pub fn entry(&self, match_id: &str) -> Option<&LobbyEntry> {
        self.entries.iter().find(|e| e.id == match_id)
    }

    pub fn build(tracker: &CommitmentTracker, session: SessionState, stale: bool) -> Self {
        let commitment = tracker.state();
        let user = tracker.user().cloned();
        let entries = tracker
            .matches()
            .map(|matches| eligibility::entries(matches, user.as_ref(), commitment))
            .unwrap_or_default();

        Self {
            session,
            loaded: tracker.matches().is_some(),
            user,
            commitment,
            stale,
            entries,
        }
    }
}

pub struct LobbyScreen {
    actions: MatchActions,
    navigator: Arc<dyn LobbyNavigator>,
    view: watch::Receiver<LobbyView>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl LobbyScreen {
    /// Open a lobby for the identity `token` with default feed and action
    /// settings.
    pub fn open(
        store: Arc<dyn DocumentStore>,
        token: impl Into<String>,
        navigator: Arc<dyn LobbyNavigator>,
    ) -> Self {
        let feed = MatchFeed::new(store.clone(), Default::default());
        let actions = MatchActions::new(store.clone());
        let session = Arc::new(SessionResolver::new(store));
        Self::open_with(feed, actions, session, token, navigator)
    }

    pub fn open_with(
        feed: MatchFeed,
        actions: MatchActions,
        session: Arc<SessionResolver>,
        token: impl Into<String>,
        navigator: Arc<dyn LobbyNavigator>,
    ) -> Self {
        let (tx, view) = watch::channel(LobbyView::initial());
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(feed, session, token.into(), tx, cancel.clone()));

        Self {
            actions,
            navigator,
            view,
            cancel,
            task,
        }
    }

    pub fn view(&self) -> LobbyView {
        self.view.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<LobbyView> {
        self.view.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Release the feed subscription. In-flight requests keep running but
    /// will not navigate.
    pub fn teardown(&self) {
        if !self.cancel.is_cancelled() {
            tracing::debug!("lobby torn down");
            self.cancel.cancel();
        }
    }

    /// Host a new match and enter it.
    pub async fn host(&self) -> Result<Option<String>> {
        let user = self.resolved_user()?;
        let actions = self.actions.clone();
        let request = tokio::spawn(async move { actions.create_lobby(&user).await });
        let id = detached(request).await?;
        Ok(self.navigate(id))
    }

    /// Join a match the lobby currently offers a Join control for.
    pub async fn join(&self, match_id: &str) -> Result<Option<String>> {
        let user = self.resolved_user()?;
        let offered = self
            .view
            .borrow()
            .entry(match_id)
            .map(|e| e.controls.join)
            .unwrap_or(false);
        if !offered {
            return Err(LobbyError::conflict(ConflictReason::NotOffered));
        }

        let actions = self.actions.clone();
        let match_id = match_id.to_string();
        let request = tokio::spawn(async move { actions.join_match(&match_id, &user).await });
        let id = detached(request).await?;
        Ok(self.navigate(id))
    }

    /// Re-enter a match the user already hosts or plays in.
    pub fn enter(&self, match_id: &str) -> Result<()> {
        let offered = self
            .view
            .borrow()
            .entry(match_id)
            .map(|e| e.controls.enter)
            .unwrap_or(false);
        if !offered {
            return Err(LobbyError::conflict(ConflictReason::NotOffered));
        }
        self.navigator.enter(match_id);
        Ok(())
    }

    fn resolved_user(&self) -> Result<User> {
        let view = self.view.borrow();
        match (&view.session, &view.user) {
            (SessionState::Resolved, Some(user)) => Ok(user.clone()),
            _ => Err(LobbyError::NotReady),
        }
    }

    fn navigate(&self, match_id: String) -> Option<String> {
        if self.cancel.is_cancelled() {
            tracing::debug!(%match_id, "discarding result for closed lobby");
            return None;
        }
        self.navigator.enter(&match_id);
        Some(match_id)
    }
}

impl Drop for LobbyScreen {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.task.abort();
    }
}

async fn detached(request: JoinHandle<Result<String>>) -> Result<String> {
    request
        .await
        .map_err(|e| LobbyError::TransportFailure(format!("request task failed: {}", e)))?
}

async fn run(
    feed: MatchFeed,
    session: Arc<SessionResolver>,
    token: String,
    tx: watch::Sender<LobbyView>,
    cancel: CancellationToken,
) {
    let mut snapshots = feed.subscribe();
    let resolve = session.resolve(&token);
    tokio::pin!(resolve);

    let mut resolving = true;
    // Set after a transport failure; the next good snapshot retries.
    let mut retry_session = false;
    let mut session_state = SessionState::Pending;
    let mut stale = false;
    let mut tracker = CommitmentTracker::new();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            result = &mut resolve, if resolving => {
                resolving = false;
                session_state = match result {
                    Ok(user) => {
                        tracing::info!(user_id = %user.id, "lobby session resolved");
                        tracker.on_user(user);
                        SessionState::Resolved
                    }
                    Err(e) if e.is_not_ready() => {
                        tracing::warn!("no usable profile for lobby session: {}", e);
                        SessionState::Unavailable(e.to_string())
                    }
                    Err(e) => {
                        tracing::warn!(
                            "lobby session lookup failed, retrying on next snapshot: {}",
                            e
                        );
                        retry_session = true;
                        SessionState::Unavailable(e.to_string())
                    }
                };
            }
            next = snapshots.next() => match next {
                Some(Ok(matches)) => {
                    tracker.on_snapshot(matches);
                    stale = false;
                    if retry_session {
                        retry_session = false;
                        resolving = true;
                        session_state = SessionState::Pending;
                        resolve.set(session.resolve(&token));
                    }
                }
                Some(Err(_)) => {
                    tracker.on_transport_failure();
                    stale = true;
                }
                None => break,
            },
        }

        tx.send_replace(LobbyView::build(&tracker, session_state.clone(), stale));
    }

    tracing::debug!("lobby feed subscription released");
}
