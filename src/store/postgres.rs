//! PgStore - Postgres-backed document store.
//!
//! Live queries ride on a single `LISTEN matches_changed` per store; the
//! trigger installed by the migrations notifies on every insert or update of
//! `matches`, and each notification re-evaluates every open live query.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgListener, PgPool};
use sqlx::types::Json;
use tokio::sync::watch;
use uuid::Uuid;

use super::{DocumentStore, SnapshotStream, MATCHES};
use crate::error::StoreError;
use crate::model::{MatchModel, UserModel};
use crate::schema::{Match, MatchQuery, NewMatch, Status, StoreSnapshot, User, Versioned};

pub const CHANGE_CHANNEL: &str = "matches_changed";

const MATCH_COLUMNS: &str = "id, host_uid, host_username, name, players, created_at, \
                             started_at, ended_at, winner, status, version";

/// Advisory lock taken by every match insert.
const CREATE_LOCK_KEY: i64 = 0x7474_745f_6c6f_6262;

const RELISTEN_DELAY: Duration = Duration::from_secs(1);

/// Clones share the pool and the change listener.
#[derive(Clone)]
pub struct PgStore {
    db: PgPool,
    changes: Arc<ChangeFeed>,
}

impl PgStore {
    /// The store keeps one pooled connection for LISTEN once the first live
    /// query opens, so size the pool for at least two.
    pub fn new(db: PgPool) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            db,
            changes: Arc::new(ChangeFeed {
                revision,
                started: AtomicBool::new(false),
            }),
        }
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.db)
            .await
            .map_err(|e| StoreError::Transport(format!("migration failed: {}", e)))
    }

    async fn fetch_matches(db: &PgPool, query: &MatchQuery) -> Result<Vec<Match>, StoreError> {
        let statuses: Vec<&str> = query.statuses.iter().map(Status::as_str).collect();
        let limit = i64::try_from(query.limit).unwrap_or(i64::MAX);
        let rows: Vec<MatchModel> = sqlx::query_as(&format!(
            "SELECT {} FROM matches WHERE status::text = ANY($1) \
             ORDER BY created_at DESC LIMIT $2",
            MATCH_COLUMNS
        ))
        .bind(statuses)
        .bind(limit)
        .fetch_all(db)
        .await?;

        rows.into_iter()
            .map(|row| Versioned::<Match>::try_from(row).map(|v| v.data))
            .collect()
    }
}

/// Revision counter bumped whenever `matches` changes. A single
/// `PgListener` feeds it, however many live queries are open.
struct ChangeFeed {
    revision: watch::Sender<u64>,
    started: AtomicBool,
}

impl ChangeFeed {
    fn subscribe(&self, db: &PgPool) -> watch::Receiver<u64> {
        if !self.started.swap(true, Ordering::SeqCst) {
            tokio::spawn(listen_for_changes(db.clone(), self.revision.clone()));
        }
        self.revision.subscribe()
    }
}

async fn connect_listener(db: &PgPool) -> Result<PgListener, StoreError> {
    let mut listener = PgListener::connect_with(db).await?;
    listener.listen(CHANGE_CHANNEL).await?;
    Ok(listener)
}

/// Holds one pooled connection for LISTEN and bumps `revision` on every
/// notification. Connection loss also bumps it, so live queries surface the
/// outage and re-evaluate once the listener is back.
async fn listen_for_changes(db: PgPool, revision: watch::Sender<u64>) {
    let bump = |rev: &mut u64| *rev += 1;

    while !db.is_closed() {
        let mut listener = match connect_listener(&db).await {
            Ok(listener) => listener,
            Err(e) => {
                tracing::warn!("unable to listen on {}: {}", CHANGE_CHANNEL, e);
                revision.send_modify(bump);
                tokio::time::sleep(RELISTEN_DELAY).await;
                continue;
            }
        };
        tracing::debug!("listening on {}", CHANGE_CHANNEL);
        // Commits made while we were not listening are picked up here.
        revision.send_modify(bump);

        loop {
            match listener.recv().await {
                Ok(_) => revision.send_modify(bump),
                Err(e) => {
                    tracing::warn!("lost {} listener: {}", CHANGE_CHANNEL, e);
                    revision.send_modify(bump);
                    break;
                }
            }
        }
        tokio::time::sleep(RELISTEN_DELAY).await;
    }
}

struct WatchState {
    db: PgPool,
    rx: watch::Receiver<u64>,
    query: MatchQuery,
    last: Option<Vec<Match>>,
    started: bool,
}

#[async_trait]
impl DocumentStore for PgStore {
    async fn find_users_by_uid(&self, uid: &str) -> Result<Vec<User>, StoreError> {
        let rows: Vec<UserModel> =
            sqlx::query_as(r#"SELECT id, uid, email, name FROM users WHERE uid = $1"#)
                .bind(uid)
                .fetch_all(&self.db)
                .await?;
        Ok(rows.into_iter().map(User::from).collect())
    }

    async fn insert_user(
        &self,
        uid: &str,
        email: Option<&str>,
        name: &str,
    ) -> Result<User, StoreError> {
        let row: UserModel = sqlx::query_as(
            r#"
            INSERT INTO users (id, uid, email, name)
            VALUES ($1, $2, $3, $4)
            RETURNING id, uid, email, name
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(uid)
        .bind(email)
        .bind(name)
        .fetch_one(&self.db)
        .await?;
        Ok(row.into())
    }

    async fn get_match(&self, id: &str) -> Result<Option<Versioned<Match>>, StoreError> {
        let row: Option<MatchModel> = sqlx::query_as(&format!(
            "SELECT {} FROM matches WHERE id = $1",
            MATCH_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        row.map(Versioned::<Match>::try_from).transpose()
    }

    async fn query_matches(&self, query: &MatchQuery) -> Result<Vec<Match>, StoreError> {
        Self::fetch_matches(&self.db, query).await
    }

    fn watch_matches(&self, query: MatchQuery) -> SnapshotStream {
        let state = WatchState {
            db: self.db.clone(),
            rx: self.changes.subscribe(&self.db),
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

                match Self::fetch_matches(&st.db, &st.query).await {
                    Ok(matches) => {
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
        let id = Uuid::new_v4().to_string();
        let mut tx = self.db.begin().await?;

        // Serialize creates so created_at stays strictly increasing even when
        // the clock has not moved.
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(CREATE_LOCK_KEY)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            INSERT INTO matches (id, host_uid, host_username, name, players, created_at, status, version)
            VALUES (
                $1, $2, $3, $4, '[]'::jsonb,
                GREATEST(
                    clock_timestamp(),
                    COALESCE((SELECT MAX(created_at) FROM matches), 'epoch'::timestamptz)
                        + interval '1 microsecond'
                ),
                'matchmaking', 1
            )
            "#,
        )
        .bind(&id)
        .bind(&new.host.uid)
        .bind(&new.host.username)
        .bind(&new.name)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        tracing::debug!(match_id = %id, "match inserted");
        Ok(id)
    }

    async fn update_players(
        &self,
        id: &str,
        players: &[User],
        expected_version: u64,
    ) -> Result<Versioned<Match>, StoreError> {
        let expected = i64::try_from(expected_version)
            .map_err(|_| StoreError::Serde(format!("version overflow on match {}", id)))?;

        let row: Option<MatchModel> = sqlx::query_as(&format!(
            "UPDATE matches SET players = $2, version = version + 1 \
             WHERE id = $1 AND version = $3 RETURNING {}",
            MATCH_COLUMNS
        ))
        .bind(id)
        .bind(Json(players))
        .bind(expected)
        .fetch_optional(&self.db)
        .await?;

        if let Some(row) = row {
            return Versioned::<Match>::try_from(row);
        }

        // Nothing updated: either the match is gone or someone wrote first.
        let actual: Option<i64> = sqlx::query_scalar(r#"SELECT version FROM matches WHERE id = $1"#)
            .bind(id)
            .fetch_optional(&self.db)
            .await?;

        match actual {
            Some(actual) => Err(StoreError::VersionConflict {
                id: id.to_string(),
                expected: expected_version,
                actual: u64::try_from(actual).unwrap_or_default(),
            }),
            None => Err(StoreError::NotFound {
                collection: MATCHES,
                id: id.to_string(),
            }),
        }
    }
}
