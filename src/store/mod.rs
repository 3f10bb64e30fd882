//! Document store seam.
//!
//! The lobby only ever talks to the shared store through [`DocumentStore`]:
//! point lookups, filtered live queries, inserts and version-conditioned
//! updates. The store owns ids, timestamps and versions.

mod memory;
mod postgres;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::StoreError;
use crate::schema::{Match, MatchQuery, NewMatch, StoreSnapshot, User, Versioned};

pub use memory::InMemoryStore;
pub use postgres::PgStore;

pub const MATCHES: &str = "matches";

/// Unbounded sequence of snapshots for one live query. Dropping it ends the
/// subscription.
pub type SnapshotStream = BoxStream<'static, Result<StoreSnapshot, StoreError>>;

#[async_trait]
pub trait DocumentStore: Send + Sync + 'static {
    /// All user profiles whose external identity equals `uid`.
    async fn find_users_by_uid(&self, uid: &str) -> Result<Vec<User>, StoreError>;

    /// Provision a profile for an external identity.
    async fn insert_user(
        &self,
        uid: &str,
        email: Option<&str>,
        name: &str,
    ) -> Result<User, StoreError>;

    async fn get_match(&self, id: &str) -> Result<Option<Versioned<Match>>, StoreError>;

    /// One-shot evaluation of a filtered query, newest first.
    async fn query_matches(&self, query: &MatchQuery) -> Result<Vec<Match>, StoreError>;

    /// Live version of [`query_matches`](Self::query_matches).
    ///
    /// Yields the current result set first, then a complete snapshot after
    /// every commit that changes it, in commit order.
    fn watch_matches(&self, query: MatchQuery) -> SnapshotStream;

    /// Insert a match in `matchmaking` with no players. Returns the new id.
    async fn insert_match(&self, new: NewMatch) -> Result<String, StoreError>;

    /// Replace `players` only if the stored version still equals
    /// `expected_version`.
    async fn update_players(
        &self,
        id: &str,
        players: &[User],
        expected_version: u64,
    ) -> Result<Versioned<Match>, StoreError>;
}
