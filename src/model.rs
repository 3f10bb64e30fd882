use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;

use crate::error::StoreError;
use crate::schema::{HostRef, Match, Status, User, Versioned};

// For sqlx
#[derive(Debug, Deserialize, Serialize, sqlx::FromRow)]
pub struct UserModel {
    pub id: String,
    pub uid: String,
    pub email: Option<String>,
    pub name: String,
}

impl From<UserModel> for User {
    fn from(m: UserModel) -> Self {
        Self {
            id: m.id,
            uid: m.uid,
            email: m.email,
            name: m.name,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, sqlx::FromRow)]
pub struct MatchModel {
    pub id: String,
    pub host_uid: String,
    pub host_username: String,
    pub name: Option<String>,
    pub players: Json<Vec<User>>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub winner: Option<String>,
    pub status: Status,
    pub version: i64,
}

impl TryFrom<MatchModel> for Versioned<Match> {
    type Error = StoreError;

    fn try_from(m: MatchModel) -> Result<Self, Self::Error> {
        let version = u64::try_from(m.version)
            .map_err(|_| StoreError::Serde(format!("negative version on match {}", m.id)))?;
        Ok(Versioned {
            data: Match {
                id: m.id,
                host: HostRef {
                    uid: m.host_uid,
                    username: m.host_username,
                },
                name: m.name,
                players: m.players.0,
                created_at: m.created_at,
                started_at: m.started_at,
                ended_at: m.ended_at,
                winner: m.winner,
                status: m.status,
            },
            version,
        })
    }
}
