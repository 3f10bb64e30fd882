use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

pub type Result<T, E = LobbyError> = std::result::Result<T, E>;

/// Why a join was rejected at write time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictReason {
    MatchGone,
    NotMatchmaking,
    IsHost,
    AlreadyJoined,
    Full,
    CommittedElsewhere,
    /// Every optimistic write attempt lost to a concurrent writer.
    Contended,
    /// The lobby never offered the requested control for this match.
    NotOffered,
}

impl std::fmt::Display for ConflictReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConflictReason::MatchGone => "match no longer exists",
            ConflictReason::NotMatchmaking => "match is no longer matchmaking",
            ConflictReason::IsHost => "user hosts this match",
            ConflictReason::AlreadyJoined => "user already joined this match",
            ConflictReason::Full => "match is full",
            ConflictReason::CommittedElsewhere => "user is committed to another active match",
            ConflictReason::Contended => "too many concurrent joins",
            ConflictReason::NotOffered => "control is not offered for this match",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error)]
pub enum LobbyError {
    /// The request carried no identity token at all.
    #[error("missing bearer token")]
    MissingToken,

    /// No profile is provisioned for the identity token.
    #[error("no user profile for identity '{token}'")]
    NotFound { token: String },

    /// More than one profile claims the identity token.
    #[error("{count} user profiles share identity '{token}'")]
    Ambiguous { token: String, count: usize },

    #[error("match no longer available: {0}")]
    Conflict(ConflictReason),

    #[error("store unreachable: {0}")]
    TransportFailure(String),

    /// Session or feed has not produced a value yet.
    #[error("lobby is not ready")]
    NotReady,
}

impl LobbyError {
    pub fn conflict(reason: ConflictReason) -> Self {
        Self::Conflict(reason)
    }

    /// Session failures block the lobby instead of surfacing as an error banner.
    pub fn is_not_ready(&self) -> bool {
        matches!(
            self,
            LobbyError::MissingToken
                | LobbyError::NotFound { .. }
                | LobbyError::Ambiguous { .. }
                | LobbyError::NotReady
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("concurrent write detected for {id} (expected version {expected}, got {actual})")]
    VersionConflict {
        id: String,
        expected: u64,
        actual: u64,
    },

    #[error("document not found: {collection}/{id}")]
    NotFound {
        collection: &'static str,
        id: String,
    },

    #[error("store transport error: {0}")]
    Transport(String),

    #[error("store serialization error: {0}")]
    Serde(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                StoreError::Serde(e.to_string())
            }
            other => StoreError::Transport(other.to_string()),
        }
    }
}

impl From<StoreError> for LobbyError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound { .. } => LobbyError::Conflict(ConflictReason::MatchGone),
            StoreError::VersionConflict { .. } => LobbyError::Conflict(ConflictReason::Contended),
            StoreError::Transport(msg) | StoreError::Serde(msg) => {
                LobbyError::TransportFailure(msg)
            }
        }
    }
}

/// Handler error: anything convertible to `anyhow::Error`, with lobby
/// failures mapped onto meaningful status codes.
pub struct AppError(anyhow::Error);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self.0.downcast_ref::<LobbyError>() {
            Some(LobbyError::MissingToken) | Some(LobbyError::NotFound { .. }) => {
                StatusCode::UNAUTHORIZED
            }
            Some(LobbyError::Ambiguous { .. }) => StatusCode::CONFLICT,
            Some(LobbyError::Conflict(_)) => StatusCode::CONFLICT,
            Some(LobbyError::TransportFailure(_)) | Some(LobbyError::NotReady) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            None => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            tracing::warn!("request failed: {:#}", self.0);
        }

        let body = Json(serde_json::json!({ "error": self.0.to_string() }));
        (status, body).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}
