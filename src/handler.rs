use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::extract::ws::Message;
use axum::extract::ws::WebSocket;
use axum::extract::Path;
use axum::extract::State;
use axum::extract::WebSocketUpgrade;
use axum::response::IntoResponse;
use axum::Json;
use axum_extra::headers::authorization::Bearer;
use axum_extra::headers::Authorization;
use axum_extra::TypedHeader;
use futures::SinkExt;
use futures::StreamExt;
use tokio_stream::wrappers::WatchStream;

use crate::commitment::CommitmentTracker;
use crate::error::AppError;
use crate::home::HomeView;
use crate::lobby::{LobbyView, SessionState};
use crate::navigator::ChannelNavigator;
use crate::schema::{CreateMatchSchema, MatchIdResponse};
use crate::session::SessionResolver;
use crate::{AppState, LobbyError, LobbyScreen};

type BearerToken = TypedHeader<Authorization<Bearer>>;

/// The identity token, or 401 when the header is absent or malformed.
fn bearer(auth: Option<BearerToken>) -> Result<String, LobbyError> {
    auth.map(|TypedHeader(auth)| auth.token().to_string())
        .ok_or(LobbyError::MissingToken)
}

pub async fn get_me_handler(
    auth: Option<BearerToken>,
    State(data): State<Arc<AppState>>,
) -> Result<impl IntoResponse, AppError> {
    let user = data.resolve(&bearer(auth)?).await?;
    Ok(Json(user))
}

pub async fn get_home_handler(
    auth: Option<BearerToken>,
    State(data): State<Arc<AppState>>,
) -> Result<impl IntoResponse, AppError> {
    // The home screen renders with a placeholder name until a profile exists.
    let user = match auth {
        Some(TypedHeader(auth)) => data.resolve(auth.token()).await.ok(),
        None => None,
    };
    Ok(Json(HomeView::for_user(user.as_ref())))
}

pub async fn get_matches_handler(
    auth: Option<BearerToken>,
    State(data): State<Arc<AppState>>,
) -> Result<impl IntoResponse, AppError> {
    let user = data.resolve(&bearer(auth)?).await?;
    let matches = data
        .store
        .query_matches(&data.feed.config().query())
        .await
        .map_err(LobbyError::from)?;

    let mut tracker = CommitmentTracker::new();
    tracker.on_user(user);
    tracker.on_snapshot(matches);

    Ok(Json(LobbyView::build(&tracker, SessionState::Resolved, false)))
}

pub async fn create_match_handler(
    auth: Option<BearerToken>,
    State(data): State<Arc<AppState>>,
    body: Option<Json<CreateMatchSchema>>,
) -> Result<impl IntoResponse, AppError> {
    let user = data.resolve(&bearer(auth)?).await?;
    let Json(body) = body.unwrap_or_default();
    let name = body.name.filter(|n| !n.trim().is_empty());

    let match_id = data.actions.create_named_lobby(&user, name).await?;
    Ok(Json(MatchIdResponse { match_id }))
}

pub async fn join_match_handler(
    Path(match_id): Path<String>,
    auth: Option<BearerToken>,
    State(data): State<Arc<AppState>>,
) -> Result<impl IntoResponse, AppError> {
    let user = data.resolve(&bearer(auth)?).await?;
    let match_id = data.actions.join_match(&match_id, &user).await?;
    Ok(Json(MatchIdResponse { match_id }))
}

pub async fn handle_websocket(
    ws: WebSocketUpgrade,
    auth: Option<BearerToken>,
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, AppError> {
    let token = bearer(auth)?;
    Ok(ws.on_upgrade(move |socket| handle_socket_connection(socket, token, state)))
}

async fn handle_socket_connection(socket: WebSocket, token: String, state: Arc<AppState>) {
    let current_connections = state.connection_count.fetch_add(1, Ordering::SeqCst);
    tracing::info!(
        "New lobby connection. Total connections: {}",
        current_connections + 1
    );

    // Intents arrive over REST; this socket only pushes lobby views.
    let (navigator, _navigation) = ChannelNavigator::channel();
    let lobby = LobbyScreen::open_with(
        state.feed.clone(),
        state.actions.clone(),
        Arc::new(SessionResolver::new(state.store.clone())),
        token,
        Arc::new(navigator),
    );

    let (mut sender, mut receiver) = socket.split();
    let mut views = WatchStream::new(lobby.subscribe());

    let mut send_task = tokio::spawn(async move {
        while let Some(view) = views.next().await {
            match serde_json::to_string(&view) {
                Ok(msg) => {
                    if sender.send(Message::Text(msg)).await.is_err() {
                        break;
                    }
                }
                Err(e) => tracing::warn!("unable to encode lobby view: {}", e),
            }
        }
    });

    // Nothing is expected from the client; drain until it closes.
    let mut receive_task = tokio::spawn(async move {
        while let Some(Ok(message)) = receiver.next().await {
            if let Message::Close(_) = message {
                break;
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => receive_task.abort(),
        _ = &mut receive_task => send_task.abort(),
    };

    lobby.teardown();

    let remaining = state.connection_count.fetch_sub(1, Ordering::SeqCst) - 1;
    tracing::info!("Lobby connection closed. Remaining connections: {}", remaining);
}
