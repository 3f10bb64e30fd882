use std::sync::Arc;

use axum::{
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        Method,
    },
    routing::{any, get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::{DefaultOnResponse, TraceLayer},
};
use tracing::Level;

use crate::handler::{
    create_match_handler, get_home_handler, get_matches_handler, get_me_handler,
    handle_websocket, join_match_handler,
};
use crate::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_origin(Any)
        .allow_headers([CONTENT_TYPE, AUTHORIZATION]);

    let trace_layer =
        TraceLayer::new_for_http().on_response(DefaultOnResponse::new().level(Level::INFO));

    Router::new()
        .route("/ws", any(handle_websocket))
        .route("/api/me", get(get_me_handler))
        .route("/api/home", get(get_home_handler))
        .route(
            "/api/matches",
            get(get_matches_handler).post(create_match_handler),
        )
        .route("/api/matches/:match_id/join", post(join_match_handler))
        .layer(cors)
        .layer(trace_layer)
        .with_state(state)
}
