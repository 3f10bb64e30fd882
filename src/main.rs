use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ttt_lobby::route::create_router;
use ttt_lobby::{AppState, Config, DocumentStore, InMemoryStore, PgStore};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("{}=debug", env!("CARGO_CRATE_NAME")).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().expect("invalid configuration");

    let store: Arc<dyn DocumentStore> = match &config.database_url {
        Some(url) => {
            // set up connection pool
            let pool = postgres::PgPoolOptions::new()
                .max_connections(config.db_max_connections)
                .acquire_timeout(Duration::from_secs(3))
                .connect(url)
                .await
                .expect("can't connect to database");

            let store = PgStore::new(pool);
            store.migrate().await.expect("can't run migrations");
            Arc::new(store)
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using the in-memory store");
            Arc::new(InMemoryStore::new())
        }
    };

    let app = create_router(Arc::new(AppState::new(store, &config)));

    let listener = TcpListener::bind(config.bind_addr).await.unwrap();
    tracing::debug!("listening on {}", listener.local_addr().unwrap());
    axum::serve(listener, app).await.unwrap();
}
