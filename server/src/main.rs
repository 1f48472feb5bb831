use std::sync::Arc;

use axum::Router;
use dotenvy::dotenv;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use theatre_server::auth::ensure_staff;
use theatre_server::config::{Config, StoreBackend};
use theatre_server::routes::create_routes;
use theatre_server::state::AppState;
use theatre_server::store::{InMemoryStore, PgStore, TheatreStore};

#[tokio::main]
async fn main() {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "theatre_server=debug,tower_http=info".into()),
        )
        .init();

    let config = Config::from_env();

    let store: Arc<dyn TheatreStore> = match config.store {
        StoreBackend::Postgres => {
            let store = PgStore::connect(&config.database_url, config.max_connections)
                .await
                .expect("Failed to connect to database");
            tracing::info!("Successfully connected to database");

            store.migrate().await.expect("Failed to run migrations");
            tracing::info!("Migrations run successfully");
            Arc::new(store)
        }
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory store; data is lost on shutdown");
            Arc::new(InMemoryStore::new())
        }
    };

    if let Some(admin) = &config.admin {
        ensure_staff(store.as_ref(), &admin.email, &admin.password)
            .await
            .expect("Failed to bootstrap staff account");
    }

    let app: Router = create_routes(AppState::new(store, &config));

    let addr = config.bind_addr();
    tracing::info!("🚀 Server running at http://{}", addr);

    let listener = TcpListener::bind(addr)
        .await
        .expect("Failed to bind address");

    axum::serve(listener, app).await.expect("Server failed");
}
