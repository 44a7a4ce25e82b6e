use std::sync::Arc;

use anyhow::Context;
use axum::Router;
use sealedchat::{
    AppState, auth, cipher::MessageCipher, config::Config, rooms, rooms::hub::RoomHub, store::SqliteMessageStore,
};
use sqlx::sqlite::SqlitePoolOptions;
use tower_http::trace::TraceLayer;
use tower_sessions::{Expiry, MemoryStore, SessionManagerLayer, cookie::SameSite};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = Config::from_env().context("loading config")?;

    let db_pool = SqlitePoolOptions::new()
        .max_connections(config.db_max_connections)
        .connect(&config.database_url)
        .await
        .with_context(|| format!("connecting to {}", config.database_url))?;
    let store = SqliteMessageStore::new(db_pool);
    store.migrate().await.context("creating messages table")?;

    let cipher = MessageCipher::new(config.encryption_key.as_bytes()).context("ENCRYPTION_KEY")?;
    let hub = Arc::new(RoomHub::new(config.ws_write_timeout, config.ws_outbox_capacity));

    let app_state = AppState {
        cipher: Arc::new(cipher),
        store: Arc::new(store),
        hub: hub.clone(),
        auth: Arc::new(auth::SessionAuthGate),
    };

    let session_layer = SessionManagerLayer::new(MemoryStore::default())
        .with_secure(false)
        .with_same_site(SameSite::Lax)
        .with_expiry(Expiry::OnInactivity(time::Duration::days(config.session_ttl_days)));

    let app = Router::new()
        .merge(auth::router())
        .merge(rooms::router())
        .with_state(app_state)
        .layer(session_layer)
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("binding {}", config.bind_addr))?;
    info!(addr = %config.bind_addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
            hub.shutdown();
        })
        .await
        .context("serving")?;

    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if dotenv::var("LOG_FORMAT").is_ok_and(|f| f == "json") {
        builder.json().init();
    } else {
        builder.init();
    }
}
