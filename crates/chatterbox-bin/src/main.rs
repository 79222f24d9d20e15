// ============================
// crates/chatterbox-bin/src/main.rs
// ============================
//! Chatterbox server: wiring and lifecycle.
use chatterbox_lib::store::{SqliteStore, Store};
use chatterbox_lib::{config::Settings, hub::Hub, ws_router, AppState};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    let settings = Settings::load();
    info!(?settings, "configuration loaded");

    let store = Arc::new(SqliteStore::open(&settings.db_path).await?);
    info!(db_path = %settings.db_path, "store opened");

    let hub = Hub::new(store.clone(), settings.max_rooms, settings.max_history);
    let hub_runner = hub.clone();
    tokio::spawn(async move { hub_runner.run().await });

    let addr = format!("0.0.0.0:{}", settings.port);
    let app = ws_router::create_router(AppState::new(hub.clone(), store.clone(), settings));

    let listener = TcpListener::bind(&addr).await?;
    info!(%addr, "chatterbox listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("shutting down");
    hub.stop();
    store.close().await?;

    Ok(())
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
