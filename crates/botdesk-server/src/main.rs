mod config;

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{error, info};

use botdesk_api::auth::{AppState, AppStateInner};
use botdesk_api::ingest::LogIngestor;
use botdesk_api::routes::router;
use botdesk_api::storage::Storage;

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "botdesk=debug,tower_http=debug".into()),
        )
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("FATAL: {:#}", e);
            std::process::exit(1);
        }
    };

    // Init database and private storage
    let db = botdesk_db::Database::open(&config.db_path)?;
    let storage = Storage::new(config.storage_dir.clone()).await?;

    let state: AppState = Arc::new(AppStateInner {
        db,
        storage,
        jwt_secret: config.jwt_secret.clone(),
        ingestor: Arc::new(LogIngestor),
    });

    let app = router(state);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("Botdesk listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
                }
            }
            Err(e) => {
                error!("Could not install SIGTERM handler: {}", e);
                ctrl_c.await.ok();
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
