use std::sync::Arc;

use anyhow::{Context, Result};
use blackboard::Blackboard;
use common::rate_limit::RateLimitLayer;
use fleet_server::auth::TokenStore;
use fleet_server::state::AppState;
use fleet_server::{auth, config};
use inbox_bridge::InboxBridge;
use message_bus::MessageBus;
use metrics_exporter_prometheus::PrometheusBuilder;
use persistence::Database;
use worker_manager::WorkerManager;

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let prometheus_handle = PrometheusBuilder::new().install_recorder().expect("failed to install Prometheus recorder");

    let settings = config::settings();

    let db = match &settings.database_url {
        Some(url) => Some(Database::connect(url, settings.db_pool_size).await.context("connecting to database")?),
        None => {
            tracing::warn!("no FLEET_DATABASE_URL configured; running without durable persistence or blackboard");
            None
        }
    };

    let bus = Arc::new(MessageBus::new());
    let blackboard = db.clone().map(|d| Arc::new(Blackboard::new(d, bus.clone())));
    let inbox = Arc::new(InboxBridge::new(settings.inbox_base_dir.clone()));

    let workers = Arc::new(WorkerManager::new(settings.manager_config(), bus.clone(), db.clone(), blackboard.clone(), Some(inbox)));
    workers.initialize().await;
    workers.spawn_health_monitor();

    let tokens = Arc::new(TokenStore::new(settings.token_ttl_secs));
    auth::spawn_cleanup_task(tokens.clone());

    let rate_limiter = RateLimitLayer::new(settings.rate_limit_rps, settings.rate_limit_burst);
    common::rate_limit::spawn_cleanup_task(rate_limiter.clone());

    let state = AppState { settings, workers, blackboard, db, tokens };
    let app = fleet_server::build_router(state, rate_limiter, prometheus_handle);

    let listener = tokio::net::TcpListener::bind(&settings.listen_addr).await.context("binding listen address")?;
    tracing::info!(addr = %settings.listen_addr, "fleet-server listening");

    axum::serve(listener, app.into_make_service_with_connect_info::<std::net::SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving HTTP")?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received, draining in-flight requests");
}
