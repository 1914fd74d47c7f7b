//! Borrowdesk Server - Lab equipment borrowing
//!
//! REST API server for the borrow request lifecycle.

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use borrowdesk_server::{
    api,
    config::{AppConfig, TransportKind},
    repository::{BorrowStore, Repository},
    services::{
        broadcast::BroadcastHub, expiry::ExpiryScheduler, notifications::Publisher,
        redis::RedisPublisher, Services,
    },
    AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    let config = AppConfig::load().context("Failed to load configuration")?;

    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("borrowdesk_server={},tower_http=debug", config.logging.level).into()
    });

    let registry = tracing_subscriber::registry().with(filter);
    if config.logging.format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    tracing::info!("Starting Borrowdesk Server v{}", env!("CARGO_PKG_VERSION"));

    // Create database connection pool
    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .min_connections(config.database.min_connections)
        .connect(&config.database.url)
        .await
        .context("Failed to connect to database")?;

    tracing::info!("Connected to database");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run database migrations")?;

    tracing::info!("Database migrations completed");

    // Event transport
    let (publisher, hub): (Arc<dyn Publisher>, Option<BroadcastHub>) = match config.notifications.transport {
        TransportKind::Broadcast => {
            let hub = BroadcastHub::new(config.notifications.channel_capacity);
            (Arc::new(hub.clone()), Some(hub))
        }
        TransportKind::Redis => {
            let publisher = RedisPublisher::new(&config.redis.url)
                .await
                .context("Failed to connect to Redis")?;
            tracing::info!("Connected to Redis");
            (Arc::new(publisher), None)
        }
    };

    let store: Arc<dyn BorrowStore> = Arc::new(Repository::new(pool));
    let (scheduler, scheduler_handle) = ExpiryScheduler::new();
    let services = Services::new(
        store,
        publisher,
        hub,
        scheduler.clone(),
        &config.notifications,
        &config.borrow,
    );

    // Catch up on anything that came due while the server was down
    match services.borrow.sweep().await {
        Ok(report) => tracing::info!(
            expired = report.expired,
            overdue = report.overdue,
            "Recovery sweep completed"
        ),
        Err(e) => tracing::error!("Recovery sweep failed: {}", e),
    }
    if config.borrow.per_request_timers {
        let armed = services.borrow.rearm_timers().await?;
        tracing::info!("Re-armed {} expiry timers", armed);
    }
    let sweeper = scheduler.spawn_sweeper(
        services.borrow.clone(),
        Duration::from_secs(config.borrow.sweep_interval_seconds.max(1)),
    );

    let addr = SocketAddr::new(
        config.server.host.parse().context("Invalid host address")?,
        config.server.port,
    );

    let services = Arc::new(services);
    let state = AppState {
        config: Arc::new(config),
        services: services.clone(),
    };

    let app = api::create_router(state);

    tracing::info!("Server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shutting down");
    scheduler_handle.shutdown();
    if let Err(e) = sweeper.await {
        tracing::warn!("Sweeper task ended abnormally: {}", e);
    }
    services.notifier.close().await;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => tracing::error!("Failed to listen for SIGTERM: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
