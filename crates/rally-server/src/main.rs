mod config;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use rally_api::{AppStateInner, router};
use rally_db::Database;
use rally_engine::travel::{AmapEstimator, StraightLineEstimator, TravelEstimator};
use rally_engine::{Engine, ReminderScheduler};
use rally_gateway::Dispatcher;

use crate::config::ServerConfig;

const AMAP_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rally=debug,rally_engine=debug,tower_http=debug".into()),
        )
        .init();

    let config = ServerConfig::from_env()?;

    let db = Arc::new(Database::open(&config.db_path)?);

    let estimator: Arc<dyn TravelEstimator> = match &config.amap_key {
        Some(key) => {
            info!("Using AMap routing ({}, {})", config.amap_city, config.engine.route_mode);
            Arc::new(AmapEstimator::new(key.clone(), config.amap_city.clone(), AMAP_TIMEOUT)?)
        }
        None => {
            info!("RALLY_AMAP_KEY not set, travel times are straight-line estimates");
            Arc::new(StraightLineEstimator)
        }
    };

    let dispatcher = Dispatcher::new();
    let engine = Arc::new(
        Engine::new(db.clone(), estimator, config.engine.clone()).with_notifier(Arc::new(dispatcher.clone())),
    );

    let scheduler = ReminderScheduler::new(engine.clone());
    scheduler.start();

    let app = router(Arc::new(AppStateInner {
        engine,
        db,
        dispatcher,
        jwt_secret: config.jwt_secret,
    }))
    .layer(CorsLayer::permissive())
    .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("Rally server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    scheduler.stop().await;
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
                tracing::warn!("Failed to install SIGTERM handler: {}", e);
                ctrl_c.await.ok();
                info!("Received Ctrl+C, shutting down...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
