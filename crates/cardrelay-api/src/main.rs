use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use cardrelay_api::{build_router, config::Config, feishu::FeishuClient, state::AppState};
use cardrelay_core::{spawn_daily_rebuild, PlaceholderService, TurnOrchestrator};
use cardrelay_llm::{ChatBackend, DifyClient};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = Config::load()
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;

    init_logging(&config);

    tracing::info!("Starting cardrelay");
    tracing::info!("Config loaded: {}:{}", config.server.host, config.server.port);

    let placeholders: Arc<dyn PlaceholderService> = Arc::new(FeishuClient::new(
        &config.feishu,
        config.feishu_app_id.clone(),
        config.feishu_app_secret.clone(),
    )?);
    let backend: Arc<dyn ChatBackend> = Arc::new(DifyClient::new(&config.backend())?);

    let orchestrator = TurnOrchestrator::new(placeholders, backend, config.relay());
    let pool = Arc::clone(orchestrator.pool());

    tracing::info!(target_size = config.pool.target_size, "Filling placeholder pool");
    let filled = pool.initialize(config.pool.target_size).await;
    if filled < pool.target() {
        tracing::warn!(filled, target = pool.target(), "Placeholder pool below target at startup");
    }

    let scheduler = spawn_daily_rebuild(
        Arc::clone(&pool),
        &config.pool.rebuild_cron,
        pool.cancellation_token(),
    )?;

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let state = Arc::new(AppState::new(config, orchestrator));
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);
    tracing::info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shutting down");
    pool.shutdown();
    if let Err(e) = scheduler.await {
        tracing::warn!("Rebuild scheduler did not stop cleanly: {}", e);
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
}

fn init_logging(config: &Config) {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(env_filter);

    match config.logging.format.as_str() {
        "json" => {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            registry
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
    }
}
