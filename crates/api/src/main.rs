// Outreach API server
// Decision: Storage backend chosen by DATABASE_URL; no URL means the in-memory dev store
// Decision: The scheduler loop shares the process and stops with the HTTP server

use std::sync::Arc;

use anyhow::{Context, Result};
use outreach_api::build_app;
use outreach_api::telemetry::{init_telemetry, TelemetryConfig};
use outreach_campaign_http::HttpCampaignAdapter;
use outreach_engine::{
    EngineConfig, InMemoryStore, OutreachEngine, OutreachStore, PostgresStore,
};
use tokio::sync::watch;

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:9000";
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 10;

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is fine; the environment may already be set
    let _ = dotenvy::dotenv();

    // Configure via environment variables:
    // - RUST_LOG or LOG_LEVEL: Log filter
    //   (default: "outreach_api=debug,outreach_engine=debug,tower_http=debug")
    // - LOG_FORMAT: "json" for JSON lines
    let mut telemetry_config = TelemetryConfig::from_env();
    telemetry_config.service_version = Some(env!("CARGO_PKG_VERSION").to_string());
    init_telemetry(telemetry_config);

    tracing::info!("outreach-api starting...");

    let config = EngineConfig::from_env().context("Invalid engine configuration")?;
    tracing::info!(
        tick_interval_ms = config.tick_interval.as_millis() as u64,
        batch_size = config.batch_size,
        concurrency = config.concurrency,
        "Engine configured"
    );

    let engine = match std::env::var("DATABASE_URL").ok().filter(|u| !u.is_empty()) {
        Some(url) => {
            let max_connections = std::env::var("DB_MAX_CONNECTIONS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_DB_MAX_CONNECTIONS);
            let store = PostgresStore::connect(&url, max_connections)
                .await
                .context("Failed to connect to database")?;
            tracing::info!("Connected to database");

            let run_migrations = std::env::var("RUN_MIGRATIONS")
                .map(|v| v != "false" && v != "0")
                .unwrap_or(true);
            if run_migrations {
                store.migrate().await.context("Failed to run migrations")?;
                tracing::info!("Database migrations applied");
            }
            build_engine(Arc::new(store), config)?
        }
        None => {
            tracing::warn!("DATABASE_URL not set; using in-memory store (data is lost on restart)");
            build_engine(Arc::new(InMemoryStore::new()), config)?
        }
    };
    let engine = Arc::new(engine);

    // Load API prefix from environment (default: empty)
    // Example: API_PREFIX="/api" results in routes like /api/v1/workflows
    let api_prefix = std::env::var("API_PREFIX").unwrap_or_default();
    if !api_prefix.is_empty() {
        tracing::info!(prefix = %api_prefix, "API prefix configured");
    }

    let app = build_app(engine.clone(), &api_prefix);

    // Background scheduler
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = engine.scheduler_loop(shutdown_rx).spawn();

    let addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string());
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;
    tracing::info!("HTTP server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
            tracing::info!("Received shutdown signal");
        })
        .await
        .context("Server error")?;

    let _ = shutdown_tx.send(true);
    if let Err(e) = scheduler.await {
        tracing::error!(error = %e, "Scheduler loop ended abnormally");
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

fn build_engine<S: OutreachStore>(store: Arc<S>, config: EngineConfig) -> Result<OutreachEngine> {
    let mut builder = OutreachEngine::builder(store).config(config);

    match HttpCampaignAdapter::from_env().context("Invalid campaign provider configuration")? {
        Some(adapter) => {
            tracing::info!(adapter = ?adapter, "Campaign provider registered");
            builder = builder.adapter(Arc::new(adapter));
        }
        None => {
            tracing::info!("Campaign provider not configured (CAMPAIGN_API_URL / CAMPAIGN_API_KEY unset)");
        }
    }

    Ok(builder.build())
}
