//! Application entry point for the `aquasense` backend service.
//!
//! Startup sequence:
//! - Load configuration from environment variables or `.env`
//! - Initialize structured logging/tracing
//! - Connect the primary and backup PostgreSQL stores and apply their schemas
//! - Build the provider client and the actuator cache
//! - Spawn the ingest, backup and reconciliation jobs
//! - Mount all API routes via the `routes` gateway and serve until Ctrl-C
//!
//! # Environment Variables
//! - `DATABASE_URL`, `BACKUP_DATABASE_URL` (**required**) – PostgreSQL connection strings
//! - `THINGSPEAK_CHANNEL_ID`, `THINGSPEAK_READ_API_KEY`, `THINGSPEAK_WRITE_API_KEY` (**required**)
//! - `AXUM_LOG_LEVEL` (optional) – log verbosity (default: `debug`)
//! - `AXUM_SPAN_EVENTS` (optional) – span event mode for tracing
//!
//! See `config.rs` for the optional tuning variables.
use std::{env, net::SocketAddr, sync::Arc};

use anyhow::Result;
use axum::Router;
use dotenvy::dotenv;
use is_terminal::IsTerminal;
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

use aquasense::actuators::ActuatorCache;
use aquasense::backup::BackupService;
use aquasense::config::{self, mask_db_url};
use aquasense::store::PrimaryStore;
use aquasense::telemetry::ThingSpeakClient;
use aquasense::{jobs, routes, AppState};

// ---

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    dotenv().ok();
    init_tracing();

    let cfg = config::load_from_env()?;
    cfg.log_config();

    tracing::info!(
        "Attempting to connect to primary database: {}",
        mask_db_url(&cfg.db_url)
    );
    let store = Arc::new(PrimaryStore::connect(&cfg.db_url, cfg.db_pool_max).await?);
    tracing::info!("Successfully connected to primary database");

    tracing::info!(
        "Attempting to connect to backup database: {}",
        mask_db_url(&cfg.backup_db_url)
    );
    let backup_pool = PgPoolOptions::new()
        .max_connections(cfg.db_pool_max)
        .connect(&cfg.backup_db_url)
        .await
        .map_err(|e| {
            anyhow::anyhow!(
                "Failed to connect to backup database '{}': {}",
                mask_db_url(&cfg.backup_db_url),
                e
            )
        })?;
    let backup = Arc::new(BackupService::initialize(Arc::clone(&store), backup_pool).await?);

    let telemetry = Arc::new(ThingSpeakClient::new(
        reqwest::Client::new(),
        cfg.thingspeak.clone(),
    ));
    let actuators = Arc::new(ActuatorCache::new());

    let cancel = CancellationToken::new();
    let handles = vec![
        jobs::spawn_ingest_job(
            Arc::clone(&store),
            Arc::clone(&telemetry),
            cfg.ingest_interval,
            cancel.clone(),
        ),
        jobs::spawn_backup_job(Arc::clone(&backup), cfg.backup_interval, cancel.clone()),
        jobs::spawn_reconcile_job(
            Arc::clone(&actuators),
            Arc::clone(&telemetry),
            cfg.reconcile_initial_delay,
            cfg.reconcile_interval,
            cancel.clone(),
        ),
    ];

    let state = AppState {
        store,
        backup,
        telemetry,
        actuators,
    };

    // Build app from routes gateway
    let app: Router = routes::router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.listen_port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel.clone()))
        .await?;

    cancel.cancel();
    for handle in handles {
        let _ = handle.await;
    }
    tracing::info!("Shutdown complete");
    Ok(())
}

/// Resolve on Ctrl-C and cancel the background jobs.
async fn shutdown_signal(cancel: CancellationToken) {
    // ---
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
    tracing::info!("Shutdown signal received");
    cancel.cancel();
}

// ---

/// Initialize the global tracing subscriber for structured logging.
///
/// - Color output controlled by TTY detection and `FORCE_COLOR` env var:
///   - `FORCE_COLOR=1|true|yes`: force colors on
///   - `FORCE_COLOR=0|false|no`: force colors off
///   - unset or other values: auto-detect TTY
/// - Span event emission mode controlled by the `AXUM_SPAN_EVENTS` env var:
///   - `"full"`       : emit ENTER, EXIT, and CLOSE events with timing
///   - `"enter_exit"` : emit ENTER and EXIT only
///   - unset or other values: emit CLOSE events only (default)
/// - Log level from `RUST_LOG`, else `AXUM_LOG_LEVEL`
fn init_tracing() {
    // ---
    let span_events = match env::var("AXUM_SPAN_EVENTS").as_deref() {
        Ok("full") => FmtSpan::FULL,
        Ok("enter_exit") => FmtSpan::ENTER | FmtSpan::EXIT,
        _ => FmtSpan::CLOSE,
    };

    let use_color = match env::var("FORCE_COLOR").as_deref() {
        Ok("1") | Ok("true") | Ok("yes") => true,
        Ok("0") | Ok("false") | Ok("no") => false,
        _ => std::io::stdout().is_terminal(),
    };

    let env_filter = if env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match env::var("AXUM_LOG_LEVEL").ok().as_deref() {
            Some("trace") => "trace",
            Some("debug") => "debug",
            Some("info") => "info",
            Some("warn") => "warn",
            Some("error") => "error",
            _ => "debug",
        };
        EnvFilter::new(format!("{level},sqlx::query=warn,hyper=info,reqwest=info"))
    };

    tracing_subscriber::fmt()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(span_events)
        .with_env_filter(env_filter)
        .with_ansi(use_color)
        .compact()
        .init();
}
