//! Token ledger HTTP server.
//!
//! Serves balances, gated contacts and the purchase webhook over
//! PostgreSQL-backed stores, or in-memory stores with `--memory`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Error};
use pico_args::Arguments;
use token_ledger::{
    EntitlementTracker, TokenLedger, db::Database, entitlement::MemoryEntitlementStore,
    ledger::MemoryLedgerStore, purchase::PackageCatalog,
};
use token_server::{
    api::{self, AppState},
    config::{ServerConfig, StorageBackend},
    logging, metrics,
};

const HELP: &str = "\
Run the token ledger server

USAGE:
  token_server [OPTIONS]

OPTIONS:
  --bind       IP:PORT     Server socket bind address  [default: env SERVER_BIND or 127.0.0.1:3000]
  --db-url     URL         Database connection string  [default: env DATABASE_URL]

FLAGS:
  --memory                 Keep all state in process memory (no database)
  -h, --help               Print help information

ENVIRONMENT:
  SERVER_BIND              Server bind address (e.g., 0.0.0.0:8080)
  DATABASE_URL             PostgreSQL connection string
  METRICS_BIND             Prometheus exporter address (disabled when unset)
  FREE_CONTACTS_PER_MONTH  Free contacts per user and month [default: 1]
  LEDGER_LOCK_TIMEOUT_MS   Row lock wait limit [default: 5000]
  RUST_LOG                 Log filter [default: info,sqlx=warn,hyper=warn]
  (See .env file for all configuration options)
";

struct Args {
    bind: Option<SocketAddr>,
    database_url: Option<String>,
    memory: bool,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    // Load .env file if it exists
    let _ = dotenvy::dotenv();

    let mut pargs = Arguments::from_env();

    // Help has a higher priority and should be handled separately.
    if pargs.contains(["-h", "--help"]) {
        print!("{HELP}");
        std::process::exit(0);
    }

    let args = Args {
        bind: pargs
            .opt_value_from_str("--bind")
            .context("Invalid --bind address")?,
        database_url: pargs
            .opt_value_from_str("--db-url")
            .context("Invalid --db-url")?,
        memory: pargs.contains("--memory"),
    };

    logging::init();

    let config = ServerConfig::from_env(args.bind, args.database_url, args.memory)?;
    config.validate()?;

    if let Some(metrics_bind) = config.metrics_bind {
        metrics::init_metrics(metrics_bind).map_err(|e| anyhow::anyhow!(e))?;
        tracing::info!(%metrics_bind, "Prometheus exporter listening");
    }

    let state = match config.storage {
        StorageBackend::Memory => {
            tracing::warn!("Running on in-memory stores; all state is lost on shutdown");
            AppState::new(
                TokenLedger::new(Arc::new(MemoryLedgerStore::new()), config.ledger.clone()),
                EntitlementTracker::new(
                    Arc::new(MemoryEntitlementStore::new()),
                    config.entitlement.clone(),
                ),
                PackageCatalog::in_memory().with_query_timeout(config.ledger.query_timeout),
                config.gate.clone(),
                None,
            )
        }
        StorageBackend::Postgres => {
            tracing::info!("Connecting to database");
            let db = Database::new(&config.database)
                .await
                .context("Failed to connect to database")?;

            let started = Instant::now();
            db.migrate().await.context("Failed to run migrations")?;
            logging::log_slow_operation("migrate", started.elapsed().as_millis() as u64, 1000);
            metrics::db_connections_active(db.pool().size());
            tracing::info!("Database connected and migrated");

            AppState::with_database(
                db,
                config.ledger.clone(),
                config.entitlement.clone(),
                config.gate.clone(),
            )
        }
    };

    let database = state.database.clone();
    let app = api::create_router(state);

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind))?;

    tracing::info!(
        bind = %config.bind,
        "Server is running. Press Ctrl+C to stop."
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Shutting down server...");
    if let Some(database) = database {
        database.close().await;
    }

    Ok(())
}

/// Graceful shutdown signal
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to install CTRL+C signal handler");
        std::future::pending::<()>().await;
    }
}
