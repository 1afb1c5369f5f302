//! HTTP API for the token ledger.
//!
//! A thin orchestration layer: every handler delegates to the ledger, the
//! contact gate or the purchase reconciler and maps their errors to JSON.
//!
//! # Modules
//!
//! - [`tokens`]: Balance, summary, transaction history and the package catalog
//! - [`contacts`]: Contact pricing, gated contacts and flat-priced actions
//! - [`webhooks`]: Confirmed payment events
//! - [`middleware`]: Caller identity from the `x-user-id` header
//! - [`request_id`]: Request correlation ids
//!
//! # Endpoints Overview
//!
//! ```text
//! GET  /health                                 - Health check (public)
//! GET  /api/v1/tokens/packages                 - Token packages for sale (public)
//! GET  /api/v1/tokens/balance                  - Current balance
//! GET  /api/v1/tokens/summary                  - Balance and counters
//! GET  /api/v1/tokens/transactions             - History, newest first
//! GET  /api/v1/contacts/{business_id}/quote    - Price a contact
//! POST /api/v1/contacts/{business_id}          - Contact a business
//! POST /api/v1/actions/charge                  - Charge a gated action
//! POST /api/v1/webhooks/purchase               - Confirmed purchase (public)
//! ```
//!
//! # Example Usage
//!
//! ```rust,no_run
//! use token_server::api::{AppState, create_router};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let app = create_router(AppState::in_memory());
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:3000").await?;
//! axum::serve(listener, app).await?;
//! # Ok(())
//! # }
//! ```
//!
//! # CORS
//!
//! CORS is configured permissively for development. In production, configure
//! appropriate origins, methods, and headers.

pub mod contacts;
pub mod error;
pub mod middleware;
pub mod request_id;
pub mod tokens;
pub mod webhooks;

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
};
use serde_json::json;
use std::sync::Arc;
use token_ledger::{
    ContactGate, EntitlementConfig, EntitlementTracker, GateConfig, LedgerConfig,
    PurchaseReconciler, TokenLedger,
    db::Database,
    entitlement::PgEntitlementStore,
    ledger::PgLedgerStore,
    purchase::{PackageCatalog, PgPackageStore},
};
use tower_http::cors::CorsLayer;

/// Application state shared across all HTTP handlers.
///
/// Cloned for each request; every component is a cheap handle.
#[derive(Clone)]
pub struct AppState {
    pub ledger: TokenLedger,
    pub tracker: EntitlementTracker,
    pub gate: ContactGate,
    pub reconciler: PurchaseReconciler,
    pub catalog: PackageCatalog,
    /// Absent when running on in-memory stores
    pub database: Option<Database>,
}

impl AppState {
    /// Wire the components over existing ledger, tracker and catalog handles
    pub fn new(
        ledger: TokenLedger,
        tracker: EntitlementTracker,
        catalog: PackageCatalog,
        gate_config: GateConfig,
        database: Option<Database>,
    ) -> Self {
        Self {
            gate: ContactGate::new(ledger.clone(), tracker.clone(), gate_config),
            reconciler: PurchaseReconciler::new(ledger.clone(), catalog.clone()),
            ledger,
            tracker,
            catalog,
            database,
        }
    }

    /// State backed by PostgreSQL stores sharing one pool
    pub fn with_database(
        database: Database,
        ledger_config: LedgerConfig,
        entitlement_config: EntitlementConfig,
        gate_config: GateConfig,
    ) -> Self {
        let pool = Arc::new(database.pool().clone());

        let ledger_store =
            PgLedgerStore::new(pool.clone()).with_lock_timeout(ledger_config.lock_timeout);
        let entitlement_store = PgEntitlementStore::new(pool.clone())
            .with_lock_timeout(entitlement_config.operation_timeout);
        let catalog = PackageCatalog::new(Arc::new(PgPackageStore::new(pool)))
            .with_query_timeout(ledger_config.query_timeout);

        Self::new(
            TokenLedger::new(Arc::new(ledger_store), ledger_config),
            EntitlementTracker::new(Arc::new(entitlement_store), entitlement_config),
            catalog,
            gate_config,
            Some(database),
        )
    }

    /// State over fresh in-memory stores with default configuration
    pub fn in_memory() -> Self {
        Self::new(
            TokenLedger::in_memory(),
            EntitlementTracker::in_memory(),
            PackageCatalog::in_memory(),
            GateConfig::default(),
            None,
        )
    }
}

/// Create the complete API router with all endpoints and middleware.
///
/// User-scoped routes sit behind [`middleware::user_id_middleware`]; the
/// health check, the package listing and the payment webhook do not.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .nest("/api/v1", create_v1_router())
        .layer(axum::middleware::from_fn(request_id::request_id_middleware))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// API v1 routes
fn create_v1_router() -> Router<AppState> {
    let public_routes = Router::new()
        .route("/tokens/packages", get(tokens::list_packages))
        .route("/webhooks/purchase", post(webhooks::purchase_confirmed));

    let user_routes = Router::new()
        .route("/tokens/balance", get(tokens::get_balance))
        .route("/tokens/summary", get(tokens::get_summary))
        .route("/tokens/transactions", get(tokens::get_transactions))
        .route(
            "/contacts/{business_id}/quote",
            get(contacts::quote_contact),
        )
        .route("/contacts/{business_id}", post(contacts::contact_business))
        .route("/actions/charge", post(contacts::charge_action))
        .layer(axum::middleware::from_fn(middleware::user_id_middleware));

    Router::new().merge(public_routes).merge(user_routes)
}

/// Health check endpoint for monitoring and load balancers.
///
/// Returns `200 OK` when storage is reachable, `503 Service Unavailable`
/// otherwise.
///
/// ```bash
/// curl http://localhost:3000/health
/// # {"status":"healthy","storage":"postgres","database":true,"timestamp":"2025-11-22T10:30:00Z"}
/// ```
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let (storage, db_healthy) = match &state.database {
        Some(database) => ("postgres", database.health_check().await.is_ok()),
        None => ("memory", true),
    };

    let status_code = if db_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let response = json!({
        "status": if db_healthy { "healthy" } else { "unhealthy" },
        "version": env!("CARGO_PKG_VERSION"),
        "storage": storage,
        "database": db_healthy,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    });

    (status_code, Json(response))
}
