//! HTTP API server for the shelfswap reservation core.
//!
//! Exposes the reconciliation engine's operations as REST endpoints plus the
//! inbound gateway callback, with structured logging (tracing) and
//! Prometheus metrics. Identity is external: handlers trust the numeric user
//! id the fronting auth layer forwards in `X-User-Id`.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use ledger::{InMemoryLedger, LedgerStore};
use metrics_exporter_prometheus::PrometheusHandle;
use reconcile::{InMemoryGateway, Orchestrator, OrchestratorConfig, PaymentGateway, Sweeper};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use config::Config;
use routes::reservations::AppState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<L: LedgerStore + 'static, G: PaymentGateway + 'static>(
    state: Arc<AppState<L, G>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/reservations", post(routes::reservations::create::<L, G>))
        .route("/reservations/my", get(routes::reservations::mine::<L, G>))
        .route(
            "/reservations/for-my-books",
            get(routes::reservations::for_my_books::<L, G>),
        )
        .route(
            "/reservations/{id}/status",
            get(routes::reservations::status::<L, G>),
        )
        .route(
            "/reservations/{id}/collected",
            post(routes::reservations::collected::<L, G>),
        )
        .route(
            "/reservations/{id}/cancel",
            post(routes::reservations::cancel::<L, G>),
        )
        .route("/payments/callback", get(routes::payments::callback::<L, G>))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Wires an orchestrator and sweeper around the given ledger and gateway.
pub fn create_state<L: LedgerStore + 'static, G: PaymentGateway + 'static>(
    ledger: L,
    gateway: G,
    config: &Config,
) -> (Arc<AppState<L, G>>, Sweeper<L, G>) {
    let orchestrator = Arc::new(Orchestrator::new(
        ledger,
        gateway,
        OrchestratorConfig {
            hold: chrono::Duration::hours(config.hold_hours),
            callback_base: config.callback_base(),
        },
    ));
    let sweeper = Sweeper::new(
        orchestrator.clone(),
        std::time::Duration::from_secs(config.sweep_interval_secs),
    );

    let state = Arc::new(AppState {
        orchestrator,
        frontend_url: config.frontend_url.clone(),
    });
    (state, sweeper)
}

/// Creates the default application state backed by the in-memory ledger and
/// gateway double. Returns the handles so callers (and tests) can seed books
/// and script gateway outcomes.
pub fn create_default_state(
    config: &Config,
) -> (
    Arc<AppState<InMemoryLedger, InMemoryGateway>>,
    Sweeper<InMemoryLedger, InMemoryGateway>,
    InMemoryLedger,
    InMemoryGateway,
) {
    let ledger = InMemoryLedger::new();
    let gateway = InMemoryGateway::new();
    let (state, sweeper) = create_state(ledger.clone(), gateway.clone(), config);
    (state, sweeper, ledger, gateway)
}
