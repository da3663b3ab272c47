//! Application startup and lifecycle management.

use crate::config::MeteringConfig;
use crate::handlers;
use crate::services::{
    init_metrics, BillingProvider, Clock, Database, HttpBillingProvider, MeteringServices,
    MeteringStore, SystemClock,
};
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use secrecy::ExposeSecret;
use service_core::error::AppError;
use service_core::middleware::metrics::metrics_middleware;
use service_core::middleware::tracing::{request_id_middleware, REQUEST_ID_HEADER};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: MeteringConfig,
    pub services: MeteringServices,
}

/// Application container for managing server lifecycle.
pub struct Application {
    http_port: u16,
    http_listener: TcpListener,
    state: AppState,
}

impl Application {
    /// Build the application against PostgreSQL and the provider HTTP API.
    pub async fn build(config: MeteringConfig) -> Result<Self, AppError> {
        let db = Database::new(
            config.database.url.expose_secret(),
            config.database.max_connections,
            config.database.min_connections,
        )
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to connect to PostgreSQL");
            e
        })?;

        db.run_migrations().await.map_err(|e| {
            tracing::error!(error = %e, "Failed to run migrations");
            e
        })?;

        let provider = HttpBillingProvider::new(config.billing_provider.clone())?;
        if provider.is_configured() {
            tracing::info!("Billing provider client initialized");
        } else {
            tracing::warn!("Billing provider API key not configured - subscription sync disabled");
        }

        Self::build_with_store(config, Arc::new(db), Arc::new(provider), Arc::new(SystemClock))
            .await
    }

    /// Build the application over explicit collaborators.
    pub async fn build_with_store(
        config: MeteringConfig,
        store: Arc<dyn MeteringStore>,
        provider: Arc<dyn BillingProvider>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, AppError> {
        init_metrics();

        let services = MeteringServices::new(store, provider, config.plans.clone(), clock);
        let state = AppState {
            config: config.clone(),
            services,
        };

        // Port 0 binds a random port (tests)
        let http_addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
        let http_listener = TcpListener::bind(http_addr).await.map_err(|e| {
            tracing::error!(error = %e, addr = %http_addr, "Failed to bind HTTP listener");
            AppError::from(e)
        })?;
        let http_port = http_listener.local_addr()?.port();

        tracing::info!(http_port = http_port, "Metering service listener bound");

        Ok(Self {
            http_port,
            http_listener,
            state,
        })
    }

    /// Get the HTTP port the server is listening on.
    pub fn http_port(&self) -> u16 {
        self.http_port
    }

    /// Get the application state.
    pub fn state(&self) -> AppState {
        self.state.clone()
    }

    /// Run the application until stopped.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        let router = router(self.state);

        tracing::info!(
            service = "metering-service",
            version = env!("CARGO_PKG_VERSION"),
            http_port = self.http_port,
            "Service ready to accept connections"
        );

        axum::serve(self.http_listener, router).await.map_err(|e| {
            tracing::error!(error = %e, "HTTP server error");
            std::io::Error::other(format!("HTTP server error: {}", e))
        })
    }
}

/// The full HTTP surface.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/metrics", get(handlers::metrics_handler))
        .route("/v1/periods/seed", post(handlers::periods::seed_period))
        .route("/v1/quota", get(handlers::quota::check_quota))
        .route("/v1/entitlement", get(handlers::quota::get_entitlement))
        .route("/v1/usage", post(handlers::usage::record_usage))
        .route("/v1/usage/records", get(handlers::usage::list_usage_records))
        .route("/webhooks/billing", post(handlers::webhooks::billing_webhook))
        .route(
            "/internal/webhooks/pending",
            get(handlers::internal::list_pending_events),
        )
        .route(
            "/internal/webhooks/:event_id/process",
            post(handlers::internal::process_event),
        )
        .route(
            "/internal/tenants/:tenant_id/subscription/sync",
            post(handlers::internal::sync_subscription),
        )
        .layer(middleware::from_fn(metrics_middleware))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get(REQUEST_ID_HEADER)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    tenant_id = tracing::field::Empty,
                )
            }),
        )
        .layer(middleware::from_fn(request_id_middleware))
        .with_state(state)
}
