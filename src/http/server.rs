//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router with all API handlers
//! - Wire up middleware (request ID, tracing, timeout, body limit)
//! - Serve over plain TCP or TLS with graceful shutdown

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::Request,
    routing::{delete, get, post},
    Router,
};
use axum_server::tls_rustls::RustlsConfig;
use tokio::net::TcpListener;
use tower_http::{
    limit::RequestBodyLimitLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::ServerConfig;
use crate::http::ceremony::CeremonyBroker;
use crate::http::{account, ceremony, chains, operations};
use crate::lifecycle::Shutdown;
use crate::pipeline::TransactionPipeline;

pub const X_REQUEST_ID: &str = "x-request-id";

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<TransactionPipeline>,
    pub ceremonies: Arc<CeremonyBroker>,
}

impl AppState {
    pub fn new(pipeline: Arc<TransactionPipeline>) -> Self {
        Self {
            pipeline,
            ceremonies: Arc::new(CeremonyBroker::new()),
        }
    }
}

/// HTTP API server for the wallet.
pub struct ApiServer {
    router: Router,
    config: ServerConfig,
}

impl ApiServer {
    pub fn new(state: AppState, config: ServerConfig) -> Self {
        let router = Self::build_router(&config, state);
        Self { router, config }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    pub fn build_router(config: &ServerConfig, state: AppState) -> Router {
        Router::new()
            .route("/api/account/create", post(account::create_account))
            .route("/api/account/list", get(account::list_accounts))
            .route("/api/account/verify-passkey", post(account::verify_passkey))
            .route("/api/account/sign-message", post(account::sign_message))
            .route("/api/account/{identity}", get(account::get_account))
            .route("/api/account/{identity}/credentials", post(account::add_credential))
            .route("/api/operations", post(operations::start_operation))
            .route("/api/ceremonies/{id}/assertion", post(ceremony::complete_ceremony))
            .route("/api/ceremonies/{id}", delete(ceremony::cancel_ceremony))
            .route("/api/bundler/userop/{hash}", get(operations::get_receipt))
            .route("/api/bundler/estimate-gas", post(operations::estimate_gas))
            .route("/api/bundler/supported-chains", get(chains::supported_chains))
            .route("/api/paymaster/config", get(chains::paymaster_config))
            .route("/api/paymaster/stats", get(chains::paymaster_stats))
            .with_state(state)
            .layer(RequestBodyLimitLayer::new(config.max_body_size))
            .layer(TimeoutLayer::new(Duration::from_secs(config.request_timeout_secs)))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(TraceLayer::new_for_http().make_span_with(|request: &Request| {
                let request_id = request
                    .headers()
                    .get(X_REQUEST_ID)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("-");
                tracing::info_span!(
                    "request",
                    method = %request.method(),
                    path = %request.uri().path(),
                    request_id = %request_id,
                )
            }))
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
    }

    /// Serve on `listener` until `shutdown` fires.
    pub async fn run(self, listener: TcpListener, shutdown: Shutdown) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let mut stop = shutdown.subscribe();
        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = stop.recv().await;
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// Serve HTTPS on the configured bind address until `shutdown` fires.
    pub async fn run_tls(self, tls: RustlsConfig, shutdown: Shutdown) -> Result<(), std::io::Error> {
        let addr: SocketAddr = self.config.bind_address.parse().map_err(|e| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("invalid bind address '{}': {}", self.config.bind_address, e),
            )
        })?;
        tracing::info!(address = %addr, "HTTPS server starting");

        let handle = axum_server::Handle::new();
        let mut stop = shutdown.subscribe();
        {
            let handle = handle.clone();
            tokio::spawn(async move {
                let _ = stop.recv().await;
                handle.graceful_shutdown(Some(Duration::from_secs(10)));
            });
        }

        axum_server::bind_rustls(addr, tls)
            .handle(handle)
            .serve(self.router.into_make_service())
            .await?;

        tracing::info!("HTTPS server stopped");
        Ok(())
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}
