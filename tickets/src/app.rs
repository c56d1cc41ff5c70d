//! Application wiring and lifecycle.
//!
//! # Startup
//!
//! 1. Connect storage and run the migration
//! 2. Connect the event bus and the gateway clients
//! 3. Install the metrics recorder and serve `/metrics`
//! 4. Start the message router; every subscription must succeed
//! 5. Only then start the HTTP API, so the service is not reported healthy
//!    before it consumes
//!
//! # Graceful Shutdown
//!
//! On Ctrl+C or SIGTERM the HTTP server stops accepting connections, then the
//! router workers are told to stop and get `SHUTDOWN_TIMEOUT` seconds to
//! finish their in-flight message before they are aborted.

use crate::api::{self, ApiState};
use crate::clients::{
    FilesClient, FilesService, Gateway, ReceiptsClient, ReceiptsService, SpreadsheetsClient,
    SpreadsheetsService,
};
use crate::config::{Config, RouterSettings};
use crate::handlers::{self, HandlerDeps};
use anyhow::Context;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use ticketflow_core::environment::{Clock, SystemClock};
use ticketflow_core::event_bus::EventBus;
use ticketflow_core::repository::TicketRepository;
use ticketflow_postgres::PostgresTicketRepository;
use ticketflow_redpanda::RedpandaEventBus;
use ticketflow_runtime::metrics::MetricsServer;
use ticketflow_runtime::{
    EventPublisher, MiddlewareChain, Router, RouterError, RunningRouter, ShutdownReport,
};
use tokio::net::TcpListener;
use tracing::{info, warn};

/// The three gateway collaborators.
#[derive(Clone)]
pub struct Collaborators {
    /// Receipts API
    pub receipts: Arc<dyn ReceiptsService>,
    /// Spreadsheets API
    pub spreadsheets: Arc<dyn SpreadsheetsService>,
    /// Files API
    pub files: Arc<dyn FilesService>,
}

impl Collaborators {
    /// HTTP clients for every collaborator behind `gateway`.
    #[must_use]
    pub fn http(gateway: &Gateway) -> Self {
        Self {
            receipts: Arc::new(ReceiptsClient::new(gateway.clone())),
            spreadsheets: Arc::new(SpreadsheetsClient::new(gateway.clone())),
            files: Arc::new(FilesClient::new(gateway.clone())),
        }
    }
}

/// A fully wired service that has not started consuming yet.
pub struct Application {
    router: Router,
    api: axum::Router,
}

impl Application {
    /// Wire handlers, middleware and the HTTP API around the given
    /// infrastructure.
    ///
    /// # Errors
    ///
    /// Returns [`RouterError`] if two handlers end up in the same consumer group.
    pub fn build(
        bus: Arc<dyn EventBus>,
        repository: Arc<dyn TicketRepository>,
        collaborators: Collaborators,
        clock: Arc<dyn Clock>,
        settings: &RouterSettings,
    ) -> Result<Self, RouterError> {
        let publisher = EventPublisher::new(Arc::clone(&bus), clock);

        let chain = MiddlewareChain::standard(settings.retry_policy());
        let mut router = Router::new(bus, chain).with_config(settings.router_config());

        let deps = HandlerDeps {
            receipts: collaborators.receipts,
            spreadsheets: collaborators.spreadsheets,
            files: collaborators.files,
            repository: Arc::clone(&repository),
            publisher: publisher.clone(),
        };
        handlers::register(&mut router, &deps)?;

        let api = api::router(ApiState {
            publisher,
            repository,
        });

        Ok(Self { router, api })
    }

    /// Subscribe every handler and start consuming.
    ///
    /// # Errors
    ///
    /// Returns [`RouterError::Subscription`] if any subscription fails.
    pub async fn start(self) -> Result<RunningApplication, RouterError> {
        let router = self.router.run().await?;
        Ok(RunningApplication {
            router,
            api: self.api,
        })
    }
}

/// A service whose router is consuming.
pub struct RunningApplication {
    router: RunningRouter,
    api: axum::Router,
}

impl RunningApplication {
    /// The HTTP API, for serving or for in-process tests.
    #[must_use]
    pub fn api(&self) -> axum::Router {
        self.api.clone()
    }

    /// Serve the API on `listener` until `shutdown` resolves, then stop the
    /// router within `deadline`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP server fails. The router is still shut
    /// down in that case.
    pub async fn serve<F>(
        self,
        listener: TcpListener,
        shutdown: F,
        deadline: Duration,
    ) -> std::io::Result<ShutdownReport>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        info!(address = ?listener.local_addr().ok(), "HTTP server listening");
        let served = axum::serve(listener, self.api)
            .with_graceful_shutdown(shutdown)
            .await;

        info!("HTTP server stopped, shutting down router");
        let report = self.router.shutdown(deadline).await;
        served.map(|()| report)
    }

    /// Stop the router without serving HTTP.
    pub async fn shutdown(self, deadline: Duration) -> ShutdownReport {
        self.router.shutdown(deadline).await
    }
}

/// Connect to real infrastructure and run until a shutdown signal arrives.
///
/// # Errors
///
/// Returns an error if any startup step fails or the HTTP server fails.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let repository =
        PostgresTicketRepository::new(&config.postgres.url, config.postgres.max_connections)
            .await
            .context("Failed to connect to PostgreSQL")?;
    repository
        .migrate()
        .await
        .context("Failed to create tickets table")?;
    info!("Ticket storage ready");

    let bus = RedpandaEventBus::builder()
        .brokers(&config.redpanda.brokers)
        .auto_offset_reset(&config.redpanda.auto_offset_reset)
        .build()
        .context("Failed to create event bus")?;
    info!(brokers = %config.redpanda.brokers, "Event bus connected");

    let gateway = Gateway::new(&config.gateway.addr).context("Failed to build gateway client")?;

    let mut metrics = MetricsServer::new(config.server.metrics_addr()?);
    metrics.start().context("Failed to install metrics recorder")?;
    let metrics_listener = TcpListener::bind(metrics.addr())
        .await
        .context("Failed to bind metrics server")?;
    tokio::spawn(serve_metrics(metrics_listener, Arc::new(metrics)));

    let app = Application::build(
        Arc::new(bus),
        Arc::new(repository),
        Collaborators::http(&gateway),
        Arc::new(SystemClock),
        &config.router,
    )?;
    let running = app.start().await.context("Failed to start message router")?;

    let listener = TcpListener::bind(config.server.http_addr()?)
        .await
        .context("Failed to bind HTTP server")?;
    let report = running
        .serve(listener, shutdown_signal(), config.server.shutdown_deadline())
        .await?;

    if report.abandoned.is_empty() {
        info!(stopped = report.stopped, "Graceful shutdown complete");
    } else {
        warn!(
            stopped = report.stopped,
            abandoned = ?report.abandoned,
            "Shutdown deadline reached, in-flight messages abandoned"
        );
    }
    Ok(())
}

async fn serve_metrics(listener: TcpListener, metrics: Arc<MetricsServer>) {
    let app = axum::Router::new()
        .route("/metrics", get(render_metrics))
        .with_state(metrics);

    if let Err(e) = axum::serve(listener, app).await {
        warn!(error = %e, "Metrics server stopped");
    }
}

#[allow(clippy::unused_async)]
async fn render_metrics(State(metrics): State<Arc<MetricsServer>>) -> (StatusCode, String) {
    metrics.render().map_or_else(
        || (StatusCode::SERVICE_UNAVAILABLE, String::new()),
        |body| (StatusCode::OK, body),
    )
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
pub async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        () = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
