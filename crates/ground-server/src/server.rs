use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::routing::{get, post};
use axum::Router;
use ground_fanout::{Broadcaster, Handshake, Ingestor, SubscriberRegistry};
use ground_store::SampleStore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::ServerConfig;
use crate::routes;

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub store: Arc<dyn SampleStore>,
    pub registry: Arc<SubscriberRegistry>,
    pub ingestor: Ingestor,
    pub handshake: Handshake,
    pub http: reqwest::Client,
    pub shutdown: CancellationToken,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(
        config: ServerConfig,
        store: Arc<dyn SampleStore>,
        shutdown: CancellationToken,
    ) -> Self {
        let registry = Arc::new(SubscriberRegistry::new());
        let ingestor = Ingestor::new(
            Arc::clone(&store),
            Broadcaster::new(Arc::clone(&registry)),
        );
        let handshake = Handshake::new(
            Arc::clone(&store),
            Arc::clone(&registry),
            config.handshake(),
            shutdown.clone(),
        );
        Self {
            config: Arc::new(config),
            store,
            registry,
            ingestor,
            handshake,
            http: reqwest::Client::new(),
            shutdown,
            start_time: Instant::now(),
        }
    }
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route(
            "/events/",
            post(routes::events::ingest).get(routes::events::history),
        )
        .route("/events/sessions", get(routes::events::sessions))
        .route("/events/live", get(routes::live::subscribe))
        .route("/commands/launch", get(routes::commands::launch))
        .route("/health", get(routes::health::health))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Bind and serve. Returns once the listener is accepting connections.
pub async fn start(
    config: ServerConfig,
    store: Arc<dyn SampleStore>,
) -> Result<ServerHandle, std::io::Error> {
    let addr = config.bind_addr();
    let shutdown = CancellationToken::new();
    let state = AppState::new(config, store, shutdown.clone());
    let registry = Arc::clone(&state.registry);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;
    tracing::info!(addr = %local_addr, "ground-control server started");

    let router = build_router(state);
    let token = shutdown.clone();
    let server = tokio::spawn(async move {
        let result = axum::serve(listener, router)
            .with_graceful_shutdown(async move { token.cancelled().await })
            .await;
        if let Err(e) = result {
            tracing::error!(error = %e, "server exited with error");
        }
    });

    Ok(ServerHandle {
        addr: local_addr,
        shutdown,
        registry,
        server,
    })
}

/// Handle returned by [`start`]. Dropping it leaves the server running.
pub struct ServerHandle {
    pub addr: SocketAddr,
    shutdown: CancellationToken,
    registry: Arc<SubscriberRegistry>,
    server: JoinHandle<()>,
}

impl ServerHandle {
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn registry(&self) -> &Arc<SubscriberRegistry> {
        &self.registry
    }

    /// Stop accepting connections and close every live subscription.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Wait for the server task to finish after [`shutdown`](Self::shutdown).
    pub async fn join(self) {
        if let Err(e) = self.server.await {
            tracing::warn!(error = %e, "server task failed");
        }
    }
}
