// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Main server implementation

use crate::config::ServerConfig;
use crate::dependencies::DefaultServerDependencies;
use crate::error::{ServerError, ServerResult};
use crate::state::AppState;
use crate::{gateway, handlers};
use axum::{Router, routing::get};
use std::future::Future;
use std::io::ErrorKind;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::{debug, info, warn};

/// HTTP and WebSocket server, bound and ready to serve
pub struct Server {
    config: ServerConfig,
    app: Router,
    listener: TcpListener,
    addr: SocketAddr,
}

impl Server {
    /// Create a server backed by the libgit2 engine
    pub async fn new(config: ServerConfig) -> ServerResult<Self> {
        let state = DefaultServerDependencies::new(config.clone()).into_state();
        Self::with_state(config, state).await
    }

    /// Construct a server from an already-built app state (used for custom engines)
    pub async fn with_state(config: ServerConfig, state: AppState) -> ServerResult<Self> {
        let listener = bind_first_free(&config.host, config.port, config.port_scan_limit).await?;
        let addr = listener.local_addr()?;
        if config.port != 0 && addr.port() != config.port {
            warn!(
                requested = config.port,
                port = addr.port(),
                "Port {} was in use, switched to port {}",
                config.port,
                addr.port()
            );
        }
        let app = Self::build_app(state, &config);
        Ok(Self {
            config,
            app,
            listener,
            addr,
        })
    }

    /// Build the Axum application with routes and middleware
    pub fn build_app(state: AppState, config: &ServerConfig) -> Router {
        let middleware_stack = ServiceBuilder::new()
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(TraceLayer::new_for_http())
            .layer(if config.enable_cors {
                CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)
            } else {
                CorsLayer::new()
            });

        Router::new()
            // Health and status endpoints
            .route("/healthz", get(handlers::health::health_check))
            .route("/version", get(handlers::health::version))
            // Repository check and file status share a path
            .route(
                "/git/status",
                get(handlers::git::is_repository).post(handlers::git::file_status),
            )
            // Duplex operations upgrade on GET, short commands are POSTed
            .route(
                "/git/:name",
                get(gateway::connect).post(handlers::git::execute),
            )
            .with_state(state)
            .layer(middleware_stack)
    }

    /// Serve until the process is killed
    pub async fn run(self) -> ServerResult<()> {
        self.run_until(std::future::pending()).await
    }

    /// Serve until `shutdown` resolves, then drain open connections
    pub async fn run_until<F>(self, shutdown: F) -> ServerResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        info!(addr = %self.addr, "Starting server");
        axum::serve(self.listener, self.app)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|err| ServerError::Internal(format!("server error: {err}")))
    }

    /// Address actually bound
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Whether the configured port was busy and another one was picked
    pub fn port_changed(&self) -> bool {
        self.config.port != 0 && self.addr.port() != self.config.port
    }
}

/// Bind `port`, or the next free one within `scan_limit` ports after it
async fn bind_first_free(host: &str, port: u16, scan_limit: u16) -> ServerResult<TcpListener> {
    if port == 0 {
        return Ok(TcpListener::bind((host, 0)).await?);
    }

    let last = port.saturating_add(scan_limit);
    for candidate in port..=last {
        match TcpListener::bind((host, candidate)).await {
            Ok(listener) => return Ok(listener),
            Err(err) if err.kind() == ErrorKind::AddrInUse => {
                debug!(port = candidate, "Port in use");
            }
            Err(err) => return Err(err.into()),
        }
    }
    Err(ServerError::NoFreePort { first: port, last })
}
