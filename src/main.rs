//! sc-ota-server binary.
//!
//! Serves per-team model artifacts and JSON result records over HTTP. Every
//! request passes through one dispatcher that applies the global token bucket,
//! resolves the team from the path, checks Basic credentials and runs exactly
//! one storage action selected by the query string.

mod atomic;
mod auth;
mod background;
mod config;
mod dispatch;
mod error;
mod http;
mod limited;
mod logging;
mod query;
mod rate_limit;
mod storage;
mod tls;

use axum::extract::{DefaultBodyLimit, Extension};
use axum::{Router, middleware};
use axum_server::Handle;
use clap::Parser;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower_http::trace::{DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{Level, info};

use crate::auth::TeamRegistry;
use crate::background::spawn_background_tasks;
use crate::config::{Args, SHUTDOWN_GRACE_SECS};
use crate::dispatch::UploadConfig;
use crate::rate_limit::TokenBucket;
use crate::storage::Storage;

/// Starts the server and blocks until shutdown.
#[tokio::main]
async fn main() -> Result<(), io::Error> {
    logging::init_logging();

    let args = Args::parse();
    let teams = Arc::new(
        TeamRegistry::parse(&args.teams)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err))?,
    );
    let storage = Arc::new(Storage::new(PathBuf::from(&args.storage_dir)));
    storage.ensure_root().await?;
    let limiter = Arc::new(TokenBucket::new(
        args.rate_limit_capacity,
        Duration::from_millis(args.rate_limit_refill_ms),
    ));
    let upload_config = Arc::new(UploadConfig {
        model_max_size: args.model_max_size,
        result_max_size: args.result_max_size,
    });
    info!(
        storage_dir = args.storage_dir,
        teams = teams.names().collect::<Vec<_>>().join(","),
        rate_limit_capacity = limiter.capacity(),
        rate_limit_refill_ms = args.rate_limit_refill_ms,
        "configuration loaded"
    );

    let app = Router::new()
        .fallback(dispatch::handle_request)
        .layer(DefaultBodyLimit::disable())
        .layer(middleware::from_fn(http::add_security_headers))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(http::request_span)
                .on_request(DefaultOnRequest::new().level(Level::DEBUG))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(Extension(limiter))
        .layer(Extension(teams.clone()))
        .layer(Extension(storage.clone()))
        .layer(Extension(upload_config));

    let host = args
        .host
        .parse::<IpAddr>()
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err.to_string()))?;
    let http_addr = SocketAddr::new(host, args.http_port);
    let tls_config = tls::load_rustls_config(&args).await?;
    let handle = Handle::new();

    spawn_background_tasks(storage, teams, Duration::from_secs(args.temp_ttl_secs));

    info!("Starting HTTP server at {}", http_addr);
    let http_server = axum_server::bind(http_addr)
        .handle(handle.clone())
        .serve(app.clone().into_make_service_with_connect_info::<SocketAddr>());

    match tls_config {
        Some(tls_config) => {
            let https_addr = SocketAddr::new(host, args.https_port);
            info!("Starting HTTPS server at {}", https_addr);
            let https_server = axum_server::bind_rustls(https_addr, tls_config)
                .handle(handle.clone())
                .serve(app.into_make_service_with_connect_info::<SocketAddr>());
            tokio::select! {
                result = http_server => result?,
                result = https_server => result?,
                _ = shutdown_signal(handle) => {}
            }
        }
        None => {
            tokio::select! {
                result = http_server => result?,
                _ = shutdown_signal(handle) => {}
            }
        }
    }

    Ok(())
}

async fn shutdown_signal(handle: Handle) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Received termination signal, shutting down");
    handle.graceful_shutdown(Some(Duration::from_secs(SHUTDOWN_GRACE_SECS)));
}
