//! Tollgate resource server binary.
//!
//! Serves the protected demo API, validating bearer tokens against the
//! authorization server's key set, which is fetched at startup and refreshed
//! in the background.

use anyhow::Result;
use std::{env, sync::Arc};
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing_subscriber::prelude::*;

use tollgate::{
    config::ResourceConfig,
    http::{ResourceState, build_resource_router, handler_resource::Inventory, server::STOCK_ROUTE},
    oauth::{RemoteKeySet, ResourceServer, RetryPolicy, TokenValidator},
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "tollgate=debug,info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().pretty())
        .init();

    let version = tollgate::config::version()?;

    env::args().for_each(|arg| {
        if arg == "--version" {
            println!("{version}");
            std::process::exit(0);
        }
    });

    tracing::info!(?version, "Starting tollgate resource server");

    let config = ResourceConfig::new()?;

    let http_client = reqwest::Client::builder()
        .user_agent(config.user_agent.clone())
        .timeout(*config.http_client_timeout.as_ref())
        .build()?;

    let policy = RetryPolicy {
        attempts: *config.jwks_fetch_attempts.as_ref(),
        initial_backoff: *config.jwks_fetch_backoff.as_ref(),
        ..RetryPolicy::default()
    };
    let remote_keys = Arc::new(
        RemoteKeySet::new(http_client, config.jwks_uri.clone(), policy)
            .with_min_refresh_interval(*config.jwks_min_refresh_interval.as_ref()),
    );

    // Validation fails closed until a key set has been fetched.
    if let Err(err) = remote_keys.refresh().await {
        tracing::warn!(error = %err, jwks_uri = %config.jwks_uri, "initial key set fetch failed");
    }

    let issuer: &str = config.issuer.as_ref();
    let validator = TokenValidator::new(issuer, remote_keys.clone())
        .with_leeway(*config.token_clock_skew.as_ref());
    let resource_server =
        ResourceServer::new(validator).require_scope(STOCK_ROUTE, "read:inventory");

    let app = build_resource_router(ResourceState {
        resource_server: Arc::new(resource_server),
        inventory: Arc::new(Inventory::sample()),
    });

    // Setup graceful shutdown
    let tracker = TaskTracker::new();
    let token = CancellationToken::new();

    {
        let tracker = tracker.clone();
        let inner_token = token.clone();

        let ctrl_c = async {
            if let Err(err) = signal::ctrl_c().await {
                tracing::error!("failed to install Ctrl+C handler: {}", err);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut stream) => {
                    stream.recv().await;
                }
                Err(err) => {
                    tracing::error!("failed to install signal handler: {}", err);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::spawn(async move {
            tokio::select! {
                () = inner_token.cancelled() => { },
                _ = terminate => {},
                _ = ctrl_c => {},
            }

            tracker.close();
            inner_token.cancel();
        });
    }

    remote_keys.spawn_refresh_task(
        &tracker,
        *config.jwks_refresh_interval.as_ref(),
        token.clone(),
    );

    // Start HTTP server
    {
        let http_port = *config.http_port.as_ref();
        let inner_token = token.clone();
        let bind_address = format!("0.0.0.0:{http_port}");
        let listener = TcpListener::bind(&bind_address).await?;
        tracing::info!("Starting server on {bind_address}");

        tracker.spawn(async move {
            let shutdown_token = inner_token.clone();
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    shutdown_token.cancelled().await;
                    tracing::info!("axum graceful shutdown complete");
                })
                .await;
            if let Err(err) = result {
                tracing::error!("axum task failed: {}", err);
            }

            inner_token.cancel();
        });
    }

    tracker.wait().await;

    Ok(())
}
