//! Tollgate authorization server binary.
//!
//! Loads client definitions and the RS256 signing key, then serves the token,
//! key set and discovery endpoints with graceful shutdown.

use anyhow::Result;
use std::{env, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing_subscriber::prelude::*;

use tollgate::{
    config::Config,
    errors::ConfigError,
    http::{AppState, build_router},
    oauth::{ClientDefinition, ClientRegistry, GrantHandler, KeyManager, SigningKeyPair, TokenIssuer},
    storage::{MemoryAuthorizationCodeStore, MemoryClientStore},
};

const CODE_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

async fn load_key_manager(config: &Config) -> Result<KeyManager> {
    let key_size = *config.oauth_rsa_key_size.as_ref();
    let key_id = config
        .oauth_signing_key_id
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let key_pair = match &config.oauth_signing_key_file {
        Some(path) => {
            tracing::info!(path = %path, "loading signing key");
            let pem = tokio::fs::read_to_string(path)
                .await
                .map_err(|e| ConfigError::FileReadFailed(path.clone(), e.to_string()))?;
            SigningKeyPair::from_pem(key_id, &pem)?
        }
        None => {
            tracing::warn!(
                bits = key_size,
                "no signing key configured, generating an ephemeral key"
            );
            SigningKeyPair::generate(key_id, key_size)?
        }
    };
    Ok(KeyManager::new(key_pair))
}

async fn load_clients(config: &Config, registry: &ClientRegistry) -> Result<()> {
    let Some(path) = &config.clients_file else {
        tracing::warn!("CLIENTS_FILE is not set, no clients are registered");
        return Ok(());
    };

    for definition in ClientDefinition::load_file(path).await? {
        registry.register(definition).await?;
    }
    Ok(())
}

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

    tracing::info!(?version, "Starting tollgate");

    let config = Config::new()?;

    let keys = Arc::new(load_key_manager(&config).await?);

    let registry = Arc::new(ClientRegistry::new(Arc::new(MemoryClientStore::new())));
    load_clients(&config, &registry).await?;

    let issuer: &str = config.external_base.as_ref();
    let token_issuer = TokenIssuer::new(issuer, keys)
        .with_audience(config.oauth_token_audience.clone());

    let grant_handler = Arc::new(
        GrantHandler::new(
            registry,
            Arc::new(token_issuer),
            Arc::new(MemoryAuthorizationCodeStore::new()),
        )
        .with_code_lifetime(*config.authorization_code_lifetime.as_ref()),
    );

    let app = build_router(
        AppState::new(grant_handler.clone())
            .with_authorization_endpoint(config.authorization_endpoint.clone()),
    );

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

    // Expired authorization codes
    {
        let grant_handler = grant_handler.clone();
        let inner_token = token.clone();
        tracker.spawn(async move {
            loop {
                tokio::select! {
                    () = inner_token.cancelled() => break,
                    () = tokio::time::sleep(CODE_CLEANUP_INTERVAL) => {
                        match grant_handler.cleanup_expired_codes().await {
                            Ok(0) => {}
                            Ok(removed) => tracing::debug!(removed, "expired authorization codes removed"),
                            Err(err) => tracing::error!(error = %err, "authorization code cleanup failed"),
                        }
                    }
                }
            }
        });
    }

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
