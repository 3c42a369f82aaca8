//! Graph Profile Web
//!
//! A web application that signs users in with Azure AD and shows their
//! Microsoft Graph profile, recovering from claims challenges by sending the
//! user back through sign-in.

#![deny(clippy::all)]

mod auth;
mod config;
mod error;
mod graph;
mod profile;
mod secrets;
mod session;
mod web;

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use config::Config;
use error::AppError;
use secrets::{AmbientCredential, KeyVaultClient};
use web::AppState;

/// How often idle sessions are swept.
const SESSION_PURGE_INTERVAL: Duration = Duration::from_secs(300);

#[tokio::main]
async fn main() {
    // Load .env file (if present) before anything else
    if let Err(e) = dotenvy::dotenv() {
        // .env file is optional - only log if it's not a "file not found" error
        if !e.to_string().contains("not found") {
            eprintln!("Warning: Failed to load .env file: {}", e);
        }
    }

    // Load configuration
    let config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            init_logging("info");
            error!("Failed to load configuration: {:#}", e);
            eprintln!("Configuration error: {:#}", e);
            eprintln!("\nPlease set the following environment variables:");
            eprintln!("  AZURE_CLIENT_ID=<your-azure-ad-client-id>");
            eprintln!("  AZURE_TENANT_ID=<your-tenant-id>");
            eprintln!("  AZURE_CLIENT_SECRET=<secret> (or KEY_VAULT_URI)");
            std::process::exit(1);
        }
    };

    init_logging(&config.logging.level);
    info!("Starting {} v{}", config.app.name, config.app.version);

    if let Err(e) = run(config).await {
        error!("Fatal: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(mut config: Config) -> Result<()> {
    resolve_client_secret(&mut config).await?;
    config.ensure_client_secret()?;

    let bind_address = config.bind_address()?;
    let state = Arc::new(AppState::new(config)?);

    let purge_state = Arc::clone(&state);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(SESSION_PURGE_INTERVAL);
        loop {
            interval.tick().await;
            purge_state.purge_idle_sessions().await;
        }
    });

    let listener = tokio::net::TcpListener::bind(bind_address)
        .await
        .with_context(|| format!("Failed to bind {}", bind_address))?;
    info!("Listening on http://{}", bind_address);

    axum::serve(listener, web::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server stopped");
    Ok(())
}

/// Fill in the OAuth client secret from Key Vault when none is configured.
async fn resolve_client_secret(config: &mut Config) -> Result<(), AppError> {
    if !config.oauth.client_secret.is_empty() || config.key_vault.uri.is_empty() {
        return Ok(());
    }

    let client = KeyVaultClient::new(&config.key_vault.uri, AmbientCredential::from_env())?;
    let secret = client
        .get_secret(&config.key_vault.client_secret_name)
        .await
        .inspect_err(|e| {
            error!(
                "Failed to read '{}' from Key Vault: {}",
                config.key_vault.client_secret_name, e
            )
        })?;
    config.oauth.client_secret = secret;
    info!("Client secret loaded from Key Vault");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

/// Initialize tracing/logging.
fn init_logging(default_level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .with_thread_ids(false)
        .init();
}
