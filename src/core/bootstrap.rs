use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use axum::{Extension, Router};
use tokio::{net::TcpListener, signal};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt};

use crate::{
    api::{auth::AuthClient, payment_gateway::GatewayClient},
    booking::{slot_store::PgSlotStore, slot_sync::SlotSync},
    core::{app_state::AppState, config::Config, db},
};

pub fn init_tracing() {
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
}

pub fn init_env() {
    if dotenvy::dotenv().is_err() {
        info!("No .env file found, relying on the process environment");
    }
}

pub async fn build_state(config: Config) -> Result<AppState> {
    let db_pool = db::create_pool(&config.database.url, config.database.max_connections).await?;

    let http_client = reqwest::Client::builder()
        .timeout(config.payments.request_timeout)
        .build()
        .context("Failed to build HTTP client")?;

    let auth = AuthClient::new(http_client.clone(), &config.auth.url, &config.auth.api_key);
    let payment_gateway = GatewayClient::new(http_client, &config.payments);
    let slot_sync = SlotSync::new(
        Arc::new(PgSlotStore::new(db_pool.clone())),
        config.booking.override_timeout,
    );

    Ok(AppState {
        db_pool,
        config: Arc::new(config),
        auth,
        payment_gateway: Arc::new(payment_gateway),
        slot_sync,
    })
}

/// Serves `app` until Ctrl+C or SIGTERM.
pub async fn bootstrap(service_name: &str, app: Router<AppState>, state: AppState) -> Result<()> {
    let sweeper = state
        .slot_sync
        .spawn_sweeper(Duration::from_secs(state.config.booking.override_timeout.as_secs().max(1)));

    let address = format!("0.0.0.0:{}", state.config.server.port);
    let app = app
        .layer(Extension(state.auth.clone()))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("Failed to bind {address}"))?;
    info!("{service_name} listening on {address}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    sweeper.abort();
    info!("{service_name} stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {e}");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => tracing::error!("Failed to listen for SIGTERM: {e}"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
