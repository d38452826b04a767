//! WOPI host gateway server binary

use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::prelude::__tracing_subscriber_SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod config;
mod gateway;
mod routes;

use config::ServerConfig;
use routes::AppState;

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = match ServerConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            error!(%err, "invalid configuration");
            std::process::exit(1);
        }
    };

    let listen_addr = config.listen_addr.clone();
    let state = match AppState::new(config) {
        Ok(state) => Arc::new(state),
        Err(err) => {
            error!(%err, "failed to initialize");
            std::process::exit(1);
        }
    };

    let listener = match tokio::net::TcpListener::bind(&listen_addr).await {
        Ok(listener) => listener,
        Err(err) => {
            error!(%err, addr = %listen_addr, "failed to bind");
            std::process::exit(1);
        }
    };

    info!(addr = %listen_addr, style = ?state.config.app_style,
          proofkeys = state.config.proofkeys_enabled, "WOPI host gateway listening");

    if let Err(err) = axum::serve(listener, routes::router(state)).await {
        error!(%err, "server terminated");
        std::process::exit(1);
    }
}
