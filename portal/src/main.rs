//! Main entry point for the USRA school portal.
//!
//! This file loads the configuration, installs telemetry, opens the local state
//! store, starts the HTTP server and then acquires the backend handle in the
//! background of the already listening server.

use std::process::ExitCode;
use std::sync::Arc;

use adapters::rest::RestProbe;
use portal::auth::mirror::{FileStore, MemoryStore, PersistenceMirror, RegistrationHandoff};
use portal::auth::service::SessionCache;
use portal::config::PortalConfig;
use portal::errors::PortalError;
use portal::state::AppState;
use tokio::net::TcpListener;
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "portal stopped");
            eprintln!("usra-portal: {err}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), PortalError> {
    let config = PortalConfig::load()?;
    portal::telemetry::initialise(&config)?;

    let store = FileStore::open(config.state_dir.clone())?;
    let cache = Arc::new(SessionCache::new(PersistenceMirror::new(Arc::new(store))));
    let handoff = RegistrationHandoff::new(Arc::new(MemoryStore::default()));

    let endpoint = config.endpoint.clone();
    let readiness = config.readiness;
    let bind_addr = config.bind_addr;
    let app = portal::app(AppState::new(Arc::clone(&cache), handoff, config));

    let listener = TcpListener::bind(bind_addr).await?;
    info!(addr = %bind_addr, "listening");
    let server = tokio::spawn(async move { axum::serve(listener, app).await });

    let probe = RestProbe::new(&endpoint)?;
    let phase = cache.bootstrap(&probe, &endpoint, readiness).await?;
    info!(?phase, "session cache ready");

    match server.await {
        Ok(result) => result.map_err(PortalError::from),
        Err(err) => Err(PortalError::Io(std::io::Error::other(err))),
    }
}
