//! Pelit server binary.
//!
//! An authenticated HTTP file store: uploads land under randomly named files
//! in caller-chosen directories, retrieval is public behind a hotlink check,
//! and directories can be archived in the background. The entry point
//! validates the configuration before anything binds a port.

mod app;
mod atomic;
mod auth;
mod backup;
mod cli;
mod config;
mod error;
mod guard;
mod handlers;
mod http;
mod logging;
mod naming;
mod quota;
mod storage;

use axum_server::Handle;
use clap::Parser;
use shadow_rs::shadow;
use std::net::SocketAddr;
use std::process::ExitCode;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info};

use crate::app::{Services, build_router};
use crate::cli::Cli;
use crate::config::{AUTH_ENV_VAR, Config, SHUTDOWN_GRACE_SECS};

shadow!(build);

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let options = cli.command.options();

    if let Err(err) = logging::init_logging(options.verbosity, options.log.as_deref()) {
        eprintln!("cannot open log file: {err}");
        return ExitCode::FAILURE;
    }

    let config = match config::load_config(&options.config) {
        Ok(config) => config,
        Err(err) => {
            error!(
                config = ?options.config,
                field = err.field().unwrap_or("-"),
                error = %err,
                "invalid configuration"
            );
            return ExitCode::FAILURE;
        }
    };

    if cli.command.is_check() {
        info!(
            config = ?options.config,
            version = %config.version,
            "configuration is valid"
        );
        return ExitCode::SUCCESS;
    }

    match serve(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "server stopped with an error");
            ExitCode::FAILURE
        }
    }
}

/// Binds the main listener and, when configured, the API listener, then
/// serves until a shutdown signal arrives.
async fn serve(config: Config) -> Result<(), std::io::Error> {
    info!(version = %config.version, "configuration loaded");
    let services = Services::from_config(&config, std::env::var(AUTH_ENV_VAR).ok());
    services.storage.ensure_root().await?;
    info!(root = ?services.storage.root_path(), "storage ready");
    let app = build_router(services);
    let handle = Handle::new();

    let main_addr = config.network.listen_addr();
    info!("Starting HTTP server at {}", main_addr);
    let main_server = axum_server::bind(main_addr)
        .handle(handle.clone())
        .serve(
            app.clone()
                .into_make_service_with_connect_info::<SocketAddr>(),
        );

    let api_addr = config.network.api_listen_addr();
    let api_handle = handle.clone();
    let api_server = async move {
        let Some(addr) = api_addr else {
            return Ok(());
        };
        info!("Starting API server at {}", addr);
        axum_server::bind(addr)
            .handle(api_handle)
            .serve(app.into_make_service_with_connect_info::<SocketAddr>())
            .await
    };

    tokio::spawn(shutdown_signal(handle));
    tokio::try_join!(main_server, api_server)?;
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

    info!("Received termination signal shutting down");
    handle.graceful_shutdown(Some(Duration::from_secs(SHUTDOWN_GRACE_SECS)));
}
