//! Command execution logic.

use std::path::Path;

use anyhow::Result;
use tracing::{info, warn};

use super::args::{ClientArgs, ServerArgs};
use crate::client::ClientBridge;
use crate::config::{self, FileConfig};
use crate::downstream;
use crate::protocol::KeyScheme;
use crate::server::ServerBridge;
use crate::storage::create_storage;

async fn load_file(path: Option<&Path>) -> Result<FileConfig> {
    match path {
        Some(path) => {
            info!(path = %path.display(), "Loading config file");
            Ok(FileConfig::load(path).await?)
        }
        None => Ok(FileConfig::default()),
    }
}

/// Execute the client command
pub async fn execute_client(args: &ClientArgs) -> Result<()> {
    let file = load_file(args.storage.config.as_deref()).await?;
    let settings = config::resolve_client(&file, &args.storage.overrides(), &args.overrides())?;

    info!(backend = %settings.storage.backend, "Connecting to storage");
    let storage = create_storage(settings.storage.backend).await?;
    let bridge = ClientBridge::new(
        storage,
        KeyScheme::new(&settings.storage.prefix),
        settings.options,
    );

    tokio::select! {
        summary = bridge.run(tokio::io::stdin(), tokio::io::stdout()) => {
            let summary = summary?;
            info!(
                dispatched = summary.dispatched,
                responses = summary.responses_written,
                skipped = summary.warnings.len(),
                "Client bridge finished"
            );
            Ok(())
        }
        () = shutdown_signal() => {
            info!("Shutdown signal received");
            // The blocking stdin reader would keep the runtime alive on return.
            std::process::exit(0);
        }
    }
}

/// Execute the server command
pub async fn execute_server(args: &ServerArgs) -> Result<()> {
    let file = load_file(args.storage.config.as_deref()).await?;
    let settings = config::resolve_server(&file, &args.storage.overrides(), &args.overrides()?)?;

    info!(backend = %settings.storage.backend, "Connecting to storage");
    let storage = create_storage(settings.storage.backend).await?;
    let downstream = downstream::connect(
        settings.target,
        settings.dispatch_timeout,
        settings.http_timeout,
    )?;
    let bridge = ServerBridge::new(
        storage,
        KeyScheme::new(&settings.storage.prefix),
        downstream,
        settings.options,
    );

    let runner = bridge.clone();
    let mut running = tokio::spawn(async move { runner.start().await });

    tokio::select! {
        finished = &mut running => Ok(finished??),
        () = shutdown_signal() => {
            info!("Shutdown signal received, stopping server bridge");
            bridge.stop();
            Ok(running.await??)
        }
    }
}

/// Resolves on SIGINT, or SIGTERM on Unix.
async fn shutdown_signal() {
    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Cannot listen for Ctrl-C");
            futures::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Cannot listen for SIGTERM");
                futures::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = futures::future::pending::<()>();

    tokio::select! {
        () = interrupt => {}
        () = terminate => {}
    }
}
